use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response as HttpResponse;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::assessment::clock::{Clock, ManualClock};
use crate::assessment::domain::{
    AssessmentQuestion, CandidateDataConfig, PersonalData, Posting, PostingId, PostingStatus,
    QuestionKind, Response, ResponsePayload, RetakePolicy, ScreeningQuestion, SessionId,
    TimeLimit, UploadFile, UploadKind, UploadUrls,
};
use crate::assessment::flow::{AssessmentFlow, FlowOptions};
use crate::assessment::gateway::{
    AssessmentGateway, FinalizeAck, GatewayError, SessionTicket, SuspiciousSignal,
};
use crate::assessment::ledger::AssessmentLedger;
use crate::assessment::store::{MemoryBackend, SessionStore};

pub(super) const SCREENING_TEXT: &str = "Are you authorized to work in the EU?";

pub(super) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 3, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn manual_clock() -> ManualClock {
    ManualClock::starting_at(start_time())
}

pub(super) fn text_question(text: &str) -> AssessmentQuestion {
    AssessmentQuestion {
        text: text.to_string(),
        kind: QuestionKind::Text,
        weight: 1,
        time_limit: None,
        hide_text_until_recording: false,
    }
}

pub(super) fn voice_question(limit: Option<TimeLimit>, hide_text: bool) -> AssessmentQuestion {
    AssessmentQuestion {
        text: "Walk us through a production incident you handled.".to_string(),
        kind: QuestionKind::Voice,
        weight: 2,
        time_limit: limit,
        hide_text_until_recording: hide_text,
    }
}

pub(super) fn posting(id: &str, questions: Vec<AssessmentQuestion>) -> Posting {
    Posting {
        id: PostingId(id.to_string()),
        title: "Backend Engineer".to_string(),
        status: PostingStatus::Active,
        screening_questions: vec![ScreeningQuestion {
            text: SCREENING_TEXT.to_string(),
            disqualifying: true,
        }],
        questions,
        candidate_data: CandidateDataConfig::default(),
        retake_policy: RetakePolicy::Never,
    }
}

/// One knockout question, one text question, no upload.
pub(super) fn text_posting() -> Posting {
    posting("post-text", vec![text_question("Why this role?")])
}

pub(super) fn voice_posting(limit: Option<TimeLimit>) -> Posting {
    posting("post-voice", vec![voice_question(limit, true)])
}

pub(super) fn upload_posting() -> Posting {
    let mut posting = posting(
        "post-upload",
        vec![
            text_question("Why this role?"),
            text_question("What would you change in your last codebase?"),
        ],
    );
    posting.candidate_data.require_cv = true;
    posting
}

pub(super) fn candidate(screening_answer: bool) -> PersonalData {
    let mut screening_answers = BTreeMap::new();
    screening_answers.insert(SCREENING_TEXT.to_string(), screening_answer);
    PersonalData {
        full_name: "Maya Lindqvist".to_string(),
        email: "maya@example.org".to_string(),
        phone: "+46 70 123 45 67".to_string(),
        years_experience: Some(6),
        screening_answers,
        ..PersonalData::default()
    }
}

pub(super) fn text_response(index: usize, answer: &str) -> Response {
    Response {
        question_index: index,
        started_at: start_time(),
        completed_at: start_time(),
        is_auto_submitted: false,
        payload: ResponsePayload::Text {
            answer: answer.to_string(),
        },
    }
}

pub(super) fn cv_file() -> UploadFile {
    UploadFile {
        kind: UploadKind::Cv,
        file_name: "maya-cv.pdf".to_string(),
        content_type: "application/pdf".to_string(),
        bytes: b"%PDF-1.7 fake".to_vec(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum GatewayCall {
    FetchPosting,
    CreateSession,
    RecordResponse(usize),
    Flag(usize),
    Finalize,
    Upload,
}

/// Ledger-backed gateway that records every call and can be told to fail.
pub(super) struct RecordingGateway {
    ledger: AssessmentLedger,
    calls: Mutex<Vec<GatewayCall>>,
    failing_responses: Mutex<HashSet<usize>>,
    finalize_failures: AtomicUsize,
    flags_fail: AtomicBool,
}

impl RecordingGateway {
    pub(super) fn with_posting(posting: Posting) -> Self {
        let ledger = AssessmentLedger::with_clock(Arc::new(manual_clock()));
        ledger.register_posting(posting).expect("register posting");
        Self {
            ledger,
            calls: Mutex::new(Vec::new()),
            failing_responses: Mutex::new(HashSet::new()),
            finalize_failures: AtomicUsize::new(0),
            flags_fail: AtomicBool::new(false),
        }
    }

    pub(super) fn failing_response(self, index: usize) -> Self {
        self.failing_responses
            .lock()
            .expect("failing responses mutex poisoned")
            .insert(index);
        self
    }

    /// The next `times` finalize calls fail before one succeeds.
    pub(super) fn flaky_finalize(self, times: usize) -> Self {
        self.finalize_failures.store(times, Ordering::SeqCst);
        self
    }

    pub(super) fn failing_flags(self) -> Self {
        self.flags_fail.store(true, Ordering::SeqCst);
        self
    }

    pub(super) fn ledger(&self) -> &AssessmentLedger {
        &self.ledger
    }

    pub(super) fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    pub(super) fn count(&self, call: &GatewayCall) -> usize {
        self.calls().iter().filter(|seen| *seen == call).count()
    }

    pub(super) fn count_matching(&self, predicate: impl Fn(&GatewayCall) -> bool) -> usize {
        self.calls().iter().filter(|seen| predicate(seen)).count()
    }

    fn log(&self, call: GatewayCall) {
        self.calls.lock().expect("calls mutex poisoned").push(call);
    }
}

impl AssessmentGateway for RecordingGateway {
    fn fetch_posting(&self, posting_id: &PostingId) -> Result<Posting, GatewayError> {
        self.log(GatewayCall::FetchPosting);
        self.ledger.fetch_posting(posting_id)
    }

    fn create_session(
        &self,
        posting_id: &PostingId,
        personal_data: &PersonalData,
    ) -> Result<SessionTicket, GatewayError> {
        self.log(GatewayCall::CreateSession);
        self.ledger.create_session(posting_id, personal_data)
    }

    fn record_response(
        &self,
        session_id: &SessionId,
        response: &Response,
    ) -> Result<(), GatewayError> {
        self.log(GatewayCall::RecordResponse(response.question_index));
        let fail = self
            .failing_responses
            .lock()
            .expect("failing responses mutex poisoned")
            .contains(&response.question_index);
        if fail {
            return Err(GatewayError::Unavailable("response endpoint timed out".to_string()));
        }
        self.ledger.record_response(session_id, response)
    }

    fn flag_suspicious(
        &self,
        session_id: &SessionId,
        signal: &SuspiciousSignal,
    ) -> Result<(), GatewayError> {
        self.log(GatewayCall::Flag(signal.question_index));
        if self.flags_fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("flag endpoint down".to_string()));
        }
        self.ledger.flag_suspicious(session_id, signal)
    }

    fn finalize(
        &self,
        session_id: &SessionId,
        upload_urls: &UploadUrls,
    ) -> Result<FinalizeAck, GatewayError> {
        self.log(GatewayCall::Finalize);
        let remaining = self.finalize_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.finalize_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::Unavailable("finalize endpoint timed out".to_string()));
        }
        self.ledger.finalize(session_id, upload_urls)
    }

    fn upload(&self, file: &UploadFile) -> Result<String, GatewayError> {
        self.log(GatewayCall::Upload);
        self.ledger.upload(file)
    }
}

pub(super) type TestFlow = AssessmentFlow<RecordingGateway, MemoryBackend>;

pub(super) fn open_flow(
    gateway: &Arc<RecordingGateway>,
    backend: &MemoryBackend,
    clock: &ManualClock,
    posting_id: &str,
) -> TestFlow {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    AssessmentFlow::open(
        Arc::clone(gateway),
        SessionStore::new(backend.clone()),
        clock,
        &PostingId(posting_id.to_string()),
        FlowOptions::default(),
    )
    .expect("flow opens")
}

pub(super) async fn read_json(response: HttpResponse) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body");
    serde_json::from_slice(&bytes).expect("json body")
}
