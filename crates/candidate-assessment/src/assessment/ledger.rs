use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::clock::{Clock, SystemClock};
use super::domain::{
    ApplicantId, PersonalData, Posting, PostingId, QuestionKind, Response, ResponsePayload,
    SessionId, UploadFile, UploadUrls,
};
use super::gateway::{
    AssessmentGateway, FinalizeAck, GatewayError, SessionTicket, SuspiciousSignal,
};

#[derive(Debug, Clone)]
struct SessionRecord {
    posting_id: PostingId,
    applicant_id: ApplicantId,
    personal_data: PersonalData,
    responses: BTreeMap<usize, Response>,
    flags: Vec<SuspiciousSignal>,
    upload_urls: UploadUrls,
    created_at: DateTime<Utc>,
    sealed: Option<FinalizeAck>,
}

#[derive(Debug, Default)]
struct LedgerState {
    postings: HashMap<PostingId, Posting>,
    sessions: HashMap<SessionId, SessionRecord>,
    uploads: HashMap<String, UploadFile>,
}

/// Summary of one stored answer, without the audio payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSummary {
    pub question_index: usize,
    pub kind: QuestionKind,
    pub is_auto_submitted: bool,
    pub completed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bytes: Option<usize>,
}

impl ResponseSummary {
    fn from_response(response: &Response) -> Self {
        let (answer_chars, duration_secs, audio_bytes) = match &response.payload {
            ResponsePayload::Text { answer } => (Some(answer.chars().count()), None, None),
            ResponsePayload::Voice(recording) => (
                None,
                Some(recording.duration_secs),
                Some(recording.audio.len()),
            ),
        };
        Self {
            question_index: response.question_index,
            kind: response.kind(),
            is_auto_submitted: response.is_auto_submitted,
            completed_at: response.completed_at,
            answer_chars,
            duration_secs,
            audio_bytes,
        }
    }
}

/// Reviewer-facing view of a session; hidden personal fields are blanked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatusView {
    pub session_id: SessionId,
    pub posting_id: PostingId,
    pub applicant_id: ApplicantId,
    pub personal_data: PersonalData,
    pub responses: Vec<ResponseSummary>,
    pub suspicious_flags: Vec<SuspiciousSignal>,
    pub upload_urls: UploadUrls,
    pub created_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
}

/// In-process implementation of the assessment endpoints.
pub struct AssessmentLedger {
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
    session_sequence: AtomicU64,
    applicant_sequence: AtomicU64,
    upload_sequence: AtomicU64,
}

impl Default for AssessmentLedger {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl AssessmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            clock,
            session_sequence: AtomicU64::new(1),
            applicant_sequence: AtomicU64::new(1),
            upload_sequence: AtomicU64::new(1),
        }
    }

    pub fn register_posting(&self, posting: Posting) -> Result<(), GatewayError> {
        let mut state = self.lock()?;
        debug!(posting_id = %posting.id.0, status = posting.status.label(), "posting registered");
        state.postings.insert(posting.id.clone(), posting);
        Ok(())
    }

    pub fn session_status(&self, session_id: &SessionId) -> Result<SessionStatusView, GatewayError> {
        let state = self.lock()?;
        let record = state
            .sessions
            .get(session_id)
            .ok_or_else(|| GatewayError::NotFound(format!("session {}", session_id.0)))?;

        let hidden = state
            .postings
            .get(&record.posting_id)
            .map(|posting| posting.candidate_data.hidden_fields.clone())
            .unwrap_or_default();

        Ok(SessionStatusView {
            session_id: session_id.clone(),
            posting_id: record.posting_id.clone(),
            applicant_id: record.applicant_id.clone(),
            personal_data: record.personal_data.redacted(&hidden),
            responses: record
                .responses
                .values()
                .map(ResponseSummary::from_response)
                .collect(),
            suspicious_flags: record.flags.clone(),
            upload_urls: record.upload_urls.clone(),
            created_at: record.created_at,
            sealed_at: record.sealed.as_ref().map(|ack| ack.sealed_at),
        })
    }

    pub fn responses(&self, session_id: &SessionId) -> Result<Vec<Response>, GatewayError> {
        let state = self.lock()?;
        state
            .sessions
            .get(session_id)
            .map(|record| record.responses.values().cloned().collect())
            .ok_or_else(|| GatewayError::NotFound(format!("session {}", session_id.0)))
    }

    pub fn flags(&self, session_id: &SessionId) -> Result<Vec<SuspiciousSignal>, GatewayError> {
        let state = self.lock()?;
        state
            .sessions
            .get(session_id)
            .map(|record| record.flags.clone())
            .ok_or_else(|| GatewayError::NotFound(format!("session {}", session_id.0)))
    }

    pub fn uploaded(&self, url: &str) -> Result<Option<UploadFile>, GatewayError> {
        Ok(self.lock()?.uploads.get(url).cloned())
    }

    pub fn session_count(&self) -> usize {
        self.lock().map(|state| state.sessions.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, GatewayError> {
        self.state
            .lock()
            .map_err(|_| GatewayError::Unavailable("ledger lock poisoned".to_string()))
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

impl AssessmentGateway for AssessmentLedger {
    fn fetch_posting(&self, posting_id: &PostingId) -> Result<Posting, GatewayError> {
        self.lock()?
            .postings
            .get(posting_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("posting {}", posting_id.0)))
    }

    fn create_session(
        &self,
        posting_id: &PostingId,
        personal_data: &PersonalData,
    ) -> Result<SessionTicket, GatewayError> {
        let mut state = self.lock()?;
        let posting = state
            .postings
            .get(posting_id)
            .ok_or_else(|| GatewayError::NotFound(format!("posting {}", posting_id.0)))?;
        if !posting.is_active() {
            return Err(GatewayError::Rejected(format!(
                "posting {} is {}",
                posting_id.0,
                posting.status.label()
            )));
        }

        let session_id = SessionId(format!(
            "sess-{:06}",
            self.session_sequence.fetch_add(1, Ordering::Relaxed)
        ));
        let applicant_id = ApplicantId(format!(
            "appl-{:06}",
            self.applicant_sequence.fetch_add(1, Ordering::Relaxed)
        ));

        state.sessions.insert(
            session_id.clone(),
            SessionRecord {
                posting_id: posting_id.clone(),
                applicant_id: applicant_id.clone(),
                personal_data: personal_data.clone(),
                responses: BTreeMap::new(),
                flags: Vec::new(),
                upload_urls: UploadUrls::default(),
                created_at: self.clock.now(),
                sealed: None,
            },
        );
        info!(posting_id = %posting_id.0, session_id = %session_id.0, "session created");

        Ok(SessionTicket {
            session_id,
            applicant_id,
        })
    }

    fn record_response(
        &self,
        session_id: &SessionId,
        response: &Response,
    ) -> Result<(), GatewayError> {
        let mut state = self.lock()?;
        let LedgerState {
            postings, sessions, ..
        } = &mut *state;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::NotFound(format!("session {}", session_id.0)))?;
        if record.sealed.is_some() {
            return Err(GatewayError::Rejected(format!(
                "session {} is sealed",
                session_id.0
            )));
        }

        let question_count = postings
            .get(&record.posting_id)
            .map(|posting| posting.questions.len())
            .unwrap_or(0);
        if response.question_index >= question_count {
            return Err(GatewayError::Rejected(format!(
                "question {} does not exist",
                response.question_index
            )));
        }

        let replaced = record
            .responses
            .insert(response.question_index, response.clone())
            .is_some();
        debug!(
            session_id = %session_id.0,
            question_index = response.question_index,
            replaced,
            "response stored"
        );
        Ok(())
    }

    fn flag_suspicious(
        &self,
        session_id: &SessionId,
        signal: &SuspiciousSignal,
    ) -> Result<(), GatewayError> {
        let mut state = self.lock()?;
        let record = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::NotFound(format!("session {}", session_id.0)))?;
        record.flags.push(signal.clone());
        Ok(())
    }

    fn finalize(
        &self,
        session_id: &SessionId,
        upload_urls: &UploadUrls,
    ) -> Result<FinalizeAck, GatewayError> {
        let mut state = self.lock()?;
        let record = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::NotFound(format!("session {}", session_id.0)))?;

        if let Some(ack) = &record.sealed {
            debug!(session_id = %session_id.0, "finalize repeated; returning original seal");
            return Ok(ack.clone());
        }

        let ack = FinalizeAck {
            session_id: session_id.clone(),
            sealed_at: self.clock.now(),
        };
        record.upload_urls = upload_urls.clone();
        record.sealed = Some(ack.clone());
        info!(
            session_id = %session_id.0,
            responses = record.responses.len(),
            flags = record.flags.len(),
            "application sealed"
        );
        Ok(ack)
    }

    fn upload(&self, file: &UploadFile) -> Result<String, GatewayError> {
        if file.content_type.parse::<mime::Mime>().is_err() {
            return Err(GatewayError::Rejected(format!(
                "'{}' is not a valid content type",
                file.content_type
            )));
        }
        if file.bytes.is_empty() {
            return Err(GatewayError::Rejected("upload is empty".to_string()));
        }

        let sequence = self.upload_sequence.fetch_add(1, Ordering::Relaxed);
        let url = format!(
            "memory://uploads/{sequence:06}/{}/{}",
            file.kind.label(),
            sanitize_file_name(&file.file_name)
        );
        self.lock()?.uploads.insert(url.clone(), file.clone());
        debug!(%url, bytes = file.bytes.len(), "upload stored");
        Ok(url)
    }
}
