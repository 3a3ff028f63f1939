use crate::infra::{seeded_ledger, SAMPLE_KNOCKOUT, SAMPLE_POSTING_ID};
use candidate_assessment::assessment::{
    AssessmentFlow, AssessmentGateway, AssessmentLedger, Clock, FileBackend,
    FinalizeAck, FlowCapture, FlowError, FlowOptions, FlowView, GatewayError, ManualClock,
    MemoryBackend, PersonalData, Posting, PostingId, QuestionKind, Response,
    SessionBackend, SessionId, SessionStore, SessionTicket, SimulatedMicrophone,
    SuspiciousSignal, UploadFile, UploadKind, UploadUrls, Visibility,
};
use candidate_assessment::config::AppConfig;
use candidate_assessment::error::AppError;
use chrono::Utc;
use clap::Args;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Let the voice answer run into its time limit instead of stopping early.
    #[arg(long)]
    pub(crate) timeout_voice: bool,
    /// Drop the first answer on the way to the server to show best-effort delivery.
    #[arg(long)]
    pub(crate) fail_first_answer: bool,
    /// Upload this file as the CV instead of the built-in sample.
    #[arg(long)]
    pub(crate) cv: Option<PathBuf>,
    /// Persist the session under the configured session directory.
    #[arg(long)]
    pub(crate) persist: bool,
}

#[derive(Args, Debug)]
pub(crate) struct SessionShowArgs {
    /// Posting whose stored session should be printed
    #[arg(long, default_value = SAMPLE_POSTING_ID)]
    pub(crate) posting: String,
    /// Session directory (defaults to APP_SESSION_DIR)
    #[arg(long)]
    pub(crate) dir: Option<PathBuf>,
}

/// Gateway wrapper that can drop the first answer once.
struct DemoGateway {
    ledger: Arc<AssessmentLedger>,
    drop_first_answer: AtomicBool,
}

impl AssessmentGateway for DemoGateway {
    fn fetch_posting(&self, posting_id: &PostingId) -> Result<Posting, GatewayError> {
        self.ledger.fetch_posting(posting_id)
    }

    fn create_session(
        &self,
        posting_id: &PostingId,
        personal_data: &PersonalData,
    ) -> Result<SessionTicket, GatewayError> {
        self.ledger.create_session(posting_id, personal_data)
    }

    fn record_response(
        &self,
        session_id: &SessionId,
        response: &Response,
    ) -> Result<(), GatewayError> {
        if response.question_index == 0 && self.drop_first_answer.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Unavailable(
                "simulated network drop".to_string(),
            ));
        }
        self.ledger.record_response(session_id, response)
    }

    fn flag_suspicious(
        &self,
        session_id: &SessionId,
        signal: &SuspiciousSignal,
    ) -> Result<(), GatewayError> {
        self.ledger.flag_suspicious(session_id, signal)
    }

    fn finalize(
        &self,
        session_id: &SessionId,
        upload_urls: &UploadUrls,
    ) -> Result<FinalizeAck, GatewayError> {
        self.ledger.finalize(session_id, upload_urls)
    }

    fn upload(&self, file: &UploadFile) -> Result<String, GatewayError> {
        self.ledger.upload(file)
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let options = FlowOptions {
        notes_max_chars: config.assessment.notes_max_chars,
    };
    let cv = load_cv(args.cv.as_ref())?;

    if args.persist {
        let backend = FileBackend::new(config.assessment.session_dir.clone());
        println!(
            "Persisting session under {}",
            config.assessment.session_dir.display()
        );
        walk_candidate(&args, backend, options, cv)
    } else {
        walk_candidate(&args, MemoryBackend::default(), options, cv)
    }
}

fn walk_candidate<B: SessionBackend>(
    args: &DemoArgs,
    backend: B,
    options: FlowOptions,
    cv: UploadFile,
) -> Result<(), AppError> {
    let clock = ManualClock::starting_at(Utc::now());
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let ledger = seeded_ledger(Arc::clone(&shared_clock)).map_err(FlowError::from)?;
    let gateway = Arc::new(DemoGateway {
        ledger: Arc::clone(&ledger),
        drop_first_answer: AtomicBool::new(args.fail_first_answer),
    });

    let posting_id = PostingId(SAMPLE_POSTING_ID.to_string());
    let mut flow = AssessmentFlow::open(
        gateway,
        SessionStore::new(backend),
        shared_clock,
        &posting_id,
        options,
    )?;

    println!("Candidate assessment demo: {}", flow.posting().title);
    println!("- entry view: {}", flow.view().label());
    if let FlowView::Complete(receipt) = flow.view() {
        println!("  Already sealed at {}; nothing to do.", receipt.sealed_at);
        return Ok(());
    }
    if matches!(flow.view(), FlowView::Landing { .. }) {
        flow.start()?;
    }
    if flow.view() == &FlowView::PersonalInfo {
        flow.submit_personal_info(demo_candidate(), "Available from next month.")?;
        println!("- screening passed, server session opened");
    }

    loop {
        let Some((index, kind, text)) = flow
            .current_question()
            .map(|(index, question)| (index, question.kind, question.text.clone()))
        else {
            break;
        };
        println!("- question {} ({}): {}", index + 1, kind.label(), text);
        let response = match kind {
            QuestionKind::Text => {
                let collector = flow.text_collector()?;
                clock.advance_secs(75);
                collector
                    .submit(
                        "A checkout service; we added queue-based load shedding.",
                        &clock,
                    )
                    .map_err(FlowError::from)?
            }
            QuestionKind::Voice => {
                let mut capture = flow.voice_capture(Box::new(SimulatedMicrophone::default()))?;
                record_voice(&mut flow, &mut capture, &clock, args.timeout_voice)?
            }
        };
        println!(
            "  answered (auto-submitted: {})",
            response.is_auto_submitted
        );
        flow.submit_response(response)?;
    }

    if flow.view() == &FlowView::Upload {
        let url = flow.upload(cv)?;
        println!("- CV uploaded to {url}");
        if let Err(failure) = flow.complete_upload() {
            println!("  sealing failed: {failure}");
        }
    }
    if let FlowView::Sealing { failure } = flow.view() {
        println!(
            "- retrying seal after: {}",
            failure.as_deref().unwrap_or("interrupted session")
        );
        flow.seal()?;
    }

    let FlowView::Complete(receipt) = flow.view().clone() else {
        println!("- flow stopped at {}", flow.view().label());
        return Ok(());
    };
    println!(
        "- application sealed at {} ({} proctoring signal(s))",
        receipt.sealed_at,
        flow.proctoring_signals()
    );
    if let Some(session) = flow.session() {
        let undelivered = session.undelivered_answers();
        if !undelivered.is_empty() {
            println!("  answers not confirmed by the server: {undelivered:?}");
        }
    }

    if let Some(session_id) = receipt.session_id.as_ref() {
        let status = ledger.session_status(session_id).map_err(FlowError::from)?;
        match serde_json::to_string_pretty(&status) {
            Ok(json) => println!("  Reviewer view:\n{json}"),
            Err(err) => println!("  Reviewer view unavailable: {err}"),
        }
    }
    Ok(())
}

/// Permission, countdown, and either an early stop or a run into the time limit.
///
/// The tab is hidden for a few seconds mid-answer so a proctoring signal shows up.
fn record_voice<G, B>(
    flow: &mut AssessmentFlow<G, B>,
    capture: &mut FlowCapture,
    clock: &ManualClock,
    run_to_limit: bool,
) -> Result<Response, FlowError>
where
    G: AssessmentGateway + 'static,
    B: SessionBackend,
{
    capture.request_permission()?;
    capture.begin()?;
    while !capture.is_recording() {
        clock.advance_secs(1);
        capture.tick()?;
    }

    let mut second = 0;
    loop {
        clock.advance_secs(1);
        second += 1;
        if second == 4 {
            if let Some(warning) = flow.on_visibility_change(Visibility::Hidden) {
                println!("  warning shown: {}", warning.message);
            }
        }
        if second == 6 {
            flow.on_visibility_change(Visibility::Visible);
        }
        if let Some(outcome) = capture.tick()? {
            println!("  recording ended: {:?}", outcome.ended_by);
            return Ok(outcome.response);
        }
        if !run_to_limit && second == 12 {
            let outcome = match capture.stop()? {
                Some(outcome) => outcome,
                None => capture.submit()?,
            };
            println!("  recording ended: {:?}", outcome.ended_by);
            return Ok(outcome.response);
        }
    }
}

pub(crate) fn run_session_show(args: SessionShowArgs) -> Result<(), AppError> {
    let dir = match args.dir {
        Some(dir) => dir,
        None => AppConfig::load()?.assessment.session_dir,
    };
    let store = SessionStore::new(FileBackend::new(dir));
    let posting_id = PostingId(args.posting);

    match store.peek()? {
        Some(session) if session.posting_id == posting_id => {
            println!(
                "Session in progress for {} at step {}",
                posting_id.0,
                session.step.label()
            );
            match serde_json::to_string_pretty(&session) {
                Ok(json) => println!("{json}"),
                Err(err) => println!("Session payload unavailable: {err}"),
            }
            return Ok(());
        }
        Some(other) => {
            println!(
                "Stored session belongs to {} (step {}); left in place",
                other.posting_id.0,
                other.step.label()
            );
        }
        None => {}
    }

    match store.receipt(&posting_id)? {
        Some(receipt) => println!(
            "Application for {} sealed at {} (attempt {})",
            posting_id.0, receipt.sealed_at, receipt.attempt
        ),
        None => println!("No session in progress for {}", posting_id.0),
    }
    Ok(())
}

fn load_cv(path: Option<&PathBuf>) -> Result<UploadFile, AppError> {
    let Some(path) = path else {
        return Ok(UploadFile {
            kind: UploadKind::Cv,
            file_name: "sample-cv.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: b"%PDF-1.7 sample curriculum vitae".to_vec(),
        });
    };

    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cv".to_string());
    Ok(UploadFile {
        kind: UploadKind::Cv,
        file_name,
        content_type: mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
        bytes,
    })
}

fn demo_candidate() -> PersonalData {
    let mut screening_answers = BTreeMap::new();
    screening_answers.insert(SAMPLE_KNOCKOUT.to_string(), true);
    PersonalData {
        full_name: "Ari Mendes".to_string(),
        email: "ari.mendes@example.com".to_string(),
        phone: "+1 555 0100".to_string(),
        age: Some(31),
        years_experience: Some(7),
        salary_expectation: Some(98_000),
        screening_answers,
        ..PersonalData::default()
    }
}
