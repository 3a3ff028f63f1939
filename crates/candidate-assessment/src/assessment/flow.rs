use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::capture::{AudioDevice, CaptureError, RecorderClaim, VoiceCaptureEngine};
use super::clock::Clock;
use super::domain::{
    AssessmentQuestion, PersonalData, Posting, PostingId, QuestionKind, Response,
    ScreeningQuestion, Session, SessionStep, UploadFile, UploadKind,
};
use super::gateway::{AssessmentGateway, GatewayError};
use super::intake::{IntakeGuard, IntakeViolation, DEFAULT_NOTES_MAX_CHARS};
use super::proctoring::{ProctoringMonitor, ProctoringWarning, UnloadDecision, Visibility};
use super::screening::{self, ScreeningOutcome};
use super::sequencer::{NextStep, QuestionSequencer, SequenceError};
use super::store::{EntryPoint, SealReceipt, SessionBackend, SessionStore, StoreError};
use super::submission::{Delivery, SubmissionCoordinator, SubmissionError};
use super::text::{TextAnswerCollector, TextAnswerError};

/// Recorder type handed out by the flow; it shares the flow's clock.
pub type FlowCapture = VoiceCaptureEngine<Arc<dyn Clock>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowOptions {
    pub notes_max_chars: usize,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            notes_max_chars: DEFAULT_NOTES_MAX_CHARS,
        }
    }
}

/// What the candidate is looking at.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowView {
    Landing { attempt: u8 },
    PersonalInfo,
    Question { index: usize, kind: QuestionKind },
    /// Read-only look at the last answered question, reached from the upload step.
    ReviewLastQuestion { index: usize },
    Upload,
    /// Every answer is out; waiting on (or retrying) the seal call.
    Sealing { failure: Option<String> },
    Complete(SealReceipt),
}

impl FlowView {
    pub fn label(&self) -> &'static str {
        match self {
            FlowView::Landing { .. } => "landing",
            FlowView::PersonalInfo => "personal_info",
            FlowView::Question { .. } => "question",
            FlowView::ReviewLastQuestion { .. } => "review_last_question",
            FlowView::Upload => "upload",
            FlowView::Sealing { .. } => "sealing",
            FlowView::Complete(_) => "complete",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("posting {posting_id} could not be loaded: {source}")]
    PostingUnavailable {
        posting_id: String,
        #[source]
        source: GatewayError,
    },
    #[error("posting {posting_id} is {status} and not accepting candidates")]
    PostingInactive {
        posting_id: String,
        status: &'static str,
    },
    #[error("cannot {action} from the {view} step")]
    InvalidStep {
        action: &'static str,
        view: &'static str,
    },
    #[error(transparent)]
    Intake(#[from] IntakeViolation),
    #[error("screening requirement not met: {}", .0.text)]
    ScreeningFailed(ScreeningQuestion),
    #[error("question {index} expects a {expected} answer")]
    KindMismatch {
        index: usize,
        expected: &'static str,
    },
    #[error("question {0} was already answered")]
    AlreadyAnswered(usize),
    #[error("a recorder was already issued for question {0}")]
    CaptureAlreadyIssued(usize),
    #[error("voice question {0} cannot be left while a recording is in progress")]
    RecordingInProgress(usize),
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
    #[error("{} upload is required", .0.label())]
    MissingUpload(UploadKind),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Text(#[from] TextAnswerError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives one candidate through one posting, from landing to the sealed application.
///
/// Owns the session value and the single writer to the session store. Every
/// mutation is persisted immediately so a reload resumes at the same step.
pub struct AssessmentFlow<G, B> {
    gateway: Arc<G>,
    store: SessionStore<B>,
    clock: Arc<dyn Clock>,
    intake: IntakeGuard,
    posting: Posting,
    session: Option<Session>,
    sequencer: QuestionSequencer,
    coordinator: Option<SubmissionCoordinator<G>>,
    proctoring: ProctoringMonitor<G>,
    capture_issued: Option<(usize, RecorderClaim)>,
    view: FlowView,
}

impl<G, B> AssessmentFlow<G, B>
where
    G: AssessmentGateway + 'static,
    B: SessionBackend,
{
    /// Fetch the posting and decide between landing, resume and completion.
    pub fn open(
        gateway: Arc<G>,
        store: SessionStore<B>,
        clock: Arc<dyn Clock>,
        posting_id: &PostingId,
        options: FlowOptions,
    ) -> Result<Self, FlowError> {
        let posting =
            gateway
                .fetch_posting(posting_id)
                .map_err(|source| FlowError::PostingUnavailable {
                    posting_id: posting_id.0.clone(),
                    source,
                })?;
        if !posting.is_active() {
            warn!(posting_id = %posting_id.0, status = posting.status.label(), "posting not active");
            return Err(FlowError::PostingInactive {
                posting_id: posting_id.0.clone(),
                status: posting.status.label(),
            });
        }

        let total = posting.questions.len();
        let entry = store.entry(posting_id, posting.retake_policy)?;
        let mut flow = Self {
            proctoring: ProctoringMonitor::new(Arc::clone(&gateway)),
            gateway,
            store,
            clock,
            intake: IntakeGuard::new(options.notes_max_chars),
            posting,
            session: None,
            sequencer: QuestionSequencer::new(total),
            coordinator: None,
            capture_issued: None,
            view: FlowView::Landing { attempt: 1 },
        };

        match entry {
            EntryPoint::Landing { attempt } => flow.view = FlowView::Landing { attempt },
            EntryPoint::Completed(receipt) => flow.view = FlowView::Complete(receipt),
            EntryPoint::Resume(session) => flow.resume(session),
        }
        debug!(posting_id = %posting_id.0, view = flow.view.label(), "assessment flow opened");
        Ok(flow)
    }

    pub fn view(&self) -> &FlowView {
        &self.view
    }

    pub fn posting(&self) -> &Posting {
        &self.posting
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn store(&self) -> &SessionStore<B> {
        &self.store
    }

    pub fn proctoring_signals(&self) -> u32 {
        self.proctoring.signals_raised()
    }

    /// Candidate confirmed intent to start.
    pub fn start(&mut self) -> Result<&FlowView, FlowError> {
        let FlowView::Landing { attempt } = self.view else {
            return Err(self.invalid("start the assessment"));
        };

        let session = Session::new(self.posting.id.clone(), attempt, self.clock.now());
        self.session = Some(session);
        self.capture_issued = None;
        self.sequencer = QuestionSequencer::new(self.posting.questions.len());
        self.enter_step(SessionStep::PersonalInfo);
        self.view = FlowView::PersonalInfo;
        self.persist();
        info!(posting_id = %self.posting.id.0, attempt, "assessment started");
        Ok(&self.view)
    }

    /// Validate identity data, run screening, then open the server-side session.
    ///
    /// Validation and screening run before any network call; a knockout leaves the
    /// candidate on this step and nothing is created server-side.
    pub fn submit_personal_info(
        &mut self,
        data: PersonalData,
        notes: &str,
    ) -> Result<&FlowView, FlowError> {
        if self.view != FlowView::PersonalInfo {
            return Err(self.invalid("submit personal info"));
        }

        self.intake.check(&self.posting, &data, notes)?;
        if let ScreeningOutcome::Fail(question) =
            screening::evaluate(&self.posting.screening_questions, &data.screening_answers)
        {
            info!(
                posting_id = %self.posting.id.0,
                question = %question.text,
                "candidate blocked by knockout question"
            );
            return Err(FlowError::ScreeningFailed(question));
        }

        let ticket = self.gateway.create_session(&self.posting.id, &data)?;
        let total = self.posting.questions.len();
        self.coordinator = Some(SubmissionCoordinator::new(
            Arc::clone(&self.gateway),
            ticket.session_id.clone(),
            total,
        ));
        self.proctoring.attach(ticket.session_id.clone());

        if let Some(session) = self.session.as_mut() {
            session.session_id = Some(ticket.session_id);
            session.applicant_id = Some(ticket.applicant_id);
            session.personal_data = Some(data);
            session.notes = notes.to_string();
            session.current_question = 0;
        }

        match self.sequencer.current() {
            Some(index) => {
                self.enter_step(SessionStep::Questions);
                self.present(index);
                self.persist();
            }
            None => self.leave_questions(),
        }
        Ok(&self.view)
    }

    /// The question currently presented, if any.
    pub fn current_question(&self) -> Option<(usize, &AssessmentQuestion)> {
        match self.view {
            FlowView::Question { index, .. } => {
                self.posting.question(index).map(|question| (index, question))
            }
            _ => None,
        }
    }

    pub fn text_collector(&self) -> Result<TextAnswerCollector, FlowError> {
        let index = self.presented_index("answer a text question")?;
        self.expect_kind(index, QuestionKind::Text)?;
        Ok(TextAnswerCollector::start(index, self.clock.as_ref()))
    }

    /// Hand out the single recorder for the current voice question.
    ///
    /// A replacement is issued only once the previous recorder was cancelled or
    /// dropped before it started recording.
    pub fn voice_capture(&mut self, device: Box<dyn AudioDevice>) -> Result<FlowCapture, FlowError> {
        let index = self.presented_index("record a voice answer")?;
        self.expect_kind(index, QuestionKind::Voice)?;
        if let Some((issued, claim)) = &self.capture_issued {
            if *issued == index && !claim.released_unused() {
                return Err(FlowError::CaptureAlreadyIssued(index));
            }
        }

        let question = self
            .posting
            .question(index)
            .ok_or(FlowError::Sequence(SequenceError::Finished))?;
        let engine = VoiceCaptureEngine::new(index, question, device, Arc::clone(&self.clock))?;
        self.capture_issued = Some((index, engine.claim()));
        Ok(engine)
    }

    /// Hand a finished answer to the sequencer and move on.
    pub fn submit_response(&mut self, response: Response) -> Result<&FlowView, FlowError> {
        if let FlowView::ReviewLastQuestion { index } = self.view {
            return Err(FlowError::AlreadyAnswered(index));
        }
        let index = self.presented_index("submit an answer")?;
        if response.question_index < index {
            return Err(FlowError::AlreadyAnswered(response.question_index));
        }
        if let Some(question) = self.posting.question(index) {
            if response.kind() != question.kind {
                return Err(FlowError::KindMismatch {
                    index,
                    expected: question.kind.label(),
                });
            }
        }

        let requires_upload = self.posting.candidate_data.requires_upload();
        let coordinator = self
            .coordinator
            .as_mut()
            .ok_or_else(|| FlowError::InvalidStep {
                action: "submit an answer",
                view: "personal_info",
            })?;
        let (next, delivery) = self
            .sequencer
            .advance(&response, coordinator, requires_upload)?;

        if let Some(session) = self.session.as_mut() {
            session
                .answers
                .push(response.receipt(delivery.is_acknowledged()));
            session.current_question = self.sequencer.position();
        }
        if let Delivery::Failed(failure) = &delivery {
            debug!(question_index = index, %failure, "answer kept as undelivered receipt");
        }

        match next {
            NextStep::Question(next_index) => {
                self.present(next_index);
                self.persist();
            }
            NextStep::Upload | NextStep::Seal => self.leave_questions(),
        }
        Ok(&self.view)
    }

    /// From the upload step, look back at the last answered question.
    pub fn back_to_last_question(&mut self) -> Result<&FlowView, FlowError> {
        if self.view != FlowView::Upload {
            return Err(self.invalid("go back to the last question"));
        }
        let Some(index) = self.posting.questions.len().checked_sub(1) else {
            return Err(self.invalid("go back to the last question"));
        };

        self.enter_step(SessionStep::Questions);
        self.view = FlowView::ReviewLastQuestion { index };
        self.persist();
        Ok(&self.view)
    }

    pub fn return_to_upload(&mut self) -> Result<&FlowView, FlowError> {
        if !matches!(self.view, FlowView::ReviewLastQuestion { .. }) {
            return Err(self.invalid("return to upload"));
        }
        self.enter_step(SessionStep::Upload);
        self.view = FlowView::Upload;
        self.persist();
        Ok(&self.view)
    }

    /// Send one file to the upload endpoint and remember where it landed.
    pub fn upload(&mut self, file: UploadFile) -> Result<String, FlowError> {
        if self.view != FlowView::Upload {
            return Err(self.invalid("upload a file"));
        }
        if let Err(parse_error) = file.content_type.parse::<mime::Mime>() {
            return Err(FlowError::InvalidUpload(format!(
                "content type '{}': {parse_error}",
                file.content_type
            )));
        }
        if file.bytes.is_empty() {
            return Err(FlowError::InvalidUpload(format!(
                "{} is empty",
                file.file_name
            )));
        }

        let url = self.gateway.upload(&file)?;
        if let Some(session) = self.session.as_mut() {
            match file.kind {
                UploadKind::Cv => session.upload_urls.cv_url = Some(url.clone()),
                UploadKind::Portfolio => session.upload_urls.portfolio_url = Some(url.clone()),
            }
        }
        self.persist();
        info!(kind = file.kind.label(), %url, "candidate material uploaded");
        Ok(url)
    }

    /// Leave the upload step once every required file is present, then seal.
    pub fn complete_upload(&mut self) -> Result<&FlowView, FlowError> {
        if self.view != FlowView::Upload {
            return Err(self.invalid("finish uploads"));
        }

        let requirements = &self.posting.candidate_data;
        let urls = self
            .session
            .as_ref()
            .map(|session| session.upload_urls.clone())
            .unwrap_or_default();
        if requirements.require_cv && urls.cv_url.is_none() {
            return Err(FlowError::MissingUpload(UploadKind::Cv));
        }
        if requirements.require_portfolio && urls.portfolio_url.is_none() {
            return Err(FlowError::MissingUpload(UploadKind::Portfolio));
        }

        self.view = FlowView::Sealing { failure: None };
        self.seal()
    }

    /// The sealing call; also the retry affordance after a failed seal.
    pub fn seal(&mut self) -> Result<&FlowView, FlowError> {
        if !matches!(self.view, FlowView::Sealing { .. }) {
            return Err(self.invalid("seal the application"));
        }

        let answers = self
            .session
            .as_ref()
            .and_then(|session| session.personal_data.as_ref())
            .map(|data| data.screening_answers.clone())
            .unwrap_or_default();
        if let ScreeningOutcome::Fail(question) =
            screening::evaluate(&self.posting.screening_questions, &answers)
        {
            warn!(
                posting_id = %self.posting.id.0,
                question = %question.text,
                "screening no longer passes; refusing to seal"
            );
            return Err(FlowError::ScreeningFailed(question));
        }

        let view = self.view.label();
        let (Some(coordinator), Some(session)) = (self.coordinator.as_mut(), self.session.as_mut())
        else {
            return Err(FlowError::InvalidStep {
                action: "seal the application",
                view,
            });
        };

        match coordinator.finalize(session, &self.store) {
            Ok(ack) => {
                let receipt = SealReceipt {
                    posting_id: session.posting_id.clone(),
                    session_id: Some(ack.session_id),
                    attempt: session.attempt,
                    sealed_at: ack.sealed_at,
                };
                self.proctoring.observe_step(SessionStep::Complete);
                self.view = FlowView::Complete(receipt);
                Ok(&self.view)
            }
            Err(failure) => {
                error!(
                    posting_id = %self.posting.id.0,
                    error = %failure,
                    "application not sealed; retry required"
                );
                self.view = FlowView::Sealing {
                    failure: Some(failure.to_string()),
                };
                Err(FlowError::Submission(failure))
            }
        }
    }

    pub fn on_visibility_change(&mut self, visibility: Visibility) -> Option<ProctoringWarning> {
        self.proctoring
            .on_visibility_change(visibility, self.clock.now())
    }

    pub fn on_unload_attempt(&self) -> UnloadDecision {
        self.proctoring.on_unload_attempt()
    }

    /// Navigate back to the landing page, destroying the local session.
    ///
    /// Only possible before a voice answer has started: from personal info, a text
    /// question, or a voice question whose recorder is still in `permission` or
    /// `ready`. A live recorder must be handed in so its stream is released; one
    /// already torn down unused needs nothing.
    pub fn abandon(&mut self, capture: Option<&mut FlowCapture>) -> Result<&FlowView, FlowError> {
        match self.view {
            FlowView::PersonalInfo => {}
            FlowView::Question { index, kind } => {
                let claim = self
                    .capture_issued
                    .as_ref()
                    .filter(|(issued, _)| kind == QuestionKind::Voice && *issued == index)
                    .map(|(_, claim)| claim.clone());
                if let Some(claim) = claim {
                    match capture {
                        Some(engine) => engine.cancel()?,
                        None if claim.released_unused() => {}
                        None => return Err(FlowError::RecordingInProgress(index)),
                    }
                }
            }
            _ => return Err(self.invalid("leave the assessment")),
        }

        let attempt = self.session.as_ref().map_or(1, |session| session.attempt);
        self.store.clear()?;
        self.session = None;
        self.coordinator = None;
        self.capture_issued = None;
        self.proctoring.observe_step(SessionStep::PersonalInfo);
        self.view = FlowView::Landing { attempt };
        info!(posting_id = %self.posting.id.0, "candidate left the assessment");
        Ok(&self.view)
    }

    fn resume(&mut self, mut session: Session) {
        let total = self.posting.questions.len();
        let Some(session_id) = session.session_id.clone() else {
            session.step = SessionStep::PersonalInfo;
            self.session = Some(session);
            self.enter_step(SessionStep::PersonalInfo);
            self.view = FlowView::PersonalInfo;
            return;
        };

        let position = session.current_question.min(total);
        self.sequencer = QuestionSequencer::resume(total, position);
        self.coordinator = Some(SubmissionCoordinator::resume(
            Arc::clone(&self.gateway),
            session_id.clone(),
            total,
            position,
        ));
        self.proctoring.attach(session_id.clone());
        let step = session.step;
        self.session = Some(session);

        info!(
            posting_id = %self.posting.id.0,
            session_id = %session_id.0,
            step = step.label(),
            position,
            "resuming assessment"
        );

        match (step, self.sequencer.current()) {
            (SessionStep::PersonalInfo, _) => {
                self.enter_step(SessionStep::PersonalInfo);
                self.view = FlowView::PersonalInfo;
            }
            (SessionStep::Questions, Some(index)) => {
                self.enter_step(SessionStep::Questions);
                self.present(index);
            }
            (SessionStep::Upload, _) | (SessionStep::Questions, None)
                if self.posting.candidate_data.requires_upload() =>
            {
                self.enter_step(SessionStep::Upload);
                self.view = FlowView::Upload;
            }
            _ => {
                self.enter_step(SessionStep::Questions);
                self.view = FlowView::Sealing { failure: None };
            }
        }
    }

    /// Exit taken after the last question, or straight from personal info when the
    /// posting has none.
    fn leave_questions(&mut self) {
        match QuestionSequencer::exit(self.posting.candidate_data.requires_upload()) {
            NextStep::Upload => {
                self.enter_step(SessionStep::Upload);
                self.view = FlowView::Upload;
                self.persist();
            }
            _ => {
                self.enter_step(SessionStep::Questions);
                self.view = FlowView::Sealing { failure: None };
                self.persist();
                if let Err(failure) = self.seal() {
                    debug!(%failure, "automatic seal did not complete");
                }
            }
        }
    }

    fn present(&mut self, index: usize) {
        let kind = self
            .posting
            .question(index)
            .map_or(QuestionKind::Text, |question| question.kind);
        self.proctoring.observe_question(index, kind);
        self.view = FlowView::Question { index, kind };
        debug!(question_index = index, kind = kind.label(), "question presented");
    }

    fn enter_step(&mut self, step: SessionStep) {
        if let Some(session) = self.session.as_mut() {
            if session.step != step && !session.step.can_advance_to(step) {
                warn!(
                    from = session.step.label(),
                    to = step.label(),
                    "unexpected step transition"
                );
            }
            session.step = step;
        }
        self.proctoring.observe_step(step);
    }

    fn persist(&self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.submitted {
            return;
        }
        if let Err(error) = self.store.save(session) {
            warn!(posting_id = %session.posting_id.0, %error, "session not persisted");
        }
    }

    fn presented_index(&self, action: &'static str) -> Result<usize, FlowError> {
        match self.view {
            FlowView::Question { index, .. } => Ok(index),
            _ => Err(self.invalid(action)),
        }
    }

    fn expect_kind(&self, index: usize, kind: QuestionKind) -> Result<(), FlowError> {
        match self.posting.question(index) {
            Some(question) if question.kind == kind => Ok(()),
            Some(question) => Err(FlowError::KindMismatch {
                index,
                expected: question.kind.label(),
            }),
            None => Err(FlowError::Sequence(SequenceError::Finished)),
        }
    }

    fn invalid(&self, action: &'static str) -> FlowError {
        FlowError::InvalidStep {
            action,
            view: self.view.label(),
        }
    }
}
