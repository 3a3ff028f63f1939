//! Candidate assessment session engine.
//!
//! Takes a candidate from identity capture through knockout screening, an ordered
//! run of text and time-boxed voice questions, and an optional upload step, to a
//! single sealing call. Collaborator endpoints sit behind [`AssessmentGateway`];
//! [`AssessmentLedger`] is the in-process implementation served by
//! [`assessment_router`].

pub mod capture;
pub mod clock;
pub mod domain;
pub mod flow;
pub mod gateway;
pub mod intake;
pub mod ledger;
pub mod proctoring;
pub mod router;
pub mod screening;
pub mod sequencer;
pub mod store;
pub mod submission;
pub mod text;

#[cfg(test)]
mod tests;

pub use capture::{
    drive, AudioDevice, AudioStream, CaptureCommand, CaptureDeviceError, CaptureError,
    CaptureOutcome, CaptureStage, DriverCadence, RecorderClaim, RecordingEnd, SimulatedMicrophone,
    VoiceCaptureEngine,
};
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use domain::{
    AnswerReceipt, ApplicantId, AssessmentQuestion, CandidateDataConfig, LanguageLevel,
    PersonalData, PersonalField, Posting, PostingId, PostingStatus, QuestionKind, Response,
    ResponsePayload, RetakePolicy, ScreeningQuestion, Session, SessionId, SessionStep, TimeLimit,
    UploadFile, UploadKind, UploadUrls, VoiceRecording,
};
pub use flow::{AssessmentFlow, FlowCapture, FlowError, FlowOptions, FlowView};
pub use gateway::{
    AssessmentGateway, FinalizeAck, GatewayError, SessionTicket, SuspicionReason,
    SuspiciousSignal,
};
pub use intake::{IntakeGuard, IntakeViolation};
pub use ledger::{AssessmentLedger, ResponseSummary, SessionStatusView};
pub use proctoring::{ProctoringMonitor, ProctoringWarning, UnloadDecision, Visibility};
pub use router::assessment_router;
pub use screening::{evaluate as evaluate_screening, ScreeningOutcome};
pub use sequencer::{NextStep, QuestionSequencer, SequenceError};
pub use store::{
    EntryPoint, FileBackend, MemoryBackend, SealReceipt, SessionBackend, SessionStore,
    StoreError,
};
pub use submission::{AnswerPersistence, Delivery, SubmissionCoordinator, SubmissionError};
pub use text::{TextAnswerCollector, TextAnswerError};
