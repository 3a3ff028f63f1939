use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    ApplicantId, PersonalData, Posting, PostingId, Response, SessionId, UploadFile, UploadUrls,
};

/// Identifiers handed back when the server opens a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTicket {
    pub session_id: SessionId,
    pub applicant_id: ApplicantId,
}

/// Acknowledgement of the sealing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeAck {
    pub session_id: SessionId,
    pub sealed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionReason {
    TabHiddenDuringVoice,
}

impl SuspicionReason {
    pub const fn label(self) -> &'static str {
        match self {
            SuspicionReason::TabHiddenDuringVoice => "tab hidden during voice exam",
        }
    }
}

/// Advisory proctoring event reported to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousSignal {
    pub reason: SuspicionReason,
    pub question_index: usize,
    pub observed_at: DateTime<Utc>,
}

/// The endpoints the engine consumes. Implementations may be remote or in-process.
pub trait AssessmentGateway: Send + Sync {
    fn fetch_posting(&self, posting_id: &PostingId) -> Result<Posting, GatewayError>;
    fn create_session(
        &self,
        posting_id: &PostingId,
        personal_data: &PersonalData,
    ) -> Result<SessionTicket, GatewayError>;
    fn record_response(&self, session_id: &SessionId, response: &Response)
        -> Result<(), GatewayError>;
    fn flag_suspicious(
        &self,
        session_id: &SessionId,
        signal: &SuspiciousSignal,
    ) -> Result<(), GatewayError>;
    fn finalize(
        &self,
        session_id: &SessionId,
        upload_urls: &UploadUrls,
    ) -> Result<FinalizeAck, GatewayError>;
    fn upload(&self, file: &UploadFile) -> Result<String, GatewayError>;
}

/// Error enumeration for collaborator failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}
