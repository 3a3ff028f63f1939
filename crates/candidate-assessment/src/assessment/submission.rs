use std::sync::Arc;

use tracing::{error, info, warn};

use super::domain::{Response, Session, SessionId, SessionStep};
use super::gateway::{AssessmentGateway, FinalizeAck, GatewayError};
use super::store::{SessionBackend, SessionStore};

/// How per-answer persistence failures are treated.
///
/// `BestEffort`: a failed answer call is logged and the candidate moves on; the
/// answer is never re-requested and never retried automatically. Only the seal
/// call is allowed to block the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerPersistence {
    #[default]
    BestEffort,
}

/// Result of dispatching one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Acknowledged,
    Failed(GatewayError),
}

impl Delivery {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Delivery::Acknowledged)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("answer for question {found} dispatched out of order (expected {expected})")]
    OutOfOrder { expected: usize, found: usize },
    #[error("application already submitted")]
    AlreadySubmitted,
    #[error("cannot seal: {dispatched} of {total} answers dispatched")]
    Incomplete { dispatched: usize, total: usize },
    #[error("sealing the application failed: {0}")]
    SealFailed(#[source] GatewayError),
}

/// Owns answer dispatch order and the single successful seal.
pub struct SubmissionCoordinator<G> {
    gateway: Arc<G>,
    session_id: SessionId,
    total_questions: usize,
    next_index: usize,
    policy: AnswerPersistence,
    sealed: bool,
}

impl<G> SubmissionCoordinator<G>
where
    G: AssessmentGateway + 'static,
{
    pub fn new(gateway: Arc<G>, session_id: SessionId, total_questions: usize) -> Self {
        Self::resume(gateway, session_id, total_questions, 0)
    }

    /// Rebuild after a reload; answers below `dispatched` were already sent.
    pub fn resume(
        gateway: Arc<G>,
        session_id: SessionId,
        total_questions: usize,
        dispatched: usize,
    ) -> Self {
        Self {
            gateway,
            session_id,
            total_questions,
            next_index: dispatched.min(total_questions),
            policy: AnswerPersistence::default(),
            sealed: false,
        }
    }

    pub fn policy(&self) -> AnswerPersistence {
        self.policy
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn dispatched(&self) -> usize {
        self.next_index
    }

    pub fn dispatched_all(&self) -> bool {
        self.next_index >= self.total_questions
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Send one answer. Network failures are reported in the `Delivery`, not as errors.
    pub fn record_response(&mut self, response: &Response) -> Result<Delivery, SubmissionError> {
        if self.sealed {
            return Err(SubmissionError::AlreadySubmitted);
        }
        if response.question_index != self.next_index {
            return Err(SubmissionError::OutOfOrder {
                expected: self.next_index,
                found: response.question_index,
            });
        }
        self.next_index += 1;

        match self.gateway.record_response(&self.session_id, response) {
            Ok(()) => {
                info!(
                    session_id = %self.session_id.0,
                    question_index = response.question_index,
                    auto_submitted = response.is_auto_submitted,
                    "answer recorded"
                );
                Ok(Delivery::Acknowledged)
            }
            Err(failure) => {
                warn!(
                    session_id = %self.session_id.0,
                    question_index = response.question_index,
                    error = %failure,
                    policy = ?self.policy,
                    "answer persistence failed; candidate continues"
                );
                Ok(Delivery::Failed(failure))
            }
        }
    }

    /// The sealing call. On acknowledgement the session becomes immutable and its
    /// local slot is replaced by a completion receipt. A failure leaves everything
    /// in place so the caller can retry.
    pub fn finalize<B: SessionBackend>(
        &mut self,
        session: &mut Session,
        store: &SessionStore<B>,
    ) -> Result<FinalizeAck, SubmissionError> {
        if self.sealed || session.submitted {
            return Err(SubmissionError::AlreadySubmitted);
        }
        if !self.dispatched_all() {
            return Err(SubmissionError::Incomplete {
                dispatched: self.next_index,
                total: self.total_questions,
            });
        }

        let ack = self
            .gateway
            .finalize(&self.session_id, &session.upload_urls)
            .map_err(|failure| {
                error!(
                    session_id = %self.session_id.0,
                    error = %failure,
                    "seal call failed; application not yet complete"
                );
                SubmissionError::SealFailed(failure)
            })?;

        self.sealed = true;
        session.submitted = true;
        session.step = SessionStep::Complete;

        if let Err(store_error) = store.seal(session, ack.sealed_at) {
            warn!(
                session_id = %self.session_id.0,
                error = %store_error,
                "application sealed but local session could not be cleared"
            );
        }

        let undelivered = session.undelivered_answers();
        if !undelivered.is_empty() {
            warn!(
                session_id = %self.session_id.0,
                ?undelivered,
                "application sealed with answers that were never acknowledged"
            );
        }
        info!(session_id = %self.session_id.0, "application sealed");

        Ok(ack)
    }
}
