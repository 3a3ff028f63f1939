use super::domain::Response;
use super::gateway::AssessmentGateway;
use super::submission::{Delivery, SubmissionCoordinator, SubmissionError};

/// Where the flow goes after the current answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Question(usize),
    Upload,
    Seal,
}

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("all questions have already been answered")]
    Finished,
    #[error("answer is for question {found} but question {expected} is being presented")]
    WrongQuestion { expected: usize, found: usize },
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// Walks the posting's questions strictly in order, one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSequencer {
    total: usize,
    current: Option<usize>,
}

impl QuestionSequencer {
    pub fn new(total: usize) -> Self {
        Self::resume(total, 0)
    }

    /// Continue from a saved position; `position >= total` means every answer went out.
    pub fn resume(total: usize, position: usize) -> Self {
        Self {
            total,
            current: (position < total).then_some(position),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_none()
    }

    /// Position to persist: the next question to present, or `total` once done.
    pub fn position(&self) -> usize {
        self.current.unwrap_or(self.total)
    }

    /// Exit taken once no question remains.
    pub fn exit(requires_upload: bool) -> NextStep {
        if requires_upload {
            NextStep::Upload
        } else {
            NextStep::Seal
        }
    }

    /// Dispatch the answer for the current question and move past it.
    ///
    /// The dispatch outcome never holds the candidate back; it is returned so the
    /// caller can keep a receipt.
    pub fn advance<G>(
        &mut self,
        response: &Response,
        coordinator: &mut SubmissionCoordinator<G>,
        requires_upload: bool,
    ) -> Result<(NextStep, Delivery), SequenceError>
    where
        G: AssessmentGateway + 'static,
    {
        let expected = self.current.ok_or(SequenceError::Finished)?;
        if response.question_index != expected {
            return Err(SequenceError::WrongQuestion {
                expected,
                found: response.question_index,
            });
        }

        let delivery = coordinator.record_response(response)?;

        let next = expected + 1;
        if next < self.total {
            self.current = Some(next);
            Ok((NextStep::Question(next), delivery))
        } else {
            self.current = None;
            Ok((Self::exit(requires_upload), delivery))
        }
    }
}
