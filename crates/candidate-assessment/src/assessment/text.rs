use chrono::{DateTime, Utc};

use super::clock::Clock;
use super::domain::{Response, ResponsePayload};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextAnswerError {
    #[error("answer for question {0} is empty")]
    EmptyAnswer(usize),
}

/// Timer-less collector for a text question.
#[derive(Debug, Clone)]
pub struct TextAnswerCollector {
    question_index: usize,
    started_at: DateTime<Utc>,
}

impl TextAnswerCollector {
    pub fn start(question_index: usize, clock: &dyn Clock) -> Self {
        Self {
            question_index,
            started_at: clock.now(),
        }
    }

    pub fn question_index(&self) -> usize {
        self.question_index
    }

    pub fn submit(self, answer: &str, clock: &dyn Clock) -> Result<Response, TextAnswerError> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(TextAnswerError::EmptyAnswer(self.question_index));
        }

        Ok(Response {
            question_index: self.question_index,
            started_at: self.started_at,
            completed_at: clock.now(),
            is_auto_submitted: false,
            payload: ResponsePayload::Text {
                answer: answer.to_string(),
            },
        })
    }
}
