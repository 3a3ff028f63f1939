use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::ScreeningQuestion;

/// Result of checking screening answers against the posting's knockout rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreeningOutcome {
    Pass,
    Fail(ScreeningQuestion),
}

impl ScreeningOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, ScreeningOutcome::Pass)
    }
}

/// Returns the first disqualifying question answered "no", in posting order.
///
/// Pure and re-runnable: callers evaluate again before sealing since answers may
/// have been edited after the first pass. An unanswered question is not a "no";
/// completeness is enforced by personal data validation.
pub fn evaluate(
    questions: &[ScreeningQuestion],
    answers: &BTreeMap<String, bool>,
) -> ScreeningOutcome {
    questions
        .iter()
        .filter(|question| question.disqualifying)
        .find(|question| answers.get(&question.text) == Some(&false))
        .cloned()
        .map(ScreeningOutcome::Fail)
        .unwrap_or(ScreeningOutcome::Pass)
}
