use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::domain::{QuestionKind, SessionId, SessionStep};
use super::gateway::{AssessmentGateway, SuspicionReason, SuspiciousSignal};

pub const TAB_HIDDEN_WARNING: &str =
    "Leaving this tab during a voice question is reported to the hiring team.";
pub const UNLOAD_WARNING: &str =
    "Your assessment is in progress. Leaving now may lose your answers.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Non-blocking notice shown to the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProctoringWarning {
    pub question_index: usize,
    pub message: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadDecision {
    Allow,
    Confirm { message: &'static str },
}

/// Passive observer for tab visibility and unload attempts.
///
/// Never pauses timers or alters the flow; signal delivery failures are swallowed.
pub struct ProctoringMonitor<G> {
    gateway: Arc<G>,
    session_id: Option<SessionId>,
    step: Option<SessionStep>,
    question: Option<(usize, QuestionKind)>,
    hidden: bool,
    signals_raised: u32,
}

impl<G> ProctoringMonitor<G>
where
    G: AssessmentGateway + 'static,
{
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            session_id: None,
            step: None,
            question: None,
            hidden: false,
            signals_raised: 0,
        }
    }

    pub fn attach(&mut self, session_id: SessionId) {
        self.session_id = Some(session_id);
    }

    pub fn observe_step(&mut self, step: SessionStep) {
        self.step = Some(step);
        if step != SessionStep::Questions {
            self.question = None;
        }
    }

    pub fn observe_question(&mut self, index: usize, kind: QuestionKind) {
        self.question = Some((index, kind));
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.step,
            Some(SessionStep::Questions) | Some(SessionStep::Upload)
        )
    }

    pub fn signals_raised(&self) -> u32 {
        self.signals_raised
    }

    /// Feed a visibility change. Each visible→hidden transition during a voice
    /// question raises one signal; repeated hidden events within the same
    /// occurrence are ignored.
    pub fn on_visibility_change(
        &mut self,
        visibility: Visibility,
        observed_at: DateTime<Utc>,
    ) -> Option<ProctoringWarning> {
        match visibility {
            Visibility::Visible => {
                self.hidden = false;
                None
            }
            Visibility::Hidden if self.hidden => None,
            Visibility::Hidden => {
                self.hidden = true;
                if !self.is_active() {
                    return None;
                }
                let (question_index, kind) = self.question?;
                if kind != QuestionKind::Voice {
                    return None;
                }

                self.signals_raised += 1;
                self.report(question_index, observed_at);
                Some(ProctoringWarning {
                    question_index,
                    message: TAB_HIDDEN_WARNING,
                })
            }
        }
    }

    pub fn on_unload_attempt(&self) -> UnloadDecision {
        if self.is_active() {
            UnloadDecision::Confirm {
                message: UNLOAD_WARNING,
            }
        } else {
            UnloadDecision::Allow
        }
    }

    fn report(&self, question_index: usize, observed_at: DateTime<Utc>) {
        let Some(session_id) = &self.session_id else {
            debug!(question_index, "no session attached; suspicious signal dropped");
            return;
        };

        let signal = SuspiciousSignal {
            reason: SuspicionReason::TabHiddenDuringVoice,
            question_index,
            observed_at,
        };
        match self.gateway.flag_suspicious(session_id, &signal) {
            Ok(()) => info!(
                session_id = %session_id.0,
                question_index,
                reason = signal.reason.label(),
                "suspicious activity flagged"
            ),
            Err(error) => debug!(
                session_id = %session_id.0,
                question_index,
                %error,
                "suspicious signal not delivered"
            ),
        }
    }
}
