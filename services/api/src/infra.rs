use candidate_assessment::assessment::{
    AssessmentLedger, AssessmentQuestion, CandidateDataConfig, Clock, GatewayError,
    PersonalField, Posting, PostingId, PostingStatus, QuestionKind, RetakePolicy,
    ScreeningQuestion, TimeLimit,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub(crate) const SAMPLE_POSTING_ID: &str = "post-backend-2025";
pub(crate) const SAMPLE_KNOCKOUT: &str = "Are you legally allowed to work in this country?";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Posting served by default: one knockout question, a text and a timed voice question, CV required.
pub(crate) fn sample_posting() -> Posting {
    Posting {
        id: PostingId(SAMPLE_POSTING_ID.to_string()),
        title: "Backend Engineer".to_string(),
        status: PostingStatus::Active,
        screening_questions: vec![ScreeningQuestion {
            text: SAMPLE_KNOCKOUT.to_string(),
            disqualifying: true,
        }],
        questions: vec![
            AssessmentQuestion {
                text: "Tell us about a service you kept running under load.".to_string(),
                kind: QuestionKind::Text,
                weight: 1,
                time_limit: None,
                hide_text_until_recording: false,
            },
            AssessmentQuestion {
                text: "How would you explain idempotency to a product manager?".to_string(),
                kind: QuestionKind::Voice,
                weight: 2,
                time_limit: Some(TimeLimit::ThirtySeconds),
                hide_text_until_recording: true,
            },
        ],
        candidate_data: CandidateDataConfig {
            require_cv: true,
            hidden_fields: vec![PersonalField::Age, PersonalField::SalaryExpectation],
            ..CandidateDataConfig::default()
        },
        retake_policy: RetakePolicy::Never,
    }
}

pub(crate) fn seeded_ledger(clock: Arc<dyn Clock>) -> Result<Arc<AssessmentLedger>, GatewayError> {
    let ledger = Arc::new(AssessmentLedger::with_clock(clock));
    ledger.register_posting(sample_posting())?;
    Ok(ledger)
}
