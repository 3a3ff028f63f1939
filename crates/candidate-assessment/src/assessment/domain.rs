use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for job postings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostingId(pub String);

/// Server-assigned identifier for a candidate's assessment session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Server-assigned identifier for the applicant record behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicantId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingStatus {
    Draft,
    Active,
    Paused,
    Closed,
}

impl PostingStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PostingStatus::Draft => "draft",
            PostingStatus::Active => "active",
            PostingStatus::Paused => "paused",
            PostingStatus::Closed => "closed",
        }
    }
}

/// Yes/no knockout question asked before the assessment begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreeningQuestion {
    pub text: String,
    pub disqualifying: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Text,
    Voice,
}

impl QuestionKind {
    pub const fn label(self) -> &'static str {
        match self {
            QuestionKind::Text => "text",
            QuestionKind::Voice => "voice",
        }
    }
}

/// Hard ceiling for a voice answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeLimit {
    #[serde(rename = "30s")]
    ThirtySeconds,
    #[serde(rename = "1min")]
    OneMinute,
    #[serde(rename = "2min")]
    TwoMinutes,
    #[default]
    #[serde(rename = "3min")]
    ThreeMinutes,
    #[serde(rename = "5min")]
    FiveMinutes,
}

impl TimeLimit {
    pub const fn seconds(self) -> u32 {
        match self {
            TimeLimit::ThirtySeconds => 30,
            TimeLimit::OneMinute => 60,
            TimeLimit::TwoMinutes => 120,
            TimeLimit::ThreeMinutes => 180,
            TimeLimit::FiveMinutes => 300,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            TimeLimit::ThirtySeconds => "30s",
            TimeLimit::OneMinute => "1min",
            TimeLimit::TwoMinutes => "2min",
            TimeLimit::ThreeMinutes => "3min",
            TimeLimit::FiveMinutes => "5min",
        }
    }
}

/// One assessment question as configured on the posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentQuestion {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub time_limit: Option<TimeLimit>,
    #[serde(default)]
    pub hide_text_until_recording: bool,
}

impl AssessmentQuestion {
    pub fn effective_time_limit(&self) -> TimeLimit {
        self.time_limit.unwrap_or_default()
    }
}

/// Personal fields a posting may hide from reviewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalField {
    Email,
    Phone,
    Age,
    Major,
    Experience,
    SalaryExpectation,
    Languages,
}

/// Which candidate materials a posting requires and which fields reviewers may not see.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CandidateDataConfig {
    #[serde(default)]
    pub require_cv: bool,
    #[serde(default)]
    pub require_linkedin: bool,
    /// Portfolio file at the upload step.
    #[serde(default)]
    pub require_portfolio: bool,
    #[serde(default)]
    pub hidden_fields: Vec<PersonalField>,
}

impl CandidateDataConfig {
    /// Whether the flow must pass through the upload step before sealing.
    pub fn requires_upload(&self) -> bool {
        self.require_cv || self.require_portfolio
    }
}

/// Application-level allowance for re-attempting a sealed assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RetakePolicy {
    #[default]
    Never,
    Allowed {
        max_attempts: u8,
    },
}

impl RetakePolicy {
    pub fn permits_attempt(self, attempt: u8) -> bool {
        match self {
            RetakePolicy::Never => attempt <= 1,
            RetakePolicy::Allowed { max_attempts } => attempt <= max_attempts.max(1),
        }
    }
}

/// Read-only posting configuration fetched from the job service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub id: PostingId,
    pub title: String,
    pub status: PostingStatus,
    #[serde(default)]
    pub screening_questions: Vec<ScreeningQuestion>,
    #[serde(default)]
    pub questions: Vec<AssessmentQuestion>,
    #[serde(default)]
    pub candidate_data: CandidateDataConfig,
    #[serde(default)]
    pub retake_policy: RetakePolicy,
}

impl Posting {
    pub fn is_active(&self) -> bool {
        self.status == PostingStatus::Active
    }

    pub fn question(&self, index: usize) -> Option<&AssessmentQuestion> {
        self.questions.get(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageLevel {
    Beginner,
    Intermediate,
    Advanced,
    Fluent,
    Native,
}

/// Identity and self-declared data captured on the personal info step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersonalData {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub age: Option<u8>,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub years_experience: Option<u8>,
    #[serde(default)]
    pub salary_expectation: Option<u32>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub portfolio_url: Option<String>,
    #[serde(default)]
    pub screening_answers: BTreeMap<String, bool>,
    #[serde(default)]
    pub language_ratings: BTreeMap<String, LanguageLevel>,
}

impl PersonalData {
    /// Copy with the posting's reviewer-hidden fields blanked out.
    pub fn redacted(&self, hidden: &[PersonalField]) -> PersonalData {
        let mut copy = self.clone();
        for field in hidden {
            match field {
                PersonalField::Email => copy.email.clear(),
                PersonalField::Phone => copy.phone.clear(),
                PersonalField::Age => copy.age = None,
                PersonalField::Major => copy.major = None,
                PersonalField::Experience => copy.years_experience = None,
                PersonalField::SalaryExpectation => copy.salary_expectation = None,
                PersonalField::Languages => copy.language_ratings.clear(),
            }
        }
        copy
    }
}

/// Step of the candidate-visible flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStep {
    PersonalInfo,
    Questions,
    Upload,
    Complete,
}

impl SessionStep {
    pub const fn label(self) -> &'static str {
        match self {
            SessionStep::PersonalInfo => "personal_info",
            SessionStep::Questions => "questions",
            SessionStep::Upload => "upload",
            SessionStep::Complete => "complete",
        }
    }

    /// Forward-only ordering, except the explicit back from upload to the last question.
    pub fn can_advance_to(self, next: SessionStep) -> bool {
        match (self, next) {
            (SessionStep::Complete, _) => false,
            (SessionStep::Upload, SessionStep::Questions) => true,
            (current, next) => next > current,
        }
    }
}

/// Where the uploaded candidate materials ended up.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadUrls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    Cv,
    Portfolio,
}

impl UploadKind {
    pub const fn label(self) -> &'static str {
        match self {
            UploadKind::Cv => "cv",
            UploadKind::Portfolio => "portfolio",
        }
    }
}

/// File handed to the opaque upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    pub kind: UploadKind,
    pub file_name: String,
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

/// Local bookkeeping for an answer that has been dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerReceipt {
    pub question_index: usize,
    pub kind: QuestionKind,
    pub completed_at: DateTime<Utc>,
    pub auto_submitted: bool,
    pub delivered: bool,
}

/// One candidate's attempt at one posting, persisted across reloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub posting_id: PostingId,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub applicant_id: Option<ApplicantId>,
    pub step: SessionStep,
    #[serde(default)]
    pub personal_data: Option<PersonalData>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub current_question: usize,
    #[serde(default)]
    pub answers: Vec<AnswerReceipt>,
    #[serde(default)]
    pub upload_urls: UploadUrls,
    pub attempt: u8,
    pub submitted: bool,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(posting_id: PostingId, attempt: u8, started_at: DateTime<Utc>) -> Self {
        Self {
            posting_id,
            session_id: None,
            applicant_id: None,
            step: SessionStep::PersonalInfo,
            personal_data: None,
            notes: String::new(),
            current_question: 0,
            answers: Vec::new(),
            upload_urls: UploadUrls::default(),
            attempt,
            submitted: false,
            started_at,
        }
    }

    pub fn undelivered_answers(&self) -> Vec<usize> {
        self.answers
            .iter()
            .filter(|receipt| !receipt.delivered)
            .map(|receipt| receipt.question_index)
            .collect()
    }
}

/// Captured voice answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceRecording {
    #[serde(with = "base64_bytes")]
    pub audio: Vec<u8>,
    pub mime_type: String,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ResponsePayload {
    Text { answer: String },
    Voice(VoiceRecording),
}

/// One answer to one question. Never revised once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub question_index: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub is_auto_submitted: bool,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn kind(&self) -> QuestionKind {
        match self.payload {
            ResponsePayload::Text { .. } => QuestionKind::Text,
            ResponsePayload::Voice(_) => QuestionKind::Voice,
        }
    }

    pub fn receipt(&self, delivered: bool) -> AnswerReceipt {
        AnswerReceipt {
            question_index: self.question_index,
            kind: self.kind(),
            completed_at: self.completed_at,
            auto_submitted: self.is_auto_submitted,
            delivered,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn time_limit_defaults_to_three_minutes() {
        let question = AssessmentQuestion {
            text: "Describe a hard bug".to_string(),
            kind: QuestionKind::Voice,
            weight: 1,
            time_limit: None,
            hide_text_until_recording: false,
        };
        assert_eq!(question.effective_time_limit(), TimeLimit::ThreeMinutes);
        assert_eq!(question.effective_time_limit().seconds(), 180);
    }

    #[test]
    fn time_limit_uses_posting_labels_on_the_wire() {
        let parsed: TimeLimit = serde_json::from_str("\"30s\"").expect("parse limit");
        assert_eq!(parsed, TimeLimit::ThirtySeconds);
        assert_eq!(
            serde_json::to_string(&TimeLimit::FiveMinutes).expect("serialize"),
            "\"5min\""
        );
    }

    #[test]
    fn step_ordering_is_forward_only_except_upload_back() {
        assert!(SessionStep::PersonalInfo.can_advance_to(SessionStep::Questions));
        assert!(SessionStep::Questions.can_advance_to(SessionStep::Complete));
        assert!(SessionStep::Upload.can_advance_to(SessionStep::Questions));
        assert!(!SessionStep::Questions.can_advance_to(SessionStep::PersonalInfo));
        assert!(!SessionStep::Upload.can_advance_to(SessionStep::PersonalInfo));
        assert!(!SessionStep::Complete.can_advance_to(SessionStep::Upload));
    }

    #[test]
    fn retake_policy_bounds_attempts() {
        assert!(RetakePolicy::Never.permits_attempt(1));
        assert!(!RetakePolicy::Never.permits_attempt(2));
        let allowed = RetakePolicy::Allowed { max_attempts: 2 };
        assert!(allowed.permits_attempt(2));
        assert!(!allowed.permits_attempt(3));
    }

    #[test]
    fn redaction_blanks_hidden_fields_only() {
        let data = PersonalData {
            full_name: "Dana Reyes".to_string(),
            email: "dana@example.com".to_string(),
            phone: "+1 555 0100".to_string(),
            age: Some(31),
            salary_expectation: Some(90_000),
            ..PersonalData::default()
        };

        let redacted = data.redacted(&[PersonalField::Age, PersonalField::SalaryExpectation]);
        assert_eq!(redacted.full_name, "Dana Reyes");
        assert_eq!(redacted.email, "dana@example.com");
        assert_eq!(redacted.age, None);
        assert_eq!(redacted.salary_expectation, None);
    }

    #[test]
    fn voice_audio_travels_as_base64() {
        let at = Utc
            .with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp");
        let response = Response {
            question_index: 2,
            started_at: at,
            completed_at: at,
            is_auto_submitted: true,
            payload: ResponsePayload::Voice(VoiceRecording {
                audio: vec![1, 2, 3],
                mime_type: "audio/webm".to_string(),
                duration_secs: 30.0,
            }),
        };

        let json = serde_json::to_value(&response).expect("serialize response");
        assert_eq!(json["payload"]["type"], "voice");
        assert_eq!(json["payload"]["audio"], "AQID");
        assert_eq!(response.kind(), QuestionKind::Voice);
    }
}
