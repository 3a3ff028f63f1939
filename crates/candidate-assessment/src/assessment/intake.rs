use super::domain::{PersonalData, Posting};

/// Validation errors raised before any identity data leaves the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeViolation {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
    #[error("{0} profile link is required for this posting")]
    MissingProfileLink(&'static str),
    #[error("{field} must be an http(s) URL")]
    InvalidUrl { field: &'static str },
    #[error("notes exceed {max} characters (found {found})")]
    NotesTooLong { max: usize, found: usize },
    #[error("screening question unanswered: {0}")]
    UnansweredScreening(String),
}

pub const DEFAULT_NOTES_MAX_CHARS: usize = 1000;

/// Checks personal info against the posting's candidate data requirements.
#[derive(Debug, Clone)]
pub struct IntakeGuard {
    notes_max_chars: usize,
}

impl Default for IntakeGuard {
    fn default() -> Self {
        Self::new(DEFAULT_NOTES_MAX_CHARS)
    }
}

impl IntakeGuard {
    pub fn new(notes_max_chars: usize) -> Self {
        let notes_max_chars = if notes_max_chars == 0 {
            DEFAULT_NOTES_MAX_CHARS
        } else {
            notes_max_chars
        };
        Self { notes_max_chars }
    }

    pub fn notes_max_chars(&self) -> usize {
        self.notes_max_chars
    }

    pub fn check(
        &self,
        posting: &Posting,
        data: &PersonalData,
        notes: &str,
    ) -> Result<(), IntakeViolation> {
        if data.full_name.trim().is_empty() {
            return Err(IntakeViolation::MissingField("full name"));
        }
        if data.email.trim().is_empty() {
            return Err(IntakeViolation::MissingField("email"));
        }
        if !looks_like_email(data.email.trim()) {
            return Err(IntakeViolation::InvalidEmail(data.email.clone()));
        }
        if data.phone.trim().is_empty() {
            return Err(IntakeViolation::MissingField("phone"));
        }

        let requirements = &posting.candidate_data;
        check_link(
            data.linkedin_url.as_deref(),
            requirements.require_linkedin,
            "LinkedIn",
        )?;
        // A required portfolio is enforced at the upload step; the link stays optional.
        check_link(data.portfolio_url.as_deref(), false, "portfolio")?;

        let found = notes.chars().count();
        if found > self.notes_max_chars {
            return Err(IntakeViolation::NotesTooLong {
                max: self.notes_max_chars,
                found,
            });
        }

        if let Some(unanswered) = posting
            .screening_questions
            .iter()
            .find(|question| !data.screening_answers.contains_key(&question.text))
        {
            return Err(IntakeViolation::UnansweredScreening(unanswered.text.clone()));
        }

        Ok(())
    }
}

fn check_link(
    value: Option<&str>,
    required: bool,
    field: &'static str,
) -> Result<(), IntakeViolation> {
    match value.map(str::trim).filter(|link| !link.is_empty()) {
        Some(link) if link.starts_with("https://") || link.starts_with("http://") => Ok(()),
        Some(_) => Err(IntakeViolation::InvalidUrl { field }),
        None if required => Err(IntakeViolation::MissingProfileLink(field)),
        None => Ok(()),
    }
}

fn looks_like_email(value: &str) -> bool {
    let mut parts = value.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        _ => false,
    }
}
