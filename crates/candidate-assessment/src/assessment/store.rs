use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::domain::{PostingId, RetakePolicy, Session, SessionId};

/// Bumped whenever the persisted `Session` layout changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

const ACTIVE_SLOT: &str = "assessment-session";

fn receipt_key(posting_id: &PostingId) -> String {
    format!("assessment-sealed-{}", posting_id.0)
}

/// Key/value persistence that survives a reload.
pub trait SessionBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session storage io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("session serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("session for posting {0} is sealed and immutable")]
    Sealed(String),
    #[error("session storage unavailable: {0}")]
    Unavailable(String),
}

/// Record left behind after a successful seal so a reload lands on the completion page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealReceipt {
    pub posting_id: PostingId,
    pub session_id: Option<SessionId>,
    pub attempt: u8,
    pub sealed_at: DateTime<Utc>,
}

/// What the candidate should see when opening a posting.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryPoint {
    Landing { attempt: u8 },
    Resume(Session),
    Completed(SealReceipt),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    schema_version: u32,
    posting_id: PostingId,
    session: Session,
}

/// Single-slot store for the in-progress session, scoped by posting.
#[derive(Debug, Clone)]
pub struct SessionStore<B> {
    backend: B,
}

impl<B: SessionBackend> SessionStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Decide between landing, resume and completion for `posting_id`.
    ///
    /// A slot holding another posting's session, an unknown schema version, or an
    /// unreadable payload is cleared rather than resumed.
    pub fn entry(
        &self,
        posting_id: &PostingId,
        retake_policy: RetakePolicy,
    ) -> Result<EntryPoint, StoreError> {
        if let Some(session) = self.load(posting_id)? {
            return Ok(EntryPoint::Resume(session));
        }

        match self.receipt(posting_id)? {
            Some(receipt) => {
                let next_attempt = receipt.attempt.saturating_add(1);
                if retake_policy.permits_attempt(next_attempt) {
                    Ok(EntryPoint::Landing {
                        attempt: next_attempt,
                    })
                } else {
                    Ok(EntryPoint::Completed(receipt))
                }
            }
            None => Ok(EntryPoint::Landing { attempt: 1 }),
        }
    }

    /// Read the active slot as stored, for any posting. Never clears anything.
    pub fn peek(&self) -> Result<Option<Session>, StoreError> {
        let Some(raw) = self.backend.read(ACTIVE_SLOT)? else {
            return Ok(None);
        };
        let stored: StoredSession = serde_json::from_str(&raw)?;
        if stored.schema_version != SCHEMA_VERSION {
            return Ok(None);
        }
        Ok(Some(stored.session))
    }

    /// Load the active session if it belongs to `posting_id`; resets the slot otherwise.
    pub fn load(&self, posting_id: &PostingId) -> Result<Option<Session>, StoreError> {
        let Some(raw) = self.backend.read(ACTIVE_SLOT)? else {
            return Ok(None);
        };

        let stored: StoredSession = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(error) => {
                warn!(%error, "discarding unreadable stored session");
                self.clear()?;
                return Ok(None);
            }
        };

        if stored.schema_version != SCHEMA_VERSION {
            warn!(
                found = stored.schema_version,
                expected = SCHEMA_VERSION,
                "discarding stored session with unknown schema version"
            );
            self.clear()?;
            return Ok(None);
        }

        if stored.posting_id != *posting_id || stored.session.posting_id != *posting_id {
            debug!(
                stored = %stored.posting_id.0,
                requested = %posting_id.0,
                "stored session belongs to another posting; resetting"
            );
            self.clear()?;
            return Ok(None);
        }

        if stored.session.submitted {
            self.clear()?;
            return Ok(None);
        }

        Ok(Some(stored.session))
    }

    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        if session.submitted {
            return Err(StoreError::Sealed(session.posting_id.0.clone()));
        }

        let stored = StoredSession {
            schema_version: SCHEMA_VERSION,
            posting_id: session.posting_id.clone(),
            session: session.clone(),
        };
        let raw = serde_json::to_string(&stored)?;
        self.backend.write(ACTIVE_SLOT, &raw)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.backend.remove(ACTIVE_SLOT)
    }

    /// Replace the active slot with a completion receipt.
    pub fn seal(
        &self,
        session: &Session,
        sealed_at: DateTime<Utc>,
    ) -> Result<SealReceipt, StoreError> {
        let receipt = SealReceipt {
            posting_id: session.posting_id.clone(),
            session_id: session.session_id.clone(),
            attempt: session.attempt,
            sealed_at,
        };
        let raw = serde_json::to_string(&receipt)?;
        self.backend.write(&receipt_key(&session.posting_id), &raw)?;
        self.clear()?;
        Ok(receipt)
    }

    pub fn receipt(&self, posting_id: &PostingId) -> Result<Option<SealReceipt>, StoreError> {
        match self.backend.read(&receipt_key(posting_id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Process-local backend; clones share the same map.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn keys(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(guard) => {
                let mut keys: Vec<String> = guard.keys().cloned().collect();
                keys.sort();
                keys
            }
            Err(_) => Vec::new(),
        }
    }
}

impl SessionBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory backend poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory backend poisoned".to_string()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory backend poisoned".to_string()))?;
        guard.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl SessionBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(StoreError::Io(error)),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::Io(error)),
        }
    }
}
