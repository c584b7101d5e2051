//! Per-session state and the store seam. A session owns exactly one dataset,
//! its version history, the raw upload bytes (kept indefinitely so revert
//! can always re-derive), and at most one pending clarification.

use crate::clarify::PendingOperation;
use crate::dataset::{Dataset, Schema};
use crate::error::{EngineError, Result};
use crate::llm::ChatTurn;
use crate::versioning::VersionLog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub dataset: Dataset,
    pub schema: Schema,
    /// Raw upload bytes, untouched by any operation.
    pub original_bytes: Vec<u8>,
    pub original_filename: String,
    pub pending: Option<PendingOperation>,
    pub history: Vec<ChatTurn>,
    pub versions: VersionLog,
}

impl SessionState {
    pub fn new(
        id: impl Into<String>,
        dataset: Dataset,
        schema: Schema,
        original_bytes: Vec<u8>,
        original_filename: impl Into<String>,
    ) -> Self {
        let filename = original_filename.into();
        let mut versions = VersionLog::new();
        versions.commit_upload(format!("Uploaded {}", filename), dataset.clone());
        Self {
            id: id.into(),
            dataset,
            schema,
            original_bytes,
            original_filename: filename,
            pending: None,
            history: Vec::new(),
            versions,
        }
    }
}

/// Load/save seam. Implementations must append versions without losing
/// prior ones and keep the original upload bytes retrievable indefinitely.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<SessionState>;
    async fn save(&self, session: &SessionState) -> Result<()>;
}

/// Default in-process store; last write wins per session.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<SessionState> {
        self.sessions
            .lock()
            .map_err(|_| EngineError::Persistence("Session store lock poisoned".to_string()))?
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Persistence(format!("No session with id '{}'", id)))
    }

    async fn save(&self, session: &SessionState) -> Result<()> {
        self.sessions
            .lock()
            .map_err(|_| EngineError::Persistence("Session store lock poisoned".to_string()))?
            .insert(session.id.clone(), session.clone());
        Ok(())
    }
}
