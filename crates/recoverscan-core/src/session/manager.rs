//! High-level session management, mirroring the teacher's CLI-facing
//! `SessionManager` surface: save/load/list/delete/cleanup over a
//! [`SessionDatabase`].

use std::path::Path;

use crate::error::CoreError;
use crate::ScanSession;

use super::database::{SessionDatabase, SessionSummary};

pub struct SessionManager {
    db: SessionDatabase,
}

impl SessionManager {
    /// Opens the default database at `~/.recoverscan/sessions.db`.
    pub fn new() -> Result<Self, CoreError> {
        let db_path = SessionDatabase::default_path()?;
        Ok(Self {
            db: SessionDatabase::open(db_path)?,
        })
    }

    pub fn with_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        Ok(Self {
            db: SessionDatabase::open(path)?,
        })
    }

    pub fn database(&self) -> &SessionDatabase {
        &self.db
    }

    pub fn save(&self, session: &ScanSession) -> Result<(), CoreError> {
        self.db.save_session(session)
    }

    pub fn load(&self, id: &str) -> Result<ScanSession, CoreError> {
        self.db.load_session(id)
    }

    pub fn list(&self) -> Result<Vec<SessionSummary>, CoreError> {
        self.db.list_sessions()
    }

    pub fn list_for_target(&self, target_identity: &str) -> Result<Vec<SessionSummary>, CoreError> {
        self.db.list_sessions_by_target(target_identity)
    }

    pub fn delete(&self, id: &str) -> Result<(), CoreError> {
        self.db.delete_session(id)
    }

    /// The most recent session for a target, if any — used to offer resume
    /// at scan-start time.
    pub fn find_recent_for_target(&self, target_identity: &str) -> Result<Option<ScanSession>, CoreError> {
        let sessions = self.db.list_sessions_by_target(target_identity)?;
        match sessions.first() {
            Some(summary) => Ok(Some(self.db.load_session(&summary.id.to_string())?)),
            None => Ok(None),
        }
    }

    pub fn cleanup(&self, days: u32) -> Result<usize, CoreError> {
        self.db.cleanup_old_sessions(days)
    }

    pub fn count(&self) -> Result<usize, CoreError> {
        self.db.count()
    }
}
