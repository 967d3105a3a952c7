//! SQLite-backed session storage, generalized from the teacher's
//! `SessionDatabase` onto this crate's [`ScanSession`]/[`RecoverableFile`]
//! model. Each row is independently decodable, so concurrent readers are
//! safe; writers still serialize through `rusqlite`'s own connection lock.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::CoreError;
use crate::ScanSession;

const SCHEMA_VERSION: i64 = 1;

/// SQLite database for storing [`ScanSession`] records.
pub struct SessionDatabase {
    conn: Connection,
    db_path: PathBuf,
}

/// Lightweight session summary for listings; does not carry `discovered_files`.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: Uuid,
    pub target_identity: String,
    pub created_at: DateTime<Utc>,
    pub declared_capacity: u64,
    pub last_scanned_offset: u64,
    pub file_count: usize,
}

impl SessionDatabase {
    /// Opens or creates a session database at `path`, creating parent
    /// directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let db_path = path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        let db = Self { conn, db_path };
        db.initialize_schema()?;
        Ok(db)
    }

    /// The default database location, `~/.recoverscan/sessions.db`.
    pub fn default_path() -> Result<PathBuf, CoreError> {
        let home = dirs::home_dir().ok_or_else(|| {
            CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ))
        })?;
        Ok(home.join(".recoverscan").join("sessions.db"))
    }

    fn initialize_schema(&self) -> Result<(), CoreError> {
        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                schema_version INTEGER NOT NULL,
                target_identity TEXT NOT NULL,
                created_at TEXT NOT NULL,
                declared_capacity INTEGER NOT NULL,
                last_scanned_offset INTEGER NOT NULL,
                discovered_files_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_created_at
                ON sessions(created_at DESC);

            CREATE INDEX IF NOT EXISTS idx_sessions_target
                ON sessions(target_identity);
            "#,
        ))?;
        let _ = SCHEMA_VERSION;
        Ok(())
    }

    /// Saves `session`, replacing any prior row with the same id.
    pub fn save_session(&self, session: &ScanSession) -> Result<(), CoreError> {
        let discovered_files_json = serde_json::to_string(&session.discovered_files)
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO sessions (
                id, schema_version, target_identity, created_at,
                declared_capacity, last_scanned_offset, discovered_files_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                session.id.to_string(),
                SCHEMA_VERSION,
                session.target_identity,
                session.created_at.to_rfc3339(),
                session.declared_capacity as i64,
                session.last_scanned_offset as i64,
                discovered_files_json,
            ],
        )?;

        tracing::info!("saved session {} to database", session.id);
        Ok(())
    }

    /// Loads a session by full UUID or unambiguous short prefix.
    pub fn load_session(&self, id: &str) -> Result<ScanSession, CoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, target_identity, created_at, declared_capacity,
                   last_scanned_offset, discovered_files_json
            FROM sessions
            WHERE id = ?1 OR id LIKE ?2
            LIMIT 1
            "#,
        )?;

        let row = stmt
            .query_row(params![id, format!("{id}%")], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .optional()?
            .ok_or_else(|| CoreError::SessionNotFound(parse_uuid_best_effort(id)))?;

        let (id_str, target_identity, created_at_str, declared_capacity, last_scanned_offset, files_json) =
            row;

        let session_id = Uuid::parse_str(&id_str)
            .map_err(|_| CoreError::SessionNotFound(parse_uuid_best_effort(id)))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?
            .with_timezone(&Utc);
        let discovered_files = serde_json::from_str(&files_json)
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        Ok(ScanSession {
            id: session_id,
            created_at,
            target_identity,
            declared_capacity: declared_capacity as u64,
            last_scanned_offset: last_scanned_offset as u64,
            discovered_files,
        })
    }

    /// Lists all sessions, most recent first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, CoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, target_identity, created_at, declared_capacity,
                   last_scanned_offset, discovered_files_json
            FROM sessions
            ORDER BY created_at DESC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id_str, target_identity, created_at_str, declared_capacity, last_scanned_offset, files_json) =
                row?;
            let Ok(id) = Uuid::parse_str(&id_str) else {
                tracing::warn!("invalid UUID in sessions database: {id_str}");
                continue;
            };
            let Ok(created_at) = DateTime::parse_from_rfc3339(&created_at_str) else {
                tracing::warn!("invalid timestamp in sessions database: {created_at_str}");
                continue;
            };
            let file_count = serde_json::from_str::<Vec<serde_json::Value>>(&files_json)
                .map(|v| v.len())
                .unwrap_or(0);

            summaries.push(SessionSummary {
                id,
                target_identity,
                created_at: created_at.with_timezone(&Utc),
                declared_capacity: declared_capacity as u64,
                last_scanned_offset: last_scanned_offset as u64,
                file_count,
            });
        }
        Ok(summaries)
    }

    /// Lists sessions for a specific target identity, most recent first.
    pub fn list_sessions_by_target(&self, target_identity: &str) -> Result<Vec<SessionSummary>, CoreError> {
        Ok(self
            .list_sessions()?
            .into_iter()
            .filter(|s| s.target_identity == target_identity)
            .collect())
    }

    /// Deletes a session by full UUID or unambiguous short prefix.
    pub fn delete_session(&self, id: &str) -> Result<(), CoreError> {
        let rows_affected = self.conn.execute(
            "DELETE FROM sessions WHERE id = ?1 OR id LIKE ?2",
            params![id, format!("{id}%")],
        )?;
        if rows_affected == 0 {
            return Err(CoreError::SessionNotFound(parse_uuid_best_effort(id)));
        }
        tracing::info!("deleted {rows_affected} session(s) matching {id}");
        Ok(())
    }

    /// Deletes sessions older than `days`, returning the count removed.
    pub fn cleanup_old_sessions(&self, days: u32) -> Result<usize, CoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let rows_affected = self.conn.execute(
            "DELETE FROM sessions WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        tracing::info!("cleaned up {rows_affected} sessions older than {days} days");
        Ok(rows_affected)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn count(&self) -> Result<usize, CoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn parse_uuid_best_effort(id: &str) -> Uuid {
    Uuid::parse_str(id).unwrap_or_else(|_| Uuid::nil())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Category, Origin, RecoverableFile};
    use tempfile::TempDir;

    fn sample_session() -> ScanSession {
        ScanSession {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            target_identity: "/dev/disk2@20480".to_string(),
            declared_capacity: 1_000_000,
            last_scanned_offset: 512_000,
            discovered_files: vec![RecoverableFile {
                id: Uuid::new_v4(),
                display_name: "IMG_0001".to_string(),
                extension: "jpg".to_string(),
                category: Category::Image,
                size: 4096,
                offset: 8192,
                origin: Origin::Catalog,
                original_path: None,
            }],
        }
    }

    #[test]
    fn round_trips_a_saved_session() {
        let temp_dir = TempDir::new().unwrap();
        let db = SessionDatabase::open(temp_dir.path().join("sessions.db")).unwrap();

        let session = sample_session();
        db.save_session(&session).unwrap();

        let loaded = db.load_session(&session.id.to_string()).unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.target_identity, session.target_identity);
        assert_eq!(loaded.last_scanned_offset, session.last_scanned_offset);
        assert_eq!(loaded.discovered_files.len(), 1);
        assert_eq!(loaded.discovered_files[0].display_name, "IMG_0001");
    }

    #[test]
    fn loads_by_short_id_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let db = SessionDatabase::open(temp_dir.path().join("sessions.db")).unwrap();

        let session = sample_session();
        db.save_session(&session).unwrap();

        let short_id = &session.id.to_string()[..8];
        let loaded = db.load_session(short_id).unwrap();
        assert_eq!(loaded.id, session.id);
    }

    #[test]
    fn cleanup_removes_only_old_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let db = SessionDatabase::open(temp_dir.path().join("sessions.db")).unwrap();

        let mut old_session = sample_session();
        old_session.created_at = Utc::now() - chrono::Duration::days(60);
        let new_session = sample_session();

        db.save_session(&old_session).unwrap();
        db.save_session(&new_session).unwrap();

        let removed = db.cleanup_old_sessions(30).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn delete_missing_session_errors() {
        let temp_dir = TempDir::new().unwrap();
        let db = SessionDatabase::open(temp_dir.path().join("sessions.db")).unwrap();
        let result = db.delete_session(&Uuid::new_v4().to_string());
        assert!(matches!(result, Err(CoreError::SessionNotFound(_))));
    }
}
