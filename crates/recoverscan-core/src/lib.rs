//! Recovery scanning core: discovers deleted image/video files on a mounted
//! or raw storage device and streams them back as [`RecoverableFile`] records.
//!
//! The crate is organized the way the scan actually flows: [`block`] opens the
//! device, [`signatures`] and [`carver`] find bytes by magic number, `fs`
//! modules find filesystem metadata, [`coordinator`] unifies both into one
//! event stream, and [`session`] persists/resumes that stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub mod block;
pub mod carver;
pub mod coordinator;
pub mod error;
pub mod fs;
pub mod partition;
pub mod session;
pub mod signatures;
pub mod trash;

pub use error::CoreError;

/// Filesystem family hint carried on a [`Target`]. `Other` means the catalog
/// phase is skipped and only the signature carver runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilesystemHint {
    Fat32,
    ExFat,
    Ntfs,
    Apfs,
    HfsPlus,
    Other,
}

impl std::fmt::Display for FilesystemHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilesystemHint::Fat32 => "FAT32",
            FilesystemHint::ExFat => "exFAT",
            FilesystemHint::Ntfs => "NTFS",
            FilesystemHint::Apfs => "APFS",
            FilesystemHint::HfsPlus => "HFS+",
            FilesystemHint::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// A handle to a scannable region, produced by external device enumeration
/// or by [`partition`] search, and consumed by the [`coordinator`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Target {
    pub source_path: PathBuf,
    pub partition_offset: Option<u64>,
    pub declared_size: Option<u64>,
    pub fs_hint: FilesystemHint,
    pub is_seekable: bool,
}

impl Target {
    pub fn new(source_path: impl Into<PathBuf>, fs_hint: FilesystemHint) -> Self {
        Self {
            source_path: source_path.into(),
            partition_offset: None,
            declared_size: None,
            fs_hint,
            is_seekable: true,
        }
    }

    /// A stable string identifying this target for session bookkeeping.
    pub fn identity(&self) -> String {
        match self.partition_offset {
            Some(offset) => format!("{}@{}", self.source_path.display(), offset),
            None => self.source_path.display().to_string(),
        }
    }
}

/// Which camera's raw/TIFF signature promotion rules apply (§4.10).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraProfile {
    GoPro,
    Canon,
    Sony,
    Dji,
    Generic,
}

/// A scan invocation as seen from outside the core (§6).
#[derive(Clone, Debug)]
pub struct ScanRequest {
    pub target: Target,
    pub camera_profile: Option<CameraProfile>,
    pub resume_session_id: Option<Uuid>,
}

/// Broad content category a [`signatures::Signature`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Image,
    Video,
}

/// Which scan phase produced a [`RecoverableFile`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Catalog,
    Carver,
}

/// A discovered candidate file. Either `offset > 0` (carver or cluster-backed
/// catalog hit) or `original_path` is set (trash/mounted-path hit); the two
/// are never both absent. `extension` always names an entry in the signature
/// registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoverableFile {
    pub id: Uuid,
    pub display_name: String,
    pub extension: String,
    pub category: Category,
    pub size: u64,
    pub offset: u64,
    pub origin: Origin,
    pub original_path: Option<PathBuf>,
}

impl RecoverableFile {
    /// The `(offset, extension)` dedup key used across the catalog/carver
    /// phases. `None` for path-only hits, which dedup on path instead.
    pub fn dedup_key(&self) -> Option<(u64, String)> {
        if self.offset > 0 {
            Some((self.offset, self.extension.clone()))
        } else {
            None
        }
    }
}

/// Tagged event emitted by the coordinator. `Progress` is non-decreasing and
/// `Completed` fires exactly once, last.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ScanEvent {
    FileFound(RecoverableFile),
    Progress(f32),
    Completed,
}

/// Coordinator phase state machine (§4.11).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    Idle,
    CatalogScanning,
    CatalogComplete,
    CarverScanning,
    Complete,
}

/// A persistable snapshot of a scan in progress or finished, consumed at
/// resume time to skip the catalog phase and restart the carver mid-sweep.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub target_identity: String,
    pub declared_capacity: u64,
    pub last_scanned_offset: u64,
    pub discovered_files: Vec<RecoverableFile>,
}

impl ScanSession {
    pub fn new(target: &Target, declared_capacity: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            target_identity: target.identity(),
            declared_capacity,
            last_scanned_offset: 0,
            discovered_files: Vec::new(),
        }
    }
}
