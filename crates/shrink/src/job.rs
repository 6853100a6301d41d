use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::config::ShrinkConfig;
use crate::encoding::EncodeSettings;
use crate::error::TranscodeError;

/// Lifecycle of one encode job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Probing,
    Encoding,
    Verifying,
    Replacing,
    Succeeded,
    Skipped(String),
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Skipped(_) | JobStatus::Failed(_))
    }
}

/// One file's transcode attempt, from dispatch to terminal outcome
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub id: String,
    pub source_path: PathBuf,
    /// Encoder output, next to the source so the final rename stays on one filesystem
    pub temp_output: PathBuf,
    pub settings: EncodeSettings,
    pub status: JobStatus,
    /// Media duration in seconds, when the probe succeeded
    pub duration_secs: Option<f64>,
    pub original_bytes: Option<u64>,
    pub new_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl EncodeJob {
    pub fn new(cfg: &ShrinkConfig, source_path: PathBuf, settings: EncodeSettings) -> Self {
        let temp_output = temp_output_path(cfg, &source_path);
        Self {
            id: Uuid::new_v4().to_string(),
            source_path,
            temp_output,
            settings,
            status: JobStatus::Pending,
            duration_secs: None,
            original_bytes: None,
            new_bytes: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Short id for log prefixes
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }

    /// Move to a new state, stamping start and finish times
    pub fn transition(&mut self, status: JobStatus) {
        log::debug!("Job {}: {:?} -> {:?}", self.short_id(), self.status, status);
        if self.started_at.is_none() && status != JobStatus::Pending {
            self.started_at = Some(Utc::now());
        }
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.status = status;
    }

    /// Wall-clock time spent on the job so far
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Utc::now) - start)
    }
}

/// Terminal result of `Supervisor::compress`
#[derive(Debug)]
pub enum Outcome {
    Success { original_bytes: u64, new_bytes: u64 },
    SkippedNoDuration,
    /// Not attempted; the ledger says it was compressed already
    AlreadyCompressed,
    Failed(TranscodeError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Bytes removed from the library by this job
    pub fn bytes_saved(&self) -> i64 {
        match self {
            Outcome::Success { original_bytes, new_bytes } => *original_bytes as i64 - *new_bytes as i64,
            _ => 0,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success { .. } => write!(f, "compressed"),
            Outcome::SkippedNoDuration => write!(f, "skipped (duration unknown)"),
            Outcome::AlreadyCompressed => write!(f, "skipped (already compressed)"),
            Outcome::Failed(e) => write!(f, "failed: {} ({})", e.label(), e),
        }
    }
}

/// Temporary encoder output for a source: `<dir>/<temp_prefix><file name>`
pub fn temp_output_path(cfg: &ShrinkConfig, source: &Path) -> PathBuf {
    let mut name = OsString::from(&cfg.temp_prefix);
    if let Some(file_name) = source.file_name() {
        name.push(file_name);
    }
    source.with_file_name(name)
}

/// Backup of the source during a backup swap: `<source><backup_suffix>`
pub fn backup_path(cfg: &ShrinkConfig, source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(&cfg.backup_suffix);
    PathBuf::from(name)
}

/// Suffix of the marker that flags a backup as ours while a swap is in flight
pub const BACKUP_MARKER_SUFFIX: &str = ".inflight";

/// Marker written before the source is moved to its backup: `<backup>.inflight`
pub fn backup_marker_path(cfg: &ShrinkConfig, source: &Path) -> PathBuf {
    let mut name = backup_path(cfg, source).into_os_string();
    name.push(BACKUP_MARKER_SUFFIX);
    PathBuf::from(name)
}

/// Inverse of `backup_marker_path`
pub fn source_for_marker(cfg: &ShrinkConfig, marker: &Path) -> Option<PathBuf> {
    let name = marker.file_name()?.to_str()?;
    let backup = name.strip_suffix(BACKUP_MARKER_SUFFIX)?;
    source_for_backup(cfg, &marker.with_file_name(backup))
}

/// Inverse of `temp_output_path`
pub fn source_for_temp(cfg: &ShrinkConfig, temp: &Path) -> Option<PathBuf> {
    let name = temp.file_name()?.to_str()?;
    let original = name.strip_prefix(cfg.temp_prefix.as_str())?;
    if original.is_empty() {
        return None;
    }
    Some(temp.with_file_name(original))
}

/// Inverse of `backup_path`
pub fn source_for_backup(cfg: &ShrinkConfig, backup: &Path) -> Option<PathBuf> {
    let name = backup.file_name()?.to_str()?;
    let original = name.strip_suffix(cfg.backup_suffix.as_str())?;
    if original.is_empty() {
        return None;
    }
    Some(backup.with_file_name(original))
}
