use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use walkdir::WalkDir;
use crate::config::ShrinkConfig;
use crate::job::{backup_path, source_for_marker, source_for_temp, temp_output_path};

/// What the startup recovery scan changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Sources brought back from a backup
    pub restored: Vec<PathBuf>,
    /// Backups deleted because the swap had completed
    pub backups_removed: Vec<PathBuf>,
    /// Temp outputs of interrupted encodes that were deleted
    pub temps_removed: Vec<PathBuf>,
    /// Temp outputs with neither source nor backup; left alone
    pub unresolved: Vec<PathBuf>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.restored.is_empty()
            && self.backups_removed.is_empty()
            && self.temps_removed.is_empty()
            && self.unresolved.is_empty()
    }
}

/// Reconcile leftovers of interrupted jobs under `root` before a run.
///
/// Backups are only considered when their in-flight marker is present;
/// any other `.bak` file belongs to the user and is never touched.
///
/// - marked backup, no source: restore the backup, drop the matching temp
/// - marked backup and source: the swap finished, drop the backup
/// - marker without backup: drop the marker
/// - temp and source: an encode was interrupted, drop the temp
/// - temp alone: leave it and warn
pub fn recover_library(cfg: &ShrinkConfig, root: &Path) -> Result<RecoveryReport> {
    info!("🔍 Checking {} for leftovers of interrupted jobs...", root.display());

    let mut markers = Vec::new();
    let mut temps = Vec::new();

    for entry in WalkDir::new(root).follow_links(cfg.follow_links) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();

        if let Some(source) = source_for_marker(cfg, path) {
            if cfg.is_media_extension(&source) {
                markers.push((path.to_path_buf(), source));
                continue;
            }
        }
        if let Some(source) = source_for_temp(cfg, path) {
            if cfg.is_media_extension(&source) {
                temps.push((path.to_path_buf(), source));
            }
        }
    }

    let mut report = RecoveryReport::default();

    // Backups first: restoring one may turn a lone temp into an interrupted encode
    for (marker, source) in markers {
        let backup = backup_path(cfg, &source);
        if !backup.exists() {
            debug!("Marker without backup, swap never started or already finished: {}", marker.display());
        } else if !source.exists() {
            fs::rename(&backup, &source)
                .with_context(|| format!("Failed to restore backup: {} -> {}",
                    backup.display(), source.display()))?;
            info!("🔄 Restored original from backup: {}", source.display());
            report.restored.push(source.clone());

            let temp = temp_output_path(cfg, &source);
            if temp.exists() {
                fs::remove_file(&temp)
                    .with_context(|| format!("Failed to delete temp file: {}", temp.display()))?;
                info!("🗑️  Deleted temp file: {}", temp.display());
                report.temps_removed.push(temp);
            }
        } else {
            fs::remove_file(&backup)
                .with_context(|| format!("Failed to delete backup file: {}", backup.display()))?;
            info!("🗑️  Deleted backup file (original exists): {}", backup.display());
            report.backups_removed.push(backup);
        }

        fs::remove_file(&marker)
            .with_context(|| format!("Failed to delete marker: {}", marker.display()))?;
    }

    for (temp, source) in temps {
        if !temp.exists() {
            // Already handled alongside its backup
            continue;
        }
        if source.exists() {
            fs::remove_file(&temp)
                .with_context(|| format!("Failed to delete temp file: {}", temp.display()))?;
            info!("🗑️  Deleted orphaned temp file: {}", temp.display());
            report.temps_removed.push(temp);
        } else {
            warn!("⚠️  Temp file without original or backup, leaving it: {}", temp.display());
            report.unresolved.push(temp);
        }
    }

    if report.is_clean() {
        debug!("No leftovers under {}", root.display());
    }

    Ok(report)
}
