use std::fs;
use std::path::Path;
use log::{info, warn};
use crate::config::{ReplaceStrategy, ShrinkConfig};
use crate::error::TranscodeError;
use crate::job::{backup_marker_path, backup_path};

/// Put the verified temp output in place of the source.
///
/// On error the source is either untouched or has been restored from its
/// backup; the temp file is left for the caller to remove.
pub fn replace_source(cfg: &ShrinkConfig, source: &Path, temp_output: &Path) -> Result<(), TranscodeError> {
    if !source.exists() {
        return Err(TranscodeError::ReplaceFailure {
            path: source.to_path_buf(),
            message: "original file no longer exists".to_string(),
        });
    }

    match cfg.replace_strategy {
        ReplaceStrategy::Rename => rename_over(source, temp_output),
        ReplaceStrategy::Backup => swap_with_backup(cfg, source, temp_output),
    }
}

/// Single rename; replaces the destination atomically on one filesystem
fn rename_over(source: &Path, temp_output: &Path) -> Result<(), TranscodeError> {
    fs::rename(temp_output, source).map_err(|e| TranscodeError::ReplaceFailure {
        path: source.to_path_buf(),
        message: format!("rename {} -> {}: {}", temp_output.display(), source.display(), e),
    })
}

/// Source -> backup, temp -> source, delete backup.
///
/// A marker next to the backup exists for the whole swap; recovery only
/// touches backups that carry one.
fn swap_with_backup(cfg: &ShrinkConfig, source: &Path, temp_output: &Path) -> Result<(), TranscodeError> {
    let backup = backup_path(cfg, source);
    let marker = backup_marker_path(cfg, source);

    if backup.exists() {
        return Err(TranscodeError::ReplaceFailure {
            path: source.to_path_buf(),
            message: format!("backup already exists: {}", backup.display()),
        });
    }

    fs::write(&marker, temp_output.to_string_lossy().as_bytes()).map_err(|e| TranscodeError::ReplaceFailure {
        path: source.to_path_buf(),
        message: format!("failed to write marker {}: {}", marker.display(), e),
    })?;

    if let Err(e) = fs::rename(source, &backup) {
        remove_marker(&marker);
        return Err(TranscodeError::ReplaceFailure {
            path: source.to_path_buf(),
            message: format!("failed to back up original to {}: {}", backup.display(), e),
        });
    }

    if let Err(e) = fs::rename(temp_output, source) {
        // Put the original back before reporting
        match fs::rename(&backup, source) {
            Ok(()) => remove_marker(&marker),
            Err(restore_err) => warn!(
                "Failed to restore {} from {}: {} (recovery scan will retry)",
                source.display(),
                backup.display(),
                restore_err
            ),
        }
        return Err(TranscodeError::ReplaceFailure {
            path: source.to_path_buf(),
            message: format!("failed to move {} into place: {}", temp_output.display(), e),
        });
    }

    // The new file is in place; a leftover backup keeps its marker for the next recovery scan
    match fs::remove_file(&backup) {
        Ok(()) => {
            info!("🗑️  Deleted backup file: {}", backup.display());
            remove_marker(&marker);
        }
        Err(e) => warn!("Failed to delete backup {}: {}", backup.display(), e),
    }

    Ok(())
}

fn remove_marker(marker: &Path) {
    if let Err(e) = fs::remove_file(marker) {
        warn!("Failed to delete marker {}: {}", marker.display(), e);
    }
}
