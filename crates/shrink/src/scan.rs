use std::path::{Path, PathBuf};
use anyhow::Result;
use walkdir::WalkDir;
use crate::config::ShrinkConfig;
use crate::ledger::Ledger;
use log::{debug, info, warn};

/// Result of scanning a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// File should be processed (path, size in bytes)
    Candidate(PathBuf, u64),
    /// File is unchanged since a previous successful run
    AlreadyCompressed(PathBuf),
}

impl ScanResult {
    pub fn path(&self) -> &Path {
        match self {
            ScanResult::Candidate(p, _) | ScanResult::AlreadyCompressed(p) => p,
        }
    }
}

/// Our own working files, never treated as sources
fn is_working_file(cfg: &ShrinkConfig, path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with(cfg.temp_prefix.as_str())
        || name.ends_with(cfg.backup_suffix.as_str())
        || Path::new(name) == cfg.ledger_file.as_path()
}

/// Recursively collect media files under `root`.
///
/// Order follows the directory walk and is not guaranteed to be stable.
pub fn scan_library(cfg: &ShrinkConfig, root: &Path, ledger: Option<&Ledger>) -> Result<Vec<ScanResult>> {
    if !root.is_dir() {
        anyhow::bail!("Library root is not a directory: {}", root.display());
    }

    info!("Scanning directory: {}", root.display());

    let mut results = Vec::new();
    let mut entry_count = 0;
    let mut media_files_found = 0;

    for entry in WalkDir::new(root).follow_links(cfg.follow_links) {
        entry_count += 1;

        // Log progress every 1000 entries
        if entry_count % 1000 == 0 {
            info!("Scanned {} entries so far in {}...", entry_count, root.display());
        }

        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        if !cfg.is_media_extension(path) || is_working_file(cfg, path) {
            continue;
        }

        media_files_found += 1;

        if ledger.map_or(false, |l| l.is_compressed(path)) {
            debug!("Already compressed: {}", path.display());
            results.push(ScanResult::AlreadyCompressed(path.to_path_buf()));
            continue;
        }

        let size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("Failed to stat file {}: {}", path.display(), e);
                continue;
            }
        };

        debug!("Found candidate: {} ({} bytes)", path.display(), size);
        results.push(ScanResult::Candidate(path.to_path_buf(), size));
    }

    info!("Finished scanning {}: {} total entries, {} media files found",
          root.display(), entry_count, media_files_found);
    Ok(results)
}
