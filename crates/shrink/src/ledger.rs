use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::config::ShrinkConfig;
use crate::encoding::{Codec, EncodeSettings};

/// Fingerprint of a file right after it was compressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub size: u64,
    pub modified_secs: u64,
    pub modified_nanos: u32,
    pub codec: Codec,
    pub crf: u8,
    pub compressed_at: DateTime<Utc>,
}

/// Record of files already compressed under one library root.
///
/// Entries are keyed by path relative to the root, so the same library
/// reached through another spelling of the root still matches.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Ledger {
    entries: BTreeMap<String, LedgerEntry>,
    #[serde(skip)]
    path: PathBuf,
    #[serde(skip)]
    root: PathBuf,
}

fn fingerprint(file: &Path) -> Result<(u64, u64, u32)> {
    let metadata = fs::metadata(file)
        .with_context(|| format!("Failed to stat file: {}", file.display()))?;
    let modified = metadata.modified()
        .with_context(|| format!("No modification time for: {}", file.display()))?
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok((metadata.len(), modified.as_secs(), modified.subsec_nanos()))
}

impl Ledger {
    /// Ledger location for a library root
    pub fn path_for_root(cfg: &ShrinkConfig, root: &Path) -> PathBuf {
        root.join(&cfg.ledger_file)
    }

    /// Load the ledger of `root`, or start an empty one if the file does not exist
    pub fn load(cfg: &ShrinkConfig, root: &Path) -> Result<Self> {
        let path = Self::path_for_root(cfg, root);
        let mut ledger = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read ledger: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse ledger: {}", path.display()))?
        } else {
            Ledger::default()
        };
        ledger.path = path;
        ledger.root = root.to_path_buf();
        Ok(ledger)
    }

    fn key(&self, file: &Path) -> String {
        let relative = file.strip_prefix(&self.root).unwrap_or(file);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, file: &Path) -> Option<&LedgerEntry> {
        self.entries.get(&self.key(file))
    }

    /// True when the file is unchanged since we compressed it
    pub fn is_compressed(&self, file: &Path) -> bool {
        let Some(entry) = self.get(file) else {
            return false;
        };
        match fingerprint(file) {
            Ok((size, secs, nanos)) => {
                entry.size == size && entry.modified_secs == secs && entry.modified_nanos == nanos
            }
            Err(_) => false,
        }
    }

    /// Remember a freshly compressed file
    pub fn record(&mut self, file: &Path, settings: &EncodeSettings) -> Result<()> {
        let (size, modified_secs, modified_nanos) = fingerprint(file)?;
        self.entries.insert(
            self.key(file),
            LedgerEntry {
                size,
                modified_secs,
                modified_nanos,
                codec: settings.codec,
                crf: settings.crf(),
                compressed_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Write via a sibling temp file and rename, so a crash never truncates it
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize ledger")?;
        let mut tmp = self.path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write ledger: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move ledger into place: {}", self.path.display()))?;
        Ok(())
    }
}
