use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// What to do when the duration probe cannot read a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeFailurePolicy {
    /// Encode anyway, with an unbounded progress indicator
    Continue,
    /// Leave the file alone and report it as skipped
    Skip,
}

/// How the encoded output takes the place of the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplaceStrategy {
    /// Single rename of the temp output over the source
    Rename,
    /// Source -> backup, temp -> source, delete backup
    Backup,
}

/// Configuration for the library compressor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShrinkConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// File extensions (lowercase, no dot) considered media
    pub extensions: Vec<String>,
    /// Prefix of the temporary output written next to each source
    pub temp_prefix: String,
    /// Suffix appended to the source while a backup swap is in flight
    pub backup_suffix: String,
    /// Forward progress (seconds of media) needed for one progress tick
    pub tick_threshold_secs: f64,
    /// Seconds without forward progress before the encoder is killed
    pub stall_timeout_secs: f64,
    /// Interval between encoder progress reports (passed as -stats_period)
    pub stats_period_secs: f64,
    /// Capacity of the event queue between the stderr reader and the supervisor
    pub event_queue_capacity: usize,
    pub probe_failure: ProbeFailurePolicy,
    pub replace_strategy: ReplaceStrategy,
    /// Reject outputs larger than this fraction of the original (e.g. 0.95)
    pub max_size_ratio: Option<f64>,
    /// Carry subtitle streams over unmodified
    pub copy_subtitles: bool,
    /// Follow symlinks while walking the library
    pub follow_links: bool,
    /// Ledger of already-compressed files, relative to the library root
    pub ledger_file: PathBuf,
}

impl Default for ShrinkConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ShrinkConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            extensions: vec!["mp4".to_string(), "mkv".to_string(), "avi".to_string()],
            temp_prefix: "temp_compressed_".to_string(),
            backup_suffix: ".bak".to_string(),
            tick_threshold_secs: 1.0,
            stall_timeout_secs: 15.0,
            stats_period_secs: 1.0,
            event_queue_capacity: 64,
            probe_failure: ProbeFailurePolicy::Continue,
            replace_strategy: ReplaceStrategy::Rename,
            max_size_ratio: None,
            copy_subtitles: true,
            follow_links: false,
            ledger_file: PathBuf::from(".shrink-ledger.json"),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the stall heuristic or the walker misbehave
    pub fn validate(&self) -> Result<()> {
        if self.tick_threshold_secs <= 0.0 {
            anyhow::bail!("tick_threshold_secs must be > 0 (got {})", self.tick_threshold_secs);
        }
        if self.stall_timeout_secs <= 0.0 {
            anyhow::bail!("stall_timeout_secs must be > 0 (got {})", self.stall_timeout_secs);
        }
        if self.stats_period_secs <= 0.0 {
            anyhow::bail!("stats_period_secs must be > 0 (got {})", self.stats_period_secs);
        }
        if self.event_queue_capacity == 0 {
            anyhow::bail!("event_queue_capacity must be at least 1");
        }
        if self.temp_prefix.is_empty() || self.backup_suffix.is_empty() {
            anyhow::bail!("temp_prefix and backup_suffix must not be empty");
        }
        if let Some(ratio) = self.max_size_ratio {
            if ratio <= 0.0 {
                anyhow::bail!("max_size_ratio must be > 0 (got {})", ratio);
            }
        }
        Ok(())
    }

    /// Whether a path has one of the configured media extensions
    pub fn is_media_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = ShrinkConfig::load_config(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(cfg.stall_timeout_secs, 15.0);
        assert_eq!(cfg.replace_strategy, ReplaceStrategy::Rename);
        assert_eq!(cfg.probe_failure, ProbeFailurePolicy::Continue);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shrink.toml");
        std::fs::write(
            &path,
            "stall_timeout_secs = 30.0\nreplace_strategy = \"backup\"\nprobe_failure = \"skip\"\n",
        )
        .unwrap();

        let cfg = ShrinkConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.stall_timeout_secs, 30.0);
        assert_eq!(cfg.replace_strategy, ReplaceStrategy::Backup);
        assert_eq!(cfg.probe_failure, ProbeFailurePolicy::Skip);
        assert_eq!(cfg.temp_prefix, "temp_compressed_");
    }

    #[test]
    fn test_json_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shrink.json");
        std::fs::write(&path, r#"{"max_size_ratio": 0.9, "extensions": ["mkv"]}"#).unwrap();

        let cfg = ShrinkConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.max_size_ratio, Some(0.9));
        assert!(cfg.is_media_extension(Path::new("/a/b.MKV")));
        assert!(!cfg.is_media_extension(Path::new("/a/b.mp4")));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "stall_timeout_secs = 0.0\n").unwrap();
        assert!(ShrinkConfig::load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_media_extension_matching() {
        let cfg = ShrinkConfig::default_config();
        assert!(cfg.is_media_extension(Path::new("movie.mp4")));
        assert!(cfg.is_media_extension(Path::new("movie.AVI")));
        assert!(!cfg.is_media_extension(Path::new("movie.mov")));
        assert!(!cfg.is_media_extension(Path::new("movie")));
    }
}
