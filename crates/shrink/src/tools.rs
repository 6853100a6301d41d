use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use log::info;
use tokio::process::Command;
use crate::config::ShrinkConfig;

/// Resolved external binaries, checked before any file is touched
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
}

/// Use the configured path if it exists, otherwise search PATH
fn resolve(name: &str, configured: &Path) -> Result<PathBuf> {
    if configured.components().count() > 1 || configured.is_absolute() {
        if configured.exists() {
            return Ok(configured.to_path_buf());
        }
    }
    which::which(configured)
        .or_else(|_| which::which(name))
        .map_err(|_| anyhow!(
            "{} not found (looked for {}). Install FFmpeg (e.g. `apt install ffmpeg`, \
             `brew install ffmpeg`) or set `{}_bin` in the config file.",
            name, configured.display(), name
        ))
}

impl Toolchain {
    /// Locate ffmpeg and ffprobe, failing fast with an actionable message
    pub fn discover(cfg: &ShrinkConfig) -> Result<Self> {
        let ffmpeg_bin = resolve("ffmpeg", &cfg.ffmpeg_bin)?;
        let ffprobe_bin = resolve("ffprobe", &cfg.ffprobe_bin)?;

        info!("Using ffmpeg at {}", ffmpeg_bin.display());
        info!("Using ffprobe at {}", ffprobe_bin.display());

        Ok(Self { ffmpeg_bin, ffprobe_bin })
    }

    /// Config with the resolved binaries filled in
    pub fn apply(&self, cfg: &ShrinkConfig) -> ShrinkConfig {
        ShrinkConfig {
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            ffprobe_bin: self.ffprobe_bin.clone(),
            ..cfg.clone()
        }
    }

    /// Check that this ffmpeg build ships the requested video encoder
    pub async fn ensure_encoder(&self, encoder: &str) -> Result<()> {
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-hide_banner")
            .arg("-encoders")
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to query FFmpeg encoders at: {}", self.ffmpeg_bin.display()))?;

        if !output.status.success() {
            return Err(anyhow!("FFmpeg encoder query failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if has_encoder(&stdout, encoder) {
            info!("🎬 Encoder available: {}", encoder);
            Ok(())
        } else {
            Err(anyhow!(
                "Encoder {} is not available in {}. Pick another codec, disable GPU \
                 acceleration, or install an FFmpeg build with {} enabled.",
                encoder, self.ffmpeg_bin.display(), encoder
            ))
        }
    }
}

/// Match an encoder name as a whole word in `ffmpeg -encoders` output
fn has_encoder(listing: &str, encoder: &str) -> bool {
    listing.lines()
        .any(|line| line.split_whitespace().nth(1) == Some(encoder))
}
