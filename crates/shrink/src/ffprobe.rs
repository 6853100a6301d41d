use std::path::Path;
use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use crate::config::ShrinkConfig;
use crate::error::TranscodeError;

/// The slice of ffprobe's JSON output we consume
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    /// ffprobe reports durations as decimal strings
    pub duration: Option<String>,
}

impl FFProbeData {
    /// Total duration in seconds, if present and meaningful
    pub fn duration_secs(&self) -> Result<f64> {
        let raw = self.format.duration
            .as_deref()
            .context("ffprobe output has no format.duration")?;
        let secs: f64 = raw.trim()
            .parse()
            .with_context(|| format!("Invalid duration value: {:?}", raw))?;
        if !secs.is_finite() || secs <= 0.0 {
            anyhow::bail!("Duration is not a positive number: {}", secs);
        }
        Ok(secs)
    }
}

fn parse_probe_output(json_str: &str) -> Result<FFProbeData> {
    serde_json::from_str(json_str).context("Failed to parse ffprobe JSON")
}

/// Run ffprobe and parse the JSON output
pub async fn probe_file(cfg: &ShrinkConfig, file_path: &Path) -> Result<FFProbeData> {
    use log::debug;

    if !file_path.exists() {
        anyhow::bail!("File does not exist: {}", file_path.display());
    }

    debug!("ffprobe: probing {}", file_path.display());

    let output = Command::new(&cfg.ffprobe_bin)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg(file_path)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .with_context(|| format!("Failed to execute ffprobe for: {}", file_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "ffprobe failed (exit code {}) for {}: {}",
            output.status.code().unwrap_or(-1),
            file_path.display(),
            stderr.trim()
        );
    }

    let json_str = String::from_utf8(output.stdout)
        .context("ffprobe output is not valid UTF-8")?;

    parse_probe_output(&json_str)
        .with_context(|| format!("Invalid ffprobe output for: {}", file_path.display()))
}

/// Query the media duration in seconds.
///
/// Every failure (spawn, exit code, JSON, missing or bogus field) comes back
/// as `ProbeFailure`; callers decide whether that matters.
pub async fn probe_duration(cfg: &ShrinkConfig, file_path: &Path) -> Result<f64, TranscodeError> {
    let to_failure = |e: anyhow::Error| TranscodeError::ProbeFailure {
        path: file_path.to_path_buf(),
        message: format!("{:#}", e),
    };

    let data = probe_file(cfg, file_path).await.map_err(to_failure)?;
    data.duration_secs().map_err(to_failure)
}
