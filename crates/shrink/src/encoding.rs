use std::fmt;
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::config::ShrinkConfig;

/// Video codec family chosen by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// H.265/HEVC: smaller files, slower encode
    H265,
    /// H.264/AVC: larger files, faster encode
    H264,
}

/// Quality tier, mapped to a fixed CRF per codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    /// Higher CRF, smaller file
    Low,
    Balanced,
    /// Lower CRF, larger file
    High,
}

impl Codec {
    /// FFmpeg encoder name for this codec with or without NVENC
    pub fn encoder_name(&self, use_gpu: bool) -> &'static str {
        match (self, use_gpu) {
            (Codec::H265, false) => "libx265",
            (Codec::H265, true) => "hevc_nvenc",
            (Codec::H264, false) => "libx264",
            (Codec::H264, true) => "h264_nvenc",
        }
    }

    /// Constant rate factor for a quality tier
    pub fn crf(&self, tier: QualityTier) -> u8 {
        match (self, tier) {
            (Codec::H265, QualityTier::Low) => 29,
            (Codec::H265, QualityTier::Balanced) => 20,
            (Codec::H265, QualityTier::High) => 15,
            (Codec::H264, QualityTier::Low) => 25,
            (Codec::H264, QualityTier::Balanced) => 19,
            (Codec::H264, QualityTier::High) => 12,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::H265 => write!(f, "H.265"),
            Codec::H264 => write!(f, "H.264"),
        }
    }
}

/// Template shared by every job of a run: codec, quality and acceleration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeSettings {
    pub codec: Codec,
    pub quality: QualityTier,
    pub use_gpu: bool,
}

impl EncodeSettings {
    pub fn new(codec: Codec, quality: QualityTier, use_gpu: bool) -> Self {
        Self { codec, quality, use_gpu }
    }

    pub fn encoder_name(&self) -> &'static str {
        self.codec.encoder_name(self.use_gpu)
    }

    pub fn crf(&self) -> u8 {
        self.codec.crf(self.quality)
    }
}

/// Command builder for generating FFmpeg command lines
pub struct CommandBuilder<'a> {
    cfg: &'a ShrinkConfig,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(cfg: &'a ShrinkConfig) -> Self {
        CommandBuilder { cfg }
    }

    /// Build the full encode command
    ///
    /// Generates FFmpeg arguments with:
    /// - Verbose progress reports on stderr at a fixed period
    /// - First video stream, all audio (and optionally subtitle) streams
    /// - Container metadata carried over from the input
    /// - Encoder-specific quality flag
    /// - Audio/subtitle stream copying
    pub fn build_encode_command(
        &self,
        input: &Path,
        output: &Path,
        settings: &EncodeSettings,
    ) -> Vec<String> {
        let mut args = Vec::new();

        // Quiet banner, never read stdin, overwrite a stale temp file
        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());
        args.push("-y".to_string());

        // Progress reports go to stderr, one per stats period
        args.push("-loglevel".to_string());
        args.push("info".to_string());
        args.push("-stats".to_string());
        args.push("-stats_period".to_string());
        args.push(self.cfg.stats_period_secs.to_string());

        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());

        // -map 0:v:0 = first video stream
        // -map 0:a? = all audio streams (? makes it optional)
        args.push("-map".to_string());
        args.push("0:v:0".to_string());
        args.push("-map".to_string());
        args.push("0:a?".to_string());
        if self.cfg.copy_subtitles {
            args.push("-map".to_string());
            args.push("0:s?".to_string());
        }

        args.push("-map_metadata".to_string());
        args.push("0".to_string());

        args.push("-c:v".to_string());
        args.push(settings.encoder_name().to_string());

        let crf = settings.crf().to_string();
        if settings.use_gpu {
            // NVENC has no CRF mode; constant quality under VBR is the equivalent
            args.push("-rc".to_string());
            args.push("vbr".to_string());
            args.push("-cq".to_string());
            args.push(crf);
        } else {
            args.push("-crf".to_string());
            args.push(crf);
        }

        // Audio is never re-encoded
        args.push("-c:a".to_string());
        args.push("copy".to_string());

        if self.cfg.copy_subtitles {
            args.push("-c:s".to_string());
            args.push("copy".to_string());
        }

        args.push(output.to_string_lossy().to_string());

        args
    }
}
