use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use shrink::{
    run_library, Codec, EncodeSettings, Outcome, ProgressSink, QualityTier, RunOptions,
    ShrinkConfig, Toolchain,
};
use std::cell::{Cell, RefCell};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Compress every video in a media library in place
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Media library folder (prompted for when omitted)
    directory: Option<PathBuf>,

    /// Video codec (prompted for when omitted)
    #[arg(long, value_enum)]
    codec: Option<CodecArg>,

    /// Quality tier (prompted for when omitted)
    #[arg(long, value_enum)]
    quality: Option<QualityArg>,

    /// Encode on the GPU with NVENC
    #[arg(long, conflicts_with = "no_gpu")]
    gpu: bool,

    /// Encode on the CPU without asking
    #[arg(long)]
    no_gpu: bool,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Re-encode files already recorded as compressed
    #[arg(long)]
    force: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CodecArg {
    H265,
    H264,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum QualityArg {
    Low,
    Balanced,
    High,
}

impl From<CodecArg> for Codec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::H265 => Codec::H265,
            CodecArg::H264 => Codec::H264,
        }
    }
}

impl From<QualityArg> for QualityTier {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::Low => QualityTier::Low,
            QualityArg::Balanced => QualityTier::Balanced,
            QualityArg::High => QualityTier::High,
        }
    }
}

/// Print a prompt and read one trimmed line from stdin
fn ask(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn prompt_codec() -> Result<Codec> {
    println!("Choose the compression type:");
    println!("1. H.265/HEVC (higher compression rate, slower encoding, smaller file size)");
    println!("2. H.264/AVC (lower compression rate, faster encoding, larger file size)");
    match ask("Enter the number corresponding to your choice: ")?.as_str() {
        "1" => Ok(Codec::H265),
        "2" => Ok(Codec::H264),
        _ => bail!("Invalid choice."),
    }
}

fn prompt_quality(codec: Codec) -> Result<QualityTier> {
    println!("\nChoose the quality (CRF) option:");
    for (i, tier, blurb) in [
        (1, QualityTier::Low, "Lower quality (higher CRF, smaller file)"),
        (2, QualityTier::Balanced, "Optimal quality (balanced CRF, medium file)"),
        (3, QualityTier::High, "Higher quality (lower CRF, larger file)"),
    ] {
        println!("{}. {} [crf {}]", i, blurb, codec.crf(tier));
    }
    match ask("Enter the number corresponding to your choice: ")?.as_str() {
        "1" => Ok(QualityTier::Low),
        "2" => Ok(QualityTier::Balanced),
        "3" => Ok(QualityTier::High),
        _ => bail!("Invalid choice."),
    }
}

fn prompt_directory() -> Result<PathBuf> {
    let answer = ask("\nEnter the path of the media library folder: ")?;
    Ok(PathBuf::from(answer))
}

fn prompt_gpu() -> Result<bool> {
    let answer = ask("Do you want to use GPU acceleration for compression? (yes/no): ")?;
    Ok(answer.eq_ignore_ascii_case("yes") || answer.eq_ignore_ascii_case("y"))
}

/// Progress bar for the file being encoded; a spinner when the duration is unknown
#[derive(Default)]
struct TerminalProgress {
    bar: RefCell<Option<ProgressBar>>,
    label: RefCell<String>,
    encoded_secs: Cell<f64>,
}

impl ProgressSink for TerminalProgress {
    fn begin(&self, label: &str, total_secs: Option<f64>) {
        let bar = match total_secs {
            Some(total) => {
                let bar = ProgressBar::new((total * 1000.0).round() as u64);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% ETA {eta}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
                );
                bar.set_message(format!("Compressing {}", label));
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{spinner} {msg} [{elapsed_precise}]")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar.enable_steady_tick(Duration::from_millis(120));
                bar.set_message(format!("Compressing {} (duration unknown)", label));
                bar
            }
        };
        *self.label.borrow_mut() = label.to_string();
        self.encoded_secs.set(0.0);
        *self.bar.borrow_mut() = Some(bar);
    }

    fn advance(&self, secs: f64) {
        let encoded = self.encoded_secs.get() + secs;
        self.encoded_secs.set(encoded);
        if let Some(bar) = self.bar.borrow().as_ref() {
            if bar.length().is_some() {
                bar.inc((secs * 1000.0).round() as u64);
            } else {
                bar.set_message(format!("Compressing {}: {:.0}s encoded", self.label.borrow(), encoded));
            }
        }
    }

    fn finish(&self) {
        if let Some(bar) = self.bar.borrow_mut().take() {
            bar.finish_and_clear();
        }
    }
}

fn signed_size(bytes: i64) -> String {
    if bytes < 0 {
        format!("-{}", format_size(bytes.unsigned_abs(), DECIMAL))
    } else {
        format_size(bytes as u64, DECIMAL)
    }
}

fn status_line(path: &Path, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success { original_bytes, new_bytes } => format!(
            "✅ {}: compressed {} -> {} (saved {})",
            path.display(),
            format_size(*original_bytes, DECIMAL),
            format_size(*new_bytes, DECIMAL),
            signed_size(outcome.bytes_saved()),
        ),
        Outcome::Failed(_) => format!("❌ {}: {}", path.display(), outcome),
        Outcome::SkippedNoDuration | Outcome::AlreadyCompressed => {
            format!("⏭️  {}: {}", path.display(), outcome)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let cfg = ShrinkConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    let interactive = args.codec.is_none() || args.quality.is_none() || args.directory.is_none();

    let codec = match args.codec {
        Some(c) => c.into(),
        None => prompt_codec()?,
    };
    let quality = match args.quality {
        Some(q) => q.into(),
        None => prompt_quality(codec)?,
    };
    let directory = match args.directory {
        Some(d) => d,
        None => prompt_directory()?,
    };
    let use_gpu = if args.gpu {
        true
    } else if args.no_gpu || !interactive {
        false
    } else {
        prompt_gpu()?
    };

    if !directory.is_dir() {
        bail!("Directory '{}' does not exist. Please check the path and try again.", directory.display());
    }

    let settings = EncodeSettings::new(codec, quality, use_gpu);

    // Preflight: fail before touching any file
    let tools = Toolchain::discover(&cfg)?;
    let cfg = tools.apply(&cfg);
    tools.ensure_encoder(settings.encoder_name()).await?;

    info!("Library: {}", directory.display());
    info!("Codec: {} via {} (crf {})", codec, settings.encoder_name(), settings.crf());
    info!("Replace strategy: {:?}, probe failure policy: {:?}", cfg.replace_strategy, cfg.probe_failure);

    let progress = TerminalProgress::default();
    let options = RunOptions { settings, force: args.force };

    let summary = run_library(&cfg, &directory, options, &progress, |path, outcome| {
        println!("{}", status_line(path, outcome));
    })
    .await?;

    if !summary.recovery.is_clean() {
        warn!(
            "Recovered from an interrupted run: {} restored, {} backups and {} temp files removed, {} left for review",
            summary.recovery.restored.len(),
            summary.recovery.backups_removed.len(),
            summary.recovery.temps_removed.len(),
            summary.recovery.unresolved.len(),
        );
    }

    println!(
        "\nAll {} files have been processed: {} compressed, {} failed, {} skipped. Saved {}.",
        summary.total(),
        summary.succeeded,
        summary.failed,
        summary.skipped,
        signed_size(summary.bytes_saved),
    );

    Ok(())
}
