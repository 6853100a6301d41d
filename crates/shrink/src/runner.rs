use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::{info, warn};
use crate::config::ShrinkConfig;
use crate::encoding::EncodeSettings;
use crate::job::{EncodeJob, Outcome};
use crate::ledger::Ledger;
use crate::progress::ProgressSink;
use crate::recovery::{recover_library, RecoveryReport};
use crate::scan::{scan_library, ScanResult};
use crate::supervisor::Supervisor;

/// Options for one pass over a library
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub settings: EncodeSettings,
    /// Re-encode files the ledger marks as already compressed
    pub force: bool,
}

/// Totals for one pass over a library
#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_saved: i64,
    pub recovery: RecoveryReport,
    pub outcomes: Vec<(PathBuf, Outcome)>,
}

impl RunSummary {
    fn record(&mut self, path: PathBuf, outcome: Outcome) {
        match &outcome {
            Outcome::Success { .. } => self.succeeded += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::SkippedNoDuration | Outcome::AlreadyCompressed => self.skipped += 1,
        }
        self.bytes_saved += outcome.bytes_saved();
        self.outcomes.push((path, outcome));
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

/// Compress every eligible file under `root`, one at a time.
///
/// A failing file is reported and the walk moves on; only setup problems
/// (unreadable root, recovery or ledger I/O) abort the run.
pub async fn run_library<F>(
    cfg: &ShrinkConfig,
    root: &Path,
    options: RunOptions,
    progress: &dyn ProgressSink,
    mut on_outcome: F,
) -> Result<RunSummary>
where
    F: FnMut(&Path, &Outcome),
{
    let mut summary = RunSummary {
        recovery: recover_library(cfg, root)
            .with_context(|| format!("Recovery scan failed for {}", root.display()))?,
        ..Default::default()
    };

    let mut ledger = Ledger::load(cfg, root)?;
    info!("Loaded ledger {} ({} entries)", ledger.path().display(), ledger.len());

    let scan_ledger = if options.force { None } else { Some(&ledger) };
    let results = scan_library(cfg, root, scan_ledger)?;
    info!("Scan found {} media files", results.len());

    let supervisor = Supervisor::new(cfg);

    for result in results {
        let (path, outcome) = match result {
            ScanResult::AlreadyCompressed(path) => (path, Outcome::AlreadyCompressed),
            ScanResult::Candidate(path, _size) => {
                let mut job = EncodeJob::new(cfg, path.clone(), options.settings);
                let outcome = supervisor.compress(&mut job, progress).await;

                if outcome.is_success() {
                    let saved = ledger.record(&path, &options.settings)
                        .and_then(|()| ledger.save());
                    if let Err(e) = saved {
                        warn!("Failed to update ledger for {}: {:#}", path.display(), e);
                    }
                }
                (path, outcome)
            }
        };

        on_outcome(&path, &outcome);
        summary.record(path, outcome);
    }

    info!("Run complete: {} compressed, {} failed, {} skipped",
          summary.succeeded, summary.failed, summary.skipped);
    Ok(summary)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use crate::encoding::{Codec, QualityTier};
    use crate::job::{backup_marker_path, backup_path, temp_output_path};
    use crate::progress::NoProgress;

    /// Fails bad.mkv, shrinks everything else
    const FFMPEG: &str = "#!/bin/sh
for last; do :; done
for arg; do
  case \"$arg\" in
    */bad.mkv) printf 'Error: invalid data found when processing input\\n' >&2; exit 1 ;;
  esac
done
printf 'frame=1 time=00:00:02.00\\r' >&2
printf 'ok' > \"$last\"
exit 0
";

    const FFPROBE: &str = "#!/bin/sh\necho '{\"format\": {\"duration\": \"2.0\"}}'\n";

    fn setup() -> (TempDir, TempDir, ShrinkConfig) {
        let tools = TempDir::new().unwrap();
        let library = TempDir::new().unwrap();
        let ffmpeg = tools.path().join("ffmpeg");
        let ffprobe = tools.path().join("ffprobe");
        fs::write(&ffmpeg, FFMPEG).unwrap();
        fs::write(&ffprobe, FFPROBE).unwrap();
        for p in [&ffmpeg, &ffprobe] {
            fs::set_permissions(p, fs::Permissions::from_mode(0o755)).unwrap();
        }
        let cfg = ShrinkConfig {
            ffmpeg_bin: ffmpeg,
            ffprobe_bin: ffprobe,
            ..Default::default()
        };
        (tools, library, cfg)
    }

    fn options(force: bool) -> RunOptions {
        RunOptions {
            settings: EncodeSettings::new(Codec::H264, QualityTier::Balanced, false),
            force,
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_walk() {
        let (_tools, library, cfg) = setup();
        let sub = library.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(library.path().join("good.mp4"), b"original good").unwrap();
        fs::write(sub.join("bad.mkv"), b"original bad").unwrap();
        fs::write(sub.join("also-good.avi"), b"original also good").unwrap();

        let mut seen = Vec::new();
        let summary = run_library(&cfg, library.path(), options(false), &NoProgress, |p, _| {
            seen.push(p.to_path_buf())
        })
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(seen.len(), 3);
        assert_eq!(fs::read(library.path().join("good.mp4")).unwrap(), b"ok");
        assert_eq!(fs::read(sub.join("also-good.avi")).unwrap(), b"ok");
        assert_eq!(fs::read(sub.join("bad.mkv")).unwrap(), b"original bad");
        assert!(!temp_output_path(&cfg, &sub.join("bad.mkv")).exists());
        assert!(summary.bytes_saved > 0);
    }

    #[tokio::test]
    async fn test_second_run_reprocesses_nothing() {
        let (_tools, library, cfg) = setup();
        fs::write(library.path().join("a.mkv"), b"original a").unwrap();
        fs::write(library.path().join("b.mp4"), b"original b").unwrap();

        let first = run_library(&cfg, library.path(), options(false), &NoProgress, |_, _| {})
            .await
            .unwrap();
        assert_eq!(first.succeeded, 2);

        let mtime = |p: &Path| fs::metadata(p).unwrap().modified().unwrap();
        let before = (mtime(&library.path().join("a.mkv")), mtime(&library.path().join("b.mp4")));

        let second = run_library(&cfg, library.path(), options(false), &NoProgress, |_, _| {})
            .await
            .unwrap();
        assert_eq!(second.succeeded, 0);
        assert_eq!(second.skipped, 2);
        assert!(second.outcomes.iter().all(|(_, o)| matches!(o, Outcome::AlreadyCompressed)));
        let after = (mtime(&library.path().join("a.mkv")), mtime(&library.path().join("b.mp4")));
        assert_eq!(before, after);

        let forced = run_library(&cfg, library.path(), options(true), &NoProgress, |_, _| {})
            .await
            .unwrap();
        assert_eq!(forced.succeeded, 2);
    }

    #[tokio::test]
    async fn test_other_spelling_of_root_reprocesses_nothing() {
        let (_tools, library, cfg) = setup();
        let sub = library.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(library.path().join("a.mkv"), b"original a").unwrap();
        fs::write(sub.join("b.avi"), b"original b").unwrap();

        let first = run_library(&cfg, library.path(), options(false), &NoProgress, |_, _| {})
            .await
            .unwrap();
        assert_eq!(first.succeeded, 2);

        let detour = sub.join("..");
        let second = run_library(&cfg, &detour, options(false), &NoProgress, |_, _| {})
            .await
            .unwrap();
        assert_eq!(second.succeeded, 0);
        assert_eq!(second.skipped, 2);
    }

    #[tokio::test]
    async fn test_recovery_runs_before_the_walk() {
        let (_tools, library, cfg) = setup();
        let source = library.path().join("movie.mkv");
        fs::write(backup_path(&cfg, &source), b"original movie").unwrap();
        fs::write(backup_marker_path(&cfg, &source), b"").unwrap();
        fs::write(temp_output_path(&cfg, &source), b"half-written").unwrap();
        let keepsake = library.path().join("keepsake.mkv.bak");
        fs::write(&keepsake, b"user's own copy").unwrap();

        let summary = run_library(&cfg, library.path(), options(false), &NoProgress, |_, _| {})
            .await
            .unwrap();

        assert_eq!(summary.recovery.restored, vec![source.clone()]);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(fs::read(&source).unwrap(), b"ok");
        assert_eq!(fs::read(&keepsake).unwrap(), b"user's own copy");
        assert!(!library.path().join("keepsake.mkv").exists());
    }
}
