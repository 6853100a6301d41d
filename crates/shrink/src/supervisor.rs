use std::fs;
use std::process::Stdio;
use log::{debug, error, info, warn};
use tokio::process::Command;
use crate::config::{ProbeFailurePolicy, ShrinkConfig};
use crate::encoding::CommandBuilder;
use crate::error::TranscodeError;
use crate::ffprobe;
use crate::job::{EncodeJob, JobStatus, Outcome};
use crate::progress::{spawn_event_reader, ProgressEvent, ProgressParser, ProgressSink};
use crate::replace::replace_source;

/// Drives one encode job from probe to replace.
///
/// Every path that does not end in `Outcome::Success` leaves the source as it
/// was and removes the temp output.
pub struct Supervisor<'a> {
    cfg: &'a ShrinkConfig,
}

impl<'a> Supervisor<'a> {
    pub fn new(cfg: &'a ShrinkConfig) -> Self {
        Supervisor { cfg }
    }

    pub async fn compress(&self, job: &mut EncodeJob, progress: &dyn ProgressSink) -> Outcome {
        info!("Job {}: compressing {} with {} (crf {})",
              job.short_id(), job.source_path.display(),
              job.settings.encoder_name(), job.settings.crf());

        match fs::metadata(&job.source_path) {
            Ok(meta) => job.original_bytes = Some(meta.len()),
            Err(e) => {
                error!("Job {}: cannot stat source {}: {}", job.short_id(), job.source_path.display(), e);
                job.transition(JobStatus::Failed("source unreadable".to_string()));
                return Outcome::Failed(TranscodeError::Io(e));
            }
        }

        job.transition(JobStatus::Probing);
        let duration = match ffprobe::probe_duration(self.cfg, &job.source_path).await {
            Ok(secs) => {
                debug!("Job {}: duration {:.1}s", job.short_id(), secs);
                Some(secs)
            }
            Err(e) => match self.cfg.probe_failure {
                ProbeFailurePolicy::Skip => {
                    warn!("Job {}: {}; skipping file", job.short_id(), e);
                    job.transition(JobStatus::Skipped("duration unknown".to_string()));
                    return Outcome::SkippedNoDuration;
                }
                ProbeFailurePolicy::Continue => {
                    warn!("Job {}: {}; continuing without a progress total", job.short_id(), e);
                    None
                }
            },
        };
        job.duration_secs = duration;

        let encoded = self.encode(job, duration, progress).await;
        progress.finish();

        match encoded.and_then(|()| self.finalize(job)) {
            Ok(new_bytes) => {
                job.new_bytes = Some(new_bytes);
                job.transition(JobStatus::Succeeded);
                let original_bytes = job.original_bytes.unwrap_or(0);
                info!("Job {}: ✅ replaced {} ({} -> {} bytes)",
                      job.short_id(), job.source_path.display(), original_bytes, new_bytes);
                Outcome::Success { original_bytes, new_bytes }
            }
            Err(e) => {
                self.discard_temp(job);
                error!("Job {}: ❌ {}", job.short_id(), e);
                job.transition(JobStatus::Failed(e.label().to_string()));
                Outcome::Failed(e)
            }
        }
    }

    /// Run the encoder until it exits or the event stream reports a fault
    async fn encode(
        &self,
        job: &mut EncodeJob,
        duration: Option<f64>,
        progress: &dyn ProgressSink,
    ) -> Result<(), TranscodeError> {
        job.transition(JobStatus::Encoding);

        let args = CommandBuilder::new(self.cfg)
            .build_encode_command(&job.source_path, &job.temp_output, &job.settings);
        debug!("Job {}: {} {}", job.short_id(), self.cfg.ffmpeg_bin.display(), args.join(" "));

        let mut child = Command::new(&self.cfg.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: self.cfg.ffmpeg_bin.clone(),
                source,
            })?;

        let stderr = child.stderr.take().ok_or_else(|| {
            TranscodeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "encoder stderr was not captured",
            ))
        })?;

        let (mut events, reader) = spawn_event_reader(
            stderr,
            ProgressParser::from_config(self.cfg),
            self.cfg.event_queue_capacity,
        );

        progress.begin(&job.file_name(), duration);

        let mut fault = None;
        while let Some(event) = events.recv().await {
            match event {
                ProgressEvent::Tick(secs) => progress.advance(secs),
                ProgressEvent::ErrorDetected(line) => {
                    fault = Some(TranscodeError::StreamError(line));
                    break;
                }
                ProgressEvent::StallDetected { stalled_secs } => {
                    fault = Some(TranscodeError::StallTimeout { stalled_secs });
                    break;
                }
                ProgressEvent::StreamEnded => break,
            }
        }

        if let Some(fault) = fault {
            warn!("Job {}: {}; stopping encoder", job.short_id(), fault);
            drop(events);
            reader.abort();
            if let Err(e) = child.kill().await {
                warn!("Job {}: failed to kill encoder: {}", job.short_id(), e);
            }
            return Err(fault);
        }

        if let Err(e) = reader.await {
            warn!("Job {}: diagnostic reader ended abnormally: {}", job.short_id(), e);
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(TranscodeError::NonZeroExit(status.code()));
        }

        Ok(())
    }

    /// Check the output and swap it in; returns the new size
    fn finalize(&self, job: &mut EncodeJob) -> Result<u64, TranscodeError> {
        job.transition(JobStatus::Verifying);

        // An empty file is as good as none
        let new_bytes = match fs::metadata(&job.temp_output) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            _ => return Err(TranscodeError::OutputMissing(job.temp_output.clone())),
        };

        if let (Some(ratio), Some(original_bytes)) = (self.cfg.max_size_ratio, job.original_bytes) {
            if new_bytes as f64 > original_bytes as f64 * ratio {
                return Err(TranscodeError::OutputTooLarge {
                    new_bytes,
                    original_bytes,
                    max_ratio: ratio,
                });
            }
        }

        job.transition(JobStatus::Replacing);
        replace_source(self.cfg, &job.source_path, &job.temp_output)?;
        Ok(new_bytes)
    }

    fn discard_temp(&self, job: &EncodeJob) {
        if job.temp_output.exists() {
            match fs::remove_file(&job.temp_output) {
                Ok(()) => debug!("Job {}: 🗑️  deleted temp file {}", job.short_id(), job.temp_output.display()),
                Err(e) => warn!("Job {}: failed to delete temp file {}: {}",
                                job.short_id(), job.temp_output.display(), e),
            }
        }
    }
}
