//! Encoder diagnostic stream handling.
//!
//! FFmpeg's stderr is a line-oriented telemetry channel. `ProgressParser`
//! turns it into typed events; `spawn_event_reader` runs the parser on a
//! dedicated task and hands events to the supervisor over a bounded queue.

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use crate::config::ShrinkConfig;

/// Marker preceding the elapsed media time in FFmpeg stats reports
const TIME_MARKER: &str = "time=";

/// Marker (case-insensitive) that makes any non-progress line fatal
const ERROR_MARKER: &str = "error";

/// Longest line kept before it is flushed regardless of terminators
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Typed events derived from the diagnostic stream
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Forward progress of at least one tick threshold, in seconds of media
    Tick(f64),
    /// A diagnostic line carried the error marker
    ErrorDetected(String),
    /// The stall accumulator reached the timeout
    StallDetected { stalled_secs: f64 },
    /// The stream closed
    StreamEnded,
}

impl ProgressEvent {
    /// Error and stall end the job; nothing follows them
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProgressEvent::ErrorDetected(_) | ProgressEvent::StallDetected { .. })
    }
}

/// Running totals for one encode job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressState {
    /// Elapsed time at the last emitted tick
    pub last_elapsed: f64,
    /// Elapsed time of the most recent report, ticked or not
    pub last_report: Option<f64>,
    /// Seconds spent without the timestamp moving since the last tick
    pub stalled_secs: f64,
}

/// Line-by-line state machine over FFmpeg's stderr
#[derive(Debug, Clone)]
pub struct ProgressParser {
    tick_threshold: f64,
    stall_timeout: f64,
    report_period: f64,
    state: ProgressState,
    halted: bool,
}

impl ProgressParser {
    /// `report_period` is the wall-clock time one stats report stands for
    pub fn new(tick_threshold: f64, stall_timeout: f64, report_period: f64) -> Self {
        Self {
            tick_threshold,
            stall_timeout,
            report_period,
            state: ProgressState::default(),
            halted: false,
        }
    }

    pub fn from_config(cfg: &ShrinkConfig) -> Self {
        Self::new(cfg.tick_threshold_secs, cfg.stall_timeout_secs, cfg.stats_period_secs)
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// True once an error or stall has been emitted
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Consume one diagnostic line
    pub fn feed(&mut self, line: &str) -> Option<ProgressEvent> {
        if self.halted {
            return None;
        }

        if let Some(token) = time_token(line) {
            // time=N/A and friends carry no information
            let elapsed = parse_timestamp(token)?;
            return self.observe(elapsed);
        }

        if line.to_ascii_lowercase().contains(ERROR_MARKER) {
            self.halted = true;
            return Some(ProgressEvent::ErrorDetected(line.trim().to_string()));
        }

        None
    }

    fn observe(&mut self, elapsed: f64) -> Option<ProgressEvent> {
        let delta = elapsed - self.state.last_elapsed;
        let advanced = self.state.last_report.map_or(true, |prev| elapsed > prev);
        self.state.last_report = Some(elapsed);

        if delta >= self.tick_threshold {
            self.state.last_elapsed = elapsed;
            self.state.stalled_secs = 0.0;
            return Some(ProgressEvent::Tick(delta));
        }

        // Repeated or regressing timestamps (common around keyframes) count as
        // stalled wall-clock time; slow forward movement does not.
        if !advanced {
            self.state.stalled_secs += self.report_period;
            if self.state.stalled_secs >= self.stall_timeout {
                self.halted = true;
                return Some(ProgressEvent::StallDetected {
                    stalled_secs: self.state.stalled_secs,
                });
            }
        }

        None
    }

    /// Lazily parse a finite line sequence, ending with `StreamEnded` unless halted
    pub fn events<I>(self, lines: I) -> ProgressEvents<I::IntoIter>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        ProgressEvents {
            parser: self,
            lines: lines.into_iter(),
            ended: false,
        }
    }
}

/// Iterator returned by [`ProgressParser::events`]
pub struct ProgressEvents<I> {
    parser: ProgressParser,
    lines: I,
    ended: bool,
}

impl<I> Iterator for ProgressEvents<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        if self.ended || self.parser.is_halted() {
            return None;
        }
        for line in self.lines.by_ref() {
            if let Some(event) = self.parser.feed(line.as_ref()) {
                return Some(event);
            }
            if self.parser.is_halted() {
                return None;
            }
        }
        self.ended = true;
        Some(ProgressEvent::StreamEnded)
    }
}

/// Find the value following a standalone `time=` key
fn time_token(line: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(pos) = line[search_from..].find(TIME_MARKER) {
        let start = search_from + pos;
        let standalone = line[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        if standalone {
            let rest = &line[start + TIME_MARKER.len()..];
            return Some(rest.split_whitespace().next().unwrap_or(""));
        }
        search_from = start + TIME_MARKER.len();
    }
    None
}

/// Parse `[-]HH:MM:SS[.frac]` into seconds
pub fn parse_timestamp(token: &str) -> Option<f64> {
    let (sign, body) = match token.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, token),
    };

    let mut parts = body.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    Some(sign * (hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds))
}

/// Splits raw stderr bytes into lines on `\n` or `\r`.
///
/// FFmpeg rewrites its stats line in place with a bare carriage return.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' || b == b'\r' {
                if let Some(line) = self.take() {
                    lines.push(line);
                }
            } else {
                self.buf.push(b);
                if self.buf.len() >= MAX_LINE_BYTES {
                    if let Some(line) = self.take() {
                        lines.push(line);
                    }
                }
            }
        }
        lines
    }

    /// Flush whatever is left once the stream closes
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(line)
    }
}

/// Read `reader` to the end on a dedicated task, parse it, and queue events.
///
/// The task stops after a fatal event or once the receiver is dropped.
/// `StreamEnded` is sent only when the stream closes normally.
pub fn spawn_event_reader<R>(
    reader: R,
    parser: ProgressParser,
    capacity: usize,
) -> (mpsc::Receiver<ProgressEvent>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::spawn(async move {
        let mut reader = reader;
        let mut parser = parser;
        let mut splitter = LineSplitter::default();
        let mut chunk = [0u8; 8192];

        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("Failed to read encoder diagnostics: {}", e);
                    break;
                }
            };
            for line in splitter.push(&chunk[..n]) {
                if !forward(&mut parser, &line, &tx).await {
                    return;
                }
            }
        }

        if let Some(line) = splitter.finish() {
            if !forward(&mut parser, &line, &tx).await {
                return;
            }
        }

        let _ = tx.send(ProgressEvent::StreamEnded).await;
    });

    (rx, handle)
}

/// Feed one line; false means the reader should stop
async fn forward(parser: &mut ProgressParser, line: &str, tx: &mpsc::Sender<ProgressEvent>) -> bool {
    debug!("ffmpeg: {}", line);
    match parser.feed(line) {
        Some(event) => {
            let fatal = event.is_fatal();
            tx.send(event).await.is_ok() && !fatal
        }
        None => true,
    }
}

/// Receives progress for the file currently being encoded
pub trait ProgressSink {
    /// A new file started; `total_secs` is None when the duration is unknown
    fn begin(&self, label: &str, total_secs: Option<f64>);
    fn advance(&self, secs: f64);
    fn finish(&self);
}

/// Sink that discards everything
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn begin(&self, _label: &str, _total_secs: Option<f64>) {}
    fn advance(&self, _secs: f64) {}
    fn finish(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parser() -> ProgressParser {
        ProgressParser::new(1.0, 15.0, 1.0)
    }

    fn stats_line(secs: f64) -> String {
        let h = (secs / 3600.0).floor();
        let m = ((secs - h * 3600.0) / 60.0).floor();
        let s = secs - h * 3600.0 - m * 60.0;
        format!(
            "frame=  120 fps= 24 q=28.0 size=    1024kB time={:02}:{:02}:{:05.2} bitrate= 800.0kbits/s speed=1.01x",
            h as u64, m as u64, s
        )
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:00:05.00"), Some(5.0));
        assert_eq!(parse_timestamp("01:02:03.50"), Some(3723.5));
        assert_eq!(parse_timestamp("00:00:07"), Some(7.0));
        assert_eq!(parse_timestamp("-00:00:00.04"), Some(-0.04));
        assert_eq!(parse_timestamp("N/A"), None);
        assert_eq!(parse_timestamp("00:05"), None);
        assert_eq!(parse_timestamp("00:00:00:01"), None);
    }

    #[test]
    fn test_time_token_requires_standalone_key() {
        assert_eq!(time_token("size=1kB time=00:00:01.00 bitrate=1"), Some("00:00:01.00"));
        assert_eq!(time_token("time=00:00:02.00"), Some("00:00:02.00"));
        assert_eq!(time_token("out_time=00:00:02.00"), None);
        assert_eq!(time_token("runtime=00:00:02.00 time=00:00:03.00"), Some("00:00:03.00"));
        assert_eq!(time_token("no marker here"), None);
    }

    #[test]
    fn test_two_second_advance_is_one_tick() {
        let mut p = parser();
        p.feed("... time=00:00:05.00 ...");
        assert_eq!(p.feed("... time=00:00:07.00 ..."), Some(ProgressEvent::Tick(2.0)));
        assert_eq!(p.state().last_elapsed, 7.0);
    }

    #[test]
    fn test_first_report_ticks_from_zero() {
        let mut p = parser();
        assert_eq!(p.feed(&stats_line(5.0)), Some(ProgressEvent::Tick(5.0)));
    }

    #[test]
    fn test_sub_threshold_deltas_accumulate_into_one_tick() {
        let mut p = parser();
        assert_eq!(p.feed("time=00:00:00.40"), None);
        assert_eq!(p.feed("time=00:00:00.80"), None);
        assert_eq!(p.feed("time=00:00:01.20"), Some(ProgressEvent::Tick(1.2)));
        assert_eq!(p.state().stalled_secs, 0.0);
    }

    #[test]
    fn test_repeated_timestamp_stalls_on_sixteenth_line() {
        let lines: Vec<String> = (0..20).map(|_| "time=00:00:01.00".to_string()).collect();
        let mut p = parser();
        let mut stall_at = None;
        let mut events = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if let Some(e) = p.feed(line) {
                if matches!(e, ProgressEvent::StallDetected { .. }) {
                    stall_at = Some(i + 1);
                }
                events.push(e);
            }
        }
        assert_eq!(stall_at, Some(16));
        assert_eq!(
            events,
            vec![
                ProgressEvent::Tick(1.0),
                ProgressEvent::StallDetected { stalled_secs: 15.0 },
            ]
        );
    }

    #[test]
    fn test_regressing_timestamps_accumulate_instead_of_failing() {
        let mut p = parser();
        p.feed("time=00:00:10.00");
        assert_eq!(p.feed("time=00:00:09.96"), None);
        assert_eq!(p.feed("time=00:00:09.92"), None);
        assert_eq!(p.state().stalled_secs, 2.0);
        assert_eq!(p.feed("time=00:00:11.50"), Some(ProgressEvent::Tick(1.5)));
        assert_eq!(p.state().stalled_secs, 0.0);
    }

    #[test]
    fn test_slow_forward_progress_never_stalls() {
        let mut p = parser();
        let mut t = 0.0;
        let mut ticks = 0;
        for _ in 0..200 {
            t += 0.05;
            match p.feed(&stats_line(t)) {
                Some(ProgressEvent::Tick(_)) => ticks += 1,
                Some(other) => panic!("unexpected event {:?}", other),
                None => {}
            }
        }
        assert!(ticks >= 9);
        assert!(!p.is_halted());
    }

    #[test]
    fn test_error_line_is_fatal_and_halts() {
        let mut p = parser();
        assert_eq!(p.feed(&stats_line(2.0)), Some(ProgressEvent::Tick(2.0)));
        assert_eq!(
            p.feed("Error: invalid data"),
            Some(ProgressEvent::ErrorDetected("Error: invalid data".to_string()))
        );
        assert_eq!(p.feed(&stats_line(10.0)), None);
        assert!(p.is_halted());
    }

    #[test]
    fn test_error_marker_is_case_insensitive() {
        let mut p = parser();
        assert!(matches!(
            p.feed("[h264 @ 0x55] decode_slice_header ERROR"),
            Some(ProgressEvent::ErrorDetected(_))
        ));
    }

    #[test]
    fn test_progress_line_is_never_an_error() {
        let mut p = parser();
        assert_eq!(
            p.feed("frame=1 time=00:00:03.00 bitrate=N/A error_count=0"),
            Some(ProgressEvent::Tick(3.0))
        );
        assert!(!p.is_halted());
    }

    #[test]
    fn test_na_time_is_ignored() {
        let mut p = parser();
        assert_eq!(p.feed("frame=0 size=0kB time=N/A bitrate=N/A speed=N/A"), None);
        assert_eq!(p.state().last_report, None);
    }

    #[test]
    fn test_events_iterator_ends_with_stream_ended() {
        let lines = vec!["Input #0, matroska", "time=00:00:02.00", "time=00:00:04.00"];
        let events: Vec<_> = parser().events(lines).collect();
        assert_eq!(
            events,
            vec![
                ProgressEvent::Tick(2.0),
                ProgressEvent::Tick(2.0),
                ProgressEvent::StreamEnded,
            ]
        );
    }

    #[test]
    fn test_events_iterator_stops_after_error() {
        let lines = vec!["time=00:00:02.00", "Error: invalid data", "time=00:00:04.00"];
        let events: Vec<_> = parser().events(lines).collect();
        assert_eq!(
            events,
            vec![
                ProgressEvent::Tick(2.0),
                ProgressEvent::ErrorDetected("Error: invalid data".to_string()),
            ]
        );
    }

    #[test]
    fn test_line_splitter_handles_carriage_returns() {
        let mut s = LineSplitter::default();
        let mut lines = s.push(b"Stream mapping:\r\n  Stream #0:0\nframe=1 time=00:00:01.00\rframe=2 ti");
        lines.extend(s.push(b"me=00:00:02.00\r"));
        assert_eq!(
            lines,
            vec![
                "Stream mapping:",
                "  Stream #0:0",
                "frame=1 time=00:00:01.00",
                "frame=2 time=00:00:02.00",
            ]
        );
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn test_line_splitter_flushes_tail_and_tolerates_bad_utf8() {
        let mut s = LineSplitter::default();
        assert!(s.push(b"tail \xff without newline").is_empty());
        let tail = s.finish().unwrap();
        assert!(tail.starts_with("tail "));
        assert!(tail.ends_with("without newline"));
    }

    #[tokio::test]
    async fn test_event_reader_over_byte_stream() {
        let input: &[u8] = b"Input #0\ntime=00:00:01.50\rtime=00:00:03.00\r";
        let (mut rx, handle) = spawn_event_reader(input, parser(), 4);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        handle.await.unwrap();
        assert_eq!(
            events,
            vec![
                ProgressEvent::Tick(1.5),
                ProgressEvent::Tick(1.5),
                ProgressEvent::StreamEnded,
            ]
        );
    }

    #[tokio::test]
    async fn test_event_reader_stops_after_fatal_event() {
        let input: &[u8] = b"time=00:00:02.00\nConversion failed! Error while opening encoder\ntime=00:00:05.00\n";
        let (mut rx, handle) = spawn_event_reader(input, parser(), 1);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        handle.await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ProgressEvent::ErrorDetected(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Ticks fire exactly when the advance since the previous tick reaches the threshold
        #[test]
        fn test_tick_iff_threshold_reached(
            steps in prop::collection::vec(-0.5f64..2.5, 1..120),
        ) {
            let mut p = parser();
            let mut elapsed = 0.0f64;
            let mut last_tick = 0.0f64;
            for step in steps {
                elapsed += step;
                let line = format!("time={}", format_signed(elapsed));
                let reported = parse_timestamp(&format_signed(elapsed)).unwrap();
                let event = p.feed(&line);
                if p.is_halted() && !matches!(event, Some(ProgressEvent::StallDetected { .. })) {
                    // Halted on an earlier line: nothing more may come out
                    prop_assert_eq!(event, None);
                    continue;
                }
                match event {
                    Some(ProgressEvent::Tick(delta)) => {
                        prop_assert!(reported - last_tick >= 1.0);
                        prop_assert!((delta - (reported - last_tick)).abs() < 1e-9);
                        last_tick = reported;
                    }
                    Some(ProgressEvent::StallDetected { .. }) => {
                        prop_assert!(reported - last_tick < 1.0);
                    }
                    Some(other) => prop_assert!(false, "unexpected event {:?}", other),
                    None => prop_assert!(reported - last_tick < 1.0),
                }
            }
        }

        /// A stall fires once and is followed by silence
        #[test]
        fn test_single_stall_then_silence(
            frozen_at in 0u32..5000,
            repeats in 16usize..60,
            tail in prop::collection::vec(0.0f64..100.0, 0..20),
        ) {
            let mut lines = vec![format!("time={}", format_signed(frozen_at as f64))];
            lines.extend((0..repeats).map(|_| format!("time={}", format_signed(frozen_at as f64))));
            lines.extend(tail.iter().map(|t| format!("time={}", format_signed(frozen_at as f64 + 10.0 + t))));

            let events: Vec<_> = parser().events(lines).collect();
            let stalls = events.iter()
                .filter(|e| matches!(e, ProgressEvent::StallDetected { .. }))
                .count();
            prop_assert_eq!(stalls, 1);
            let ends_with_stall = matches!(events.last(), Some(ProgressEvent::StallDetected { .. }));
            prop_assert!(ends_with_stall);
        }
    }

    fn format_signed(secs: f64) -> String {
        let sign = if secs < 0.0 { "-" } else { "" };
        let abs = secs.abs();
        let h = (abs / 3600.0).floor();
        let m = ((abs - h * 3600.0) / 60.0).floor();
        let s = abs - h * 3600.0 - m * 60.0;
        format!("{}{:02}:{:02}:{:09.6}", sign, h as u64, m as u64, s)
    }
}
