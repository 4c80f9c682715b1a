//! Parsing of the encoder's `-progress` stream.
//!
//! The encoder writes blocks of `key=value` lines, each block closed by a
//! `progress=continue` or `progress=end` line. Only the output timestamp is
//! of interest here; every other key is ignored.

use std::time::{Duration, Instant};

/// One recognised line of the progress stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    /// Encoded output position.
    OutTime(Duration),
    /// The encoder finished writing.
    End,
}

/// Parses a single line. Unknown keys and malformed values yield `None`.
pub fn parse_line(line: &str) -> Option<ProgressLine> {
    let (key, value) = line.trim().split_once('=')?;
    match key.trim() {
        // out_time_ms is reported in microseconds as well
        "out_time_us" | "out_time_ms" => {
            let micros = value.trim().parse::<i64>().ok()?;
            u64::try_from(micros)
                .ok()
                .map(|us| ProgressLine::OutTime(Duration::from_micros(us)))
        }
        "progress" if value.trim() == "end" => Some(ProgressLine::End),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Completion in `[0, 1]`, `None` when the total duration is unknown.
    pub fraction: Option<f64>,
    /// Wall-clock time since encoding started.
    pub elapsed: Duration,
    /// Position reached in the output.
    pub output_time: Duration,
    pub eta: Option<Duration>,
}

impl ProgressEvent {
    pub fn describe(&self) -> String {
        match (self.fraction, self.eta) {
            (Some(fraction), Some(eta)) => format!(
                "{:.1}% · elapsed {} · eta {}",
                fraction * 100.0,
                format_clock(self.elapsed),
                format_clock(eta)
            ),
            (Some(fraction), None) => format!(
                "{:.1}% · elapsed {}",
                fraction * 100.0,
                format_clock(self.elapsed)
            ),
            (None, _) => format!(
                "elapsed {} (duration unknown)",
                format_clock(self.elapsed)
            ),
        }
    }
}

pub fn format_clock(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Turns stream lines into rate-limited [`ProgressEvent`]s.
#[derive(Debug)]
pub struct ProgressParser {
    total_secs: Option<f64>,
    min_interval: Duration,
    started: Instant,
    last_emit: Option<Instant>,
    output_time: Duration,
    fraction: Option<f64>,
}

impl ProgressParser {
    /// A zero or negative `total_secs` is treated as unknown.
    pub fn new(total_secs: f64, min_interval: Duration) -> Self {
        Self::starting_at(total_secs, min_interval, Instant::now())
    }

    pub fn starting_at(total_secs: f64, min_interval: Duration, started: Instant) -> Self {
        let total_secs = (total_secs.is_finite() && total_secs > 0.0).then_some(total_secs);
        Self {
            total_secs,
            min_interval,
            started,
            last_emit: None,
            output_time: Duration::ZERO,
            fraction: total_secs.map(|_| 0.0),
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<ProgressEvent> {
        self.feed_at(line, Instant::now())
    }

    pub fn feed_at(&mut self, line: &str, now: Instant) -> Option<ProgressEvent> {
        match parse_line(line)? {
            ProgressLine::OutTime(t) => {
                self.output_time = self.output_time.max(t);
                if let Some(total) = self.total_secs {
                    let current = (self.output_time.as_secs_f64() / total).min(1.0);
                    self.fraction = Some(self.fraction.unwrap_or(0.0).max(current));
                }
            }
            ProgressLine::End => {
                if self.total_secs.is_some() {
                    self.fraction = Some(1.0);
                }
            }
        }

        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.min_interval {
                return None;
            }
        }
        self.last_emit = Some(now);
        Some(self.event_at(now))
    }

    fn event_at(&self, now: Instant) -> ProgressEvent {
        let elapsed = now.saturating_duration_since(self.started);
        let eta = self.fraction.and_then(|f| {
            if f <= 0.0 {
                None
            } else {
                Some(elapsed.mul_f64((1.0 - f) / f))
            }
        });
        ProgressEvent {
            fraction: self.fraction,
            elapsed,
            output_time: self.output_time,
            eta,
        }
    }
}
