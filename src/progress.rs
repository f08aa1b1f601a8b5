// src/progress.rs

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Transfer state of one chunk or of the whole download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Bytes per second over the last sampling window.
    pub speed: f64,
    pub bytes: u64,
    /// 0 to 100, or 0 while the size is unknown.
    pub percentage: f64,
}

/// Aggregate progress together with every chunk's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub total: Progress,
    pub details: Vec<Progress>,
}

#[derive(Debug, Clone, Copy)]
struct SpeedSample {
    time: Instant,
    bytes: u64,
}

impl SpeedSample {
    fn new(time: Instant, bytes: u64) -> Self {
        Self { time, bytes }
    }

    /// Recomputes `progress.speed` when forced or when more than `interval`
    /// has passed since the last sample. Returns whether it did.
    fn refresh(&mut self, progress: &mut Progress, now: Instant, interval: Duration, force: bool) -> bool {
        let elapsed = now.saturating_duration_since(self.time);
        if !force && elapsed <= interval {
            return false;
        }
        let secs = elapsed.as_secs_f64();
        progress.speed = if secs > 0.0 {
            progress.bytes.saturating_sub(self.bytes) as f64 / secs
        } else {
            0.0
        };
        self.time = now;
        self.bytes = progress.bytes;
        true
    }
}

fn percentage(bytes: u64, size: u64) -> f64 {
    if size == 0 {
        0.0
    } else {
        100.0 * bytes as f64 / size as f64
    }
}

/// Byte counters and throttled speed estimates for a session.
///
/// Only the aggregate sample produces a report; per-chunk speeds ride along
/// in the next aggregate report.
#[derive(Debug)]
pub struct ProgressTracker {
    interval: Duration,
    total_size: u64,
    sizes: Vec<u64>,
    total: Progress,
    total_sample: SpeedSample,
    parts: Vec<Progress>,
    part_samples: Vec<Option<SpeedSample>>,
}

impl ProgressTracker {
    /// `sizes` holds the expected length of each chunk (0 if unknown).
    pub fn new(sizes: Vec<u64>, total_size: u64, interval: Duration, now: Instant) -> Self {
        let count = sizes.len();
        Self {
            interval,
            total_size,
            sizes,
            total: Progress::default(),
            total_sample: SpeedSample::new(now, 0),
            parts: vec![Progress::default(); count],
            part_samples: vec![None; count],
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Sets the total size if it was not known yet.
    pub fn learn_total_size(&mut self, size: u64) {
        if self.total_size == 0 {
            self.total_size = size;
            self.total.percentage = percentage(self.total.bytes, size);
        }
    }

    /// Sets the expected size of `chunk` if it was not known yet.
    pub fn learn_chunk_size(&mut self, chunk: usize, size: u64) {
        if let Some(known) = self.sizes.get_mut(chunk) {
            if *known == 0 {
                *known = size;
                self.parts[chunk].percentage = percentage(self.parts[chunk].bytes, size);
            }
        }
    }

    /// Seeds a chunk found complete on disk.
    pub fn mark_complete(&mut self, chunk: usize) {
        let size = self.sizes[chunk];
        self.parts[chunk] = Progress {
            speed: 0.0,
            bytes: size,
            percentage: 100.0,
        };
        self.total.bytes += size;
        self.total.percentage = percentage(self.total.bytes, self.total_size);
        self.total_sample.bytes = self.total.bytes;
    }

    /// Accounts `len` freshly received bytes of `chunk`.
    pub fn record(&mut self, chunk: usize, len: u64) {
        let part = &mut self.parts[chunk];
        part.bytes += len;
        part.percentage = percentage(part.bytes, self.sizes[chunk]);

        self.total.bytes += len;
        self.total.percentage = percentage(self.total.bytes, self.total_size);
    }

    /// Forgets the bytes of a failed attempt of `chunk`.
    pub fn rollback(&mut self, chunk: usize) {
        let lost = std::mem::take(&mut self.parts[chunk]).bytes;
        self.total.bytes -= lost;
        self.total.percentage = percentage(self.total.bytes, self.total_size);
        self.total_sample.bytes = self.total_sample.bytes.saturating_sub(lost);
        self.part_samples[chunk] = None;
    }

    /// Refreshes speeds after activity on `chunk`. Returns a report when the
    /// aggregate sample was refreshed.
    pub fn update(&mut self, chunk: usize, force: bool, now: Instant) -> Option<ProgressReport> {
        let sample = self.part_samples[chunk].get_or_insert_with(|| SpeedSample::new(now, 0));
        sample.refresh(&mut self.parts[chunk], now, self.interval, force);

        if self.total_sample.refresh(&mut self.total, now, self.interval, force) {
            Some(self.report())
        } else {
            None
        }
    }

    /// Final forced update for a finished chunk; its speed drops to zero
    /// after the report is taken.
    pub fn finish_chunk(&mut self, chunk: usize, now: Instant) -> Option<ProgressReport> {
        let report = self.update(chunk, true, now);
        self.parts[chunk].speed = 0.0;
        report
    }

    pub fn report(&self) -> ProgressReport {
        ProgressReport {
            total: self.total,
            details: self.parts.clone(),
        }
    }

    pub fn percentages(&self) -> Vec<f64> {
        self.parts.iter().map(|p| p.percentage).collect()
    }
}
