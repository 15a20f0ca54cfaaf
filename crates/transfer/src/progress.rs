//! Throughput and ETA over a sliding window of chunk samples.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_MAX_SAMPLES: usize = 100;

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Sliding-window speed estimate.
///
/// Each sample is the size of one chunk as it completes. The oldest sample
/// in the window only marks the start time; its bytes were moved before it.
pub struct SpeedCalculator {
    inner: Mutex<Window>,
}

struct Window {
    samples: VecDeque<Sample>,
    max_samples: usize,
    span: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// `window` defaults to 5 s, `max_samples` to 100.
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Window {
                samples: VecDeque::new(),
                max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES).max(2),
                span: window.unwrap_or(DEFAULT_WINDOW),
            }),
        }
    }

    /// Records `bytes` completed now.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    pub(crate) fn add_sample_at(&self, bytes: u64, at: Instant) {
        let mut w = self.inner.lock().unwrap();
        w.samples.push_back(Sample { bytes, at });

        let span = w.span;
        while w
            .samples
            .front()
            .is_some_and(|s| at.saturating_duration_since(s.at) > span)
        {
            w.samples.pop_front();
        }
        while w.samples.len() > w.max_samples {
            w.samples.pop_front();
        }
    }

    /// Average bytes/second across the window; 0.0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let w = self.inner.lock().unwrap();
        let (Some(first), Some(last)) = (w.samples.front(), w.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.at.saturating_duration_since(first.at);
        if w.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        let moved: u64 = w.samples.iter().skip(1).map(|s| s.bytes).sum();
        moved as f64 / elapsed.as_secs_f64()
    }

    /// Time left for `remaining` bytes at the current speed.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }

    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}
