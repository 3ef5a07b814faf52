// src/buffer.rs - Fixed capacity sample window per tower channel
use std::collections::VecDeque;

/// Rolling window of the most recent raw readings for one channel.
///
/// The window always holds exactly `capacity` entries. It starts filled with
/// zeros, and a zero is read back as "no data yet": [`valid`](Self::valid)
/// skips those slots so averages only cover real readings.
///
/// # Examples
///
/// ```rust
/// use towerwatch::SampleBuffer;
///
/// let mut buffer = SampleBuffer::new(3);
/// buffer.push(10.0);
/// buffer.push(20.0);
/// assert_eq!(buffer.snapshot(), vec![0.0, 10.0, 20.0]);
/// assert_eq!(buffer.valid().count(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: VecDeque<f64>,
}

impl SampleBuffer {
    /// Create a zero-filled buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: std::iter::repeat(0.0).take(capacity).collect(),
        }
    }

    /// Append `value`, evicting the oldest entry.
    pub fn push(&mut self, value: f64) {
        self.samples.pop_front();
        self.samples.push_back(value);
    }

    /// Contents oldest to newest.
    pub fn snapshot(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    /// Non-zero entries oldest to newest.
    pub fn valid(&self) -> impl DoubleEndedIterator<Item = f64> + '_ {
        self.samples.iter().copied().filter(|v| *v != 0.0)
    }

    /// The newest `count` non-zero entries, oldest first.
    ///
    /// Returns fewer than `count` values while the buffer is still filling.
    pub fn recent_valid(&self, count: usize) -> Vec<f64> {
        let mut recent: Vec<f64> = self.valid().rev().take(count).collect();
        recent.reverse();
        recent
    }

    /// Mean of every non-zero entry, `None` when there is none.
    pub fn valid_mean(&self) -> Option<f64> {
        mean(self.valid())
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Newest entry, zero included.
    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }
}

/// Arithmetic mean, `None` for an empty input.
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
