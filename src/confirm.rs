// src/confirm.rs - Two-stage alarm confirmation
//
// A reading first proposes a candidate class on its own. The candidate is
// only confirmed when the mean of the newest N valid samples (N taken from the
// device's alarm_times for that class) sits on the same side of the same
// boundary.

use crate::buffer::{mean, SampleBuffer};
use crate::classify::AlarmClass;
use crate::config::DeviceAlarmConfig;
use serde::Serialize;

/// Outcome of evaluating one reading on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Evaluation {
    /// No valid sample in the window yet; state must not change.
    WarmingUp,

    /// Reading inside the normal band. `average` covers every valid sample.
    Normal { average: f64 },

    /// Candidate raised but the window does not hold enough valid samples.
    Pending {
        candidate: AlarmClass,
        have: usize,
        need: usize,
    },

    /// Candidate raised but the windowed mean stays inside the boundary.
    Rejected { candidate: AlarmClass, average: f64 },

    /// Candidate backed by the windowed mean.
    Confirmed { class: AlarmClass, average: f64 },
}

impl Evaluation {
    /// Confirmed class, if any.
    pub fn confirmed(&self) -> Option<AlarmClass> {
        match self {
            Evaluation::Confirmed { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Candidate proposed by the instantaneous reading.
    pub fn candidate(&self) -> Option<AlarmClass> {
        match self {
            Evaluation::Pending { candidate, .. } | Evaluation::Rejected { candidate, .. } => {
                Some(*candidate)
            }
            Evaluation::Confirmed { class, .. } => Some(*class),
            Evaluation::WarmingUp | Evaluation::Normal { .. } => None,
        }
    }

    pub fn average(&self) -> Option<f64> {
        match self {
            Evaluation::Normal { average }
            | Evaluation::Rejected { average, .. }
            | Evaluation::Confirmed { average, .. } => Some(*average),
            Evaluation::WarmingUp | Evaluation::Pending { .. } => None,
        }
    }

    /// Whether the tracker should act on this result.
    pub fn is_evaluated(&self) -> bool {
        !matches!(self, Evaluation::WarmingUp)
    }
}

/// Push `value` into `buffer` and evaluate it against the device's bands.
///
/// The sample is pushed before any statistic is computed, so the mean always
/// includes the reading being judged.
pub fn evaluate(config: &DeviceAlarmConfig, value: f64, buffer: &mut SampleBuffer) -> Evaluation {
    buffer.push(value);

    if buffer.valid().next().is_none() {
        return Evaluation::WarmingUp;
    }

    let candidate = match config.thresholds.classify(value) {
        Some(candidate) => candidate,
        None => {
            return match buffer.valid_mean() {
                Some(average) => Evaluation::Normal { average },
                None => Evaluation::WarmingUp,
            };
        }
    };

    let need = config.alarm_times.required(candidate);
    let recent = buffer.recent_valid(need);
    if recent.len() < need {
        return Evaluation::Pending {
            candidate,
            have: recent.len(),
            need,
        };
    }

    let average = match mean(recent) {
        Some(average) => average,
        None => return Evaluation::Pending { candidate, have: 0, need },
    };

    if candidate.breached_by(average, &config.thresholds) {
        Evaluation::Confirmed { class: candidate, average }
    } else {
        Evaluation::Rejected { candidate, average }
    }
}
