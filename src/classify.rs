// src/classify.rs - Four-band threshold classification
use crate::error::{Result, TowerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound accepted for any configured threshold, in Newtons.
pub const MAX_THRESHOLD: f64 = 10_000.0;

/// Alarm classes, most severe bands at the edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmClass {
    /// Critically low load
    LowLow,
    /// Low load
    Low,
    /// High load
    High,
    /// Critically high load
    HighHigh,
}

impl AlarmClass {
    pub const ALL: [AlarmClass; 4] = [
        AlarmClass::LowLow,
        AlarmClass::Low,
        AlarmClass::High,
        AlarmClass::HighHigh,
    ];

    /// Whether `value` is on the alarm side of this class's boundary.
    ///
    /// Low classes trip at or below their bound, high classes at or above.
    pub fn breached_by(self, value: f64, thresholds: &ThresholdSet) -> bool {
        match self {
            AlarmClass::LowLow => value <= thresholds.low_low,
            AlarmClass::Low => value <= thresholds.low,
            AlarmClass::High => value >= thresholds.high,
            AlarmClass::HighHigh => value >= thresholds.high_high,
        }
    }

    pub fn is_critical(self) -> bool {
        matches!(self, AlarmClass::LowLow | AlarmClass::HighHigh)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlarmClass::LowLow => "low_low",
            AlarmClass::Low => "low",
            AlarmClass::High => "high",
            AlarmClass::HighHigh => "high_high",
        }
    }
}

impl fmt::Display for AlarmClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four-band threshold set of one tower.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub low_low: f64,
    pub low: f64,
    pub high: f64,
    pub high_high: f64,
}

impl ThresholdSet {
    /// Build a threshold set, rejecting bands out of order or out of range.
    pub fn new(low_low: f64, low: f64, high: f64, high_high: f64) -> Result<Self> {
        let set = Self { low_low, low, high, high_high };
        set.validate()?;
        Ok(set)
    }

    /// Check `low_low < low < high < high_high`, all within `[0, 10000]`.
    pub fn validate(&self) -> Result<()> {
        let bounds = [self.low_low, self.low, self.high, self.high_high];

        if let Some(bad) = bounds
            .iter()
            .find(|b| !b.is_finite() || **b < 0.0 || **b > MAX_THRESHOLD)
        {
            return Err(TowerError::Config(format!(
                "Threshold {} outside [0, {}]",
                bad, MAX_THRESHOLD
            )));
        }

        if !bounds.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(TowerError::Config(format!(
                "Thresholds must satisfy low_low < low < high < high_high, got {}/{}/{}/{}",
                self.low_low, self.low, self.high, self.high_high
            )));
        }

        Ok(())
    }

    /// Candidate class for a single reading.
    ///
    /// Critical bands are tested before moderate ones, so a reading at or
    /// below `low_low` is `LowLow` even though it also satisfies `<= low`.
    pub fn classify(&self, value: f64) -> Option<AlarmClass> {
        const PRIORITY: [AlarmClass; 4] = [
            AlarmClass::LowLow,
            AlarmClass::HighHigh,
            AlarmClass::Low,
            AlarmClass::High,
        ];

        PRIORITY
            .into_iter()
            .find(|class| class.breached_by(value, self))
    }
}

/// Free-function form of [`ThresholdSet::classify`].
pub fn classify(value: f64, thresholds: &ThresholdSet) -> Option<AlarmClass> {
    thresholds.classify(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> ThresholdSet {
        ThresholdSet::new(200.0, 400.0, 1600.0, 2000.0).unwrap()
    }

    #[test]
    fn test_classify_boundaries() {
        let t = thresholds();
        assert_eq!(classify(200.0, &t), Some(AlarmClass::LowLow));
        assert_eq!(classify(200.5, &t), Some(AlarmClass::Low));
        assert_eq!(classify(400.0, &t), Some(AlarmClass::Low));
        assert_eq!(classify(400.5, &t), None);
        assert_eq!(classify(1599.9, &t), None);
        assert_eq!(classify(1600.0, &t), Some(AlarmClass::High));
        assert_eq!(classify(1999.9, &t), Some(AlarmClass::High));
        assert_eq!(classify(2000.0, &t), Some(AlarmClass::HighHigh));
    }

    #[test]
    fn test_critical_wins_over_moderate() {
        let t = thresholds();
        // Satisfies both <= low and <= low_low
        assert_eq!(classify(0.0, &t), Some(AlarmClass::LowLow));
        assert_eq!(classify(-50.0, &t), Some(AlarmClass::LowLow));
        // Satisfies both >= high and >= high_high
        assert_eq!(classify(9000.0, &t), Some(AlarmClass::HighHigh));
    }

    #[test]
    fn test_validate_rejects_bad_order() {
        assert!(ThresholdSet::new(400.0, 200.0, 1600.0, 2000.0).is_err());
        assert!(ThresholdSet::new(200.0, 400.0, 400.0, 2000.0).is_err());
        assert!(ThresholdSet::new(200.0, 400.0, 2000.0, 1600.0).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(matches!(
            ThresholdSet::new(-1.0, 400.0, 1600.0, 2000.0),
            Err(TowerError::Config(_))
        ));
        assert!(ThresholdSet::new(200.0, 400.0, 1600.0, 10_001.0).is_err());
        assert!(ThresholdSet::new(0.0, 400.0, 1600.0, 10_000.0).is_ok());
        assert!(ThresholdSet::new(f64::NAN, 400.0, 1600.0, 2000.0).is_err());
    }

    #[test]
    fn test_class_display() {
        assert_eq!(AlarmClass::HighHigh.to_string(), "high_high");
        assert!(AlarmClass::LowLow.is_critical());
        assert!(!AlarmClass::High.is_critical());
    }
}
