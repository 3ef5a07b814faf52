// src/readings.rs - Latest-value store for live tower readings
use crate::config::Channel;
use crate::error::{Result, TowerError};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Per-device channel readings, `device_id -> { channel -> Newtons }`
pub type Readings = HashMap<String, HashMap<Channel, f64>>;

/// Thread-safe latest-value store fed by the live reading source
///
/// Producers overwrite the value of a channel whenever a frame arrives; the
/// tick samples whatever is latest. Readings are never queued, so a fast feed
/// does not speed up evaluation.
///
/// # Examples
///
/// ```rust
/// use towerwatch::{Channel, ReadingBus};
///
/// let bus = ReadingBus::new();
/// bus.publish("tower-1", Channel::North, 812.0)?;
/// bus.publish("tower-1", Channel::North, 815.5)?;
/// assert_eq!(bus.get("tower-1", Channel::North), Some(815.5));
/// # Ok::<(), towerwatch::TowerError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReadingBus {
    readings: Arc<DashMap<String, HashMap<Channel, f64>>>,
}

impl ReadingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest reading of one channel
    ///
    /// Non-finite values are refused; any finite value, negative included,
    /// is stored as-is.
    pub fn publish(&self, device_id: impl AsRef<str>, channel: Channel, value: f64) -> Result<()> {
        let device_id = device_id.as_ref();
        if !value.is_finite() {
            return Err(TowerError::InvalidReading {
                device_id: device_id.to_string(),
                channel: channel.to_string(),
                value,
            });
        }
        trace!("Reading {}/{} = {}", device_id, channel, value);
        self.readings
            .entry(device_id.to_string())
            .or_default()
            .insert(channel, value);
        Ok(())
    }

    /// Record a whole frame for a device, stopping at the first bad value
    pub fn publish_frame(&self, device_id: impl AsRef<str>, frame: &HashMap<Channel, f64>) -> Result<()> {
        let device_id = device_id.as_ref();
        for (channel, value) in frame {
            self.publish(device_id, *channel, *value)?;
        }
        Ok(())
    }

    /// Latest reading of one channel
    pub fn get(&self, device_id: &str, channel: Channel) -> Option<f64> {
        self.readings
            .get(device_id)
            .and_then(|entry| entry.value().get(&channel).copied())
    }

    /// Forget every reading of a device
    pub fn remove_device(&self, device_id: &str) -> Option<HashMap<Channel, f64>> {
        self.readings.remove(device_id).map(|(_, v)| v)
    }

    /// Keep only the devices for which `keep` returns true
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.readings.len();
        self.readings.retain(|device_id, _| keep(device_id));
        before.saturating_sub(self.readings.len())
    }

    pub fn clear(&self) {
        self.readings.clear();
    }

    /// Number of devices with at least one reading
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Copy of every latest reading
    pub fn snapshot(&self) -> Readings {
        self.readings
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_value_wins() {
        let bus = ReadingBus::new();
        bus.publish("t1", Channel::East, 100.0).unwrap();
        bus.publish("t1", Channel::East, 120.0).unwrap();
        bus.publish("t1", Channel::West, -3.0).unwrap();
        assert_eq!(bus.get("t1", Channel::East), Some(120.0));
        assert_eq!(bus.get("t1", Channel::West), Some(-3.0));
        assert_eq!(bus.get("t1", Channel::North), None);
        assert_eq!(bus.get("t2", Channel::East), None);
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn test_rejects_non_finite() {
        let bus = ReadingBus::new();
        assert!(matches!(
            bus.publish("t1", Channel::North, f64::NAN),
            Err(TowerError::InvalidReading { .. })
        ));
        assert!(bus.publish("t1", Channel::North, f64::INFINITY).is_err());
        assert!(bus.is_empty());
    }

    #[test]
    fn test_frame_and_snapshot() {
        let bus = ReadingBus::new();
        let frame: HashMap<Channel, f64> = Channel::ALL.iter().map(|c| (*c, 500.0)).collect();
        bus.publish_frame("t1", &frame).unwrap();
        let snapshot = bus.snapshot();
        assert_eq!(snapshot["t1"].len(), 4);

        // Snapshot is a copy
        bus.publish("t1", Channel::North, 900.0).unwrap();
        assert_eq!(snapshot["t1"][&Channel::North], 500.0);

        assert!(bus.remove_device("t1").is_some());
        assert!(bus.is_empty());
    }

    #[test]
    fn test_retain_drops_unlisted_devices() {
        let bus = ReadingBus::new();
        for device in ["t1", "t2", "t3"] {
            bus.publish(device, Channel::North, 700.0).unwrap();
        }
        assert_eq!(bus.retain(|device_id| device_id == "t2"), 2);
        assert_eq!(bus.len(), 1);
        assert_eq!(bus.get("t2", Channel::North), Some(700.0));
    }

    #[test]
    fn test_clones_share_storage() {
        let bus = ReadingBus::new();
        let producer = bus.clone();
        producer.publish("t1", Channel::South, 42.0).unwrap();
        assert_eq!(bus.get("t1", Channel::South), Some(42.0));
        bus.clear();
        assert!(producer.is_empty());
    }
}
