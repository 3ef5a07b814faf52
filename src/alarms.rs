// File: src/alarms.rs
// Per-channel alarm state tracking for tower stations
//
// Each (device, channel) pair owns a sample window and an alarm state. The
// state machine only has two states, Inactive and Active(class); transitions
// are driven by the confirmation result of each tick.

use crate::buffer::SampleBuffer;
use crate::classify::AlarmClass;
use crate::config::{Channel, DeviceAlarmConfig};
use crate::confirm::Evaluation;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

// ==========================================
// SECTION 1: ALARM STATE
// ==========================================

/// Runtime alarm state of one channel
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlarmState {
    /// Whether a confirmed alarm is standing
    pub is_active: bool,

    /// Confirmed class while active
    pub alarm_type: Option<AlarmClass>,

    /// Timestamp when the alarm first activated
    pub start_time: Option<DateTime<Utc>>,

    /// Reading of the latest evaluated tick while active
    pub current_value: Option<f64>,

    /// Windowed mean of the latest evaluated tick while active
    pub average_value: Option<f64>,

    /// Number of activations since the state was created
    pub activation_count: u64,
}

/// Edge produced by [`AlarmState::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// Inactive to Active
    Activated { class: AlarmClass },

    /// Active with a different confirmed class
    Reclassified { from: AlarmClass, to: AlarmClass },

    /// Active to Inactive
    Resolved { class: AlarmClass, active_for_ms: i64 },
}

impl AlarmState {
    /// Apply one evaluation taken at `now` with the raw reading `value`.
    ///
    /// Warming-up results leave the state untouched. A class change while
    /// active updates the class in place and keeps `start_time`.
    pub fn apply(&mut self, evaluation: &Evaluation, value: f64, now: DateTime<Utc>) -> Option<Transition> {
        if !evaluation.is_evaluated() {
            return None;
        }

        match (self.alarm_type, evaluation.confirmed()) {
            (None, Some(class)) => {
                self.is_active = true;
                self.alarm_type = Some(class);
                self.start_time = Some(now);
                self.current_value = Some(value);
                self.average_value = evaluation.average();
                self.activation_count += 1;
                Some(Transition::Activated { class })
            }
            (Some(active), Some(class)) => {
                self.current_value = Some(value);
                self.average_value = evaluation.average();
                if active == class {
                    None
                } else {
                    self.alarm_type = Some(class);
                    Some(Transition::Reclassified { from: active, to: class })
                }
            }
            (Some(active), None) => {
                let active_for_ms = self
                    .duration(now)
                    .map(|d| d.num_milliseconds())
                    .unwrap_or(0);
                self.is_active = false;
                self.alarm_type = None;
                self.start_time = None;
                self.current_value = None;
                self.average_value = None;
                Some(Transition::Resolved { class: active, active_for_ms })
            }
            (None, None) => None,
        }
    }

    /// Time spent in the current alarm
    pub fn duration(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.start_time.map(|start| now - start)
    }
}

// ==========================================
// SECTION 2: ALARM EVENTS
// ==========================================

/// Alarm transition attributed to a tower channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmEvent {
    pub device_id: String,
    pub channel: Channel,
    pub transition: Transition,
    pub value: f64,
    pub average: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for AlarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transition {
            Transition::Activated { class } => write!(
                f,
                "{}/{} {} alarm activated at {:.1} N",
                self.device_id, self.channel, class, self.value
            ),
            Transition::Reclassified { from, to } => write!(
                f,
                "{}/{} alarm changed {} -> {} at {:.1} N",
                self.device_id, self.channel, from, to, self.value
            ),
            Transition::Resolved { class, active_for_ms } => write!(
                f,
                "{}/{} {} alarm resolved after {} ms",
                self.device_id, self.channel, class, active_for_ms
            ),
        }
    }
}

// ==========================================
// SECTION 3: ALARM STORE
// ==========================================

/// Store key: one tower channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub device_id: String,
    pub channel: Channel,
}

impl SlotKey {
    pub fn new(device_id: impl Into<String>, channel: Channel) -> Self {
        Self {
            device_id: device_id.into(),
            channel,
        }
    }
}

/// Sample window, alarm state and last diagnostics of one channel
#[derive(Debug, Clone)]
pub struct ChannelSlot {
    pub buffer: SampleBuffer,
    pub state: AlarmState,
    pub last_evaluation: Option<Evaluation>,
}

impl ChannelSlot {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: SampleBuffer::new(capacity),
            state: AlarmState::default(),
            last_evaluation: None,
        }
    }
}

/// Owned map of every evaluated tower channel
#[derive(Debug, Clone, Default)]
pub struct AlarmStore {
    slots: BTreeMap<SlotKey, ChannelSlot>,
}

impl AlarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create fresh slots for all four channels of `config`, replacing any
    /// existing ones.
    pub fn reset_device(&mut self, config: &DeviceAlarmConfig) {
        let capacity = config.alarm_times.capacity();
        for channel in Channel::ALL {
            self.slots.insert(
                SlotKey::new(config.device_id.as_str(), channel),
                ChannelSlot::new(capacity),
            );
        }
    }

    /// Drop every slot of `device_id`
    pub fn remove_device(&mut self, device_id: &str) {
        self.slots.retain(|key, _| key.device_id != device_id);
    }

    pub fn contains_device(&self, device_id: &str) -> bool {
        self.slots.keys().any(|key| key.device_id == device_id)
    }

    pub fn slot(&self, device_id: &str, channel: Channel) -> Option<&ChannelSlot> {
        self.slots.get(&SlotKey::new(device_id, channel))
    }

    pub fn slot_mut(&mut self, device_id: &str, channel: Channel) -> Option<&mut ChannelSlot> {
        self.slots.get_mut(&SlotKey::new(device_id, channel))
    }

    pub fn state(&self, device_id: &str, channel: Channel) -> Option<&AlarmState> {
        self.slot(device_id, channel).map(|slot| &slot.state)
    }

    /// OR of `is_active` over the device's channels
    pub fn device_has_alarm(&self, device_id: &str) -> bool {
        self.slots
            .iter()
            .any(|(key, slot)| key.device_id == device_id && slot.state.is_active)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SlotKey, &ChannelSlot)> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Every active alarm in the store, ordered by device then channel.
///
/// Pure query: calling it again restarts from the beginning.
pub fn list_active_alarms(store: &AlarmStore) -> impl Iterator<Item = (&str, Channel, &AlarmState)> {
    store
        .iter()
        .filter(|(_, slot)| slot.state.is_active)
        .map(|(key, slot)| (key.device_id.as_str(), key.channel, &slot.state))
}

// ==========================================
// SECTION 4: TESTS
// ==========================================
