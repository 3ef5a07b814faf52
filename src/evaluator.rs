// src/evaluator.rs - One synchronous evaluation pass over every tower
use crate::actuator::{ActuatorCommand, ActuatorSignal};
use crate::alarms::{list_active_alarms, AlarmEvent, AlarmState, AlarmStore, Transition};
use crate::config::{Channel, DeviceAlarmConfig};
use crate::confirm::{evaluate, Evaluation};
use crate::readings::Readings;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, trace, warn};

/// Everything a tick produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Alarm transitions, in device then channel order
    pub events: Vec<AlarmEvent>,

    /// Indicator changes to dispatch
    pub commands: Vec<ActuatorCommand>,

    /// Channels that had a reading this tick
    pub sampled: usize,
}

/// Threshold alarm evaluator
///
/// Owns the device configurations, the latest readings handed to it and the
/// alarm store. Inputs are replaced through setters and [`tick`](Self::tick)
/// runs one pass over them.
#[derive(Debug, Default)]
pub struct Evaluator {
    devices: BTreeMap<String, DeviceAlarmConfig>,
    readings: Readings,
    store: AlarmStore,
    signal: ActuatorSignal,
    tick_count: u64,
}

impl Evaluator {
    pub fn new(devices: impl IntoIterator<Item = DeviceAlarmConfig>) -> Self {
        let mut evaluator = Self::default();
        evaluator.set_devices(devices);
        evaluator
    }

    /// Replace the device configuration list.
    ///
    /// Inactive or invalid devices are dropped together with their buffers
    /// and alarm states. Devices whose thresholds or alarm times changed get
    /// fresh buffers and inactive states; other edits keep their state.
    /// Returns the number of devices that were (re)initialised.
    pub fn set_devices(&mut self, devices: impl IntoIterator<Item = DeviceAlarmConfig>) -> usize {
        let mut incoming = BTreeMap::new();
        for device in devices {
            if !device.active {
                debug!("Device '{}' inactive, not evaluated", device.device_id);
                continue;
            }
            if let Err(e) = device.validate() {
                warn!("Skipping device '{}': {}", device.device_id, e);
                continue;
            }
            incoming.insert(device.device_id.clone(), device);
        }

        let removed: Vec<String> = self
            .devices
            .keys()
            .filter(|id| !incoming.contains_key(*id))
            .cloned()
            .collect();
        for device_id in removed {
            info!("Device '{}' removed from evaluation", device_id);
            self.store.remove_device(&device_id);
            self.signal.forget(&device_id);
        }

        let mut reset = 0;
        for (device_id, device) in &incoming {
            let changed = match self.devices.get(device_id) {
                Some(current) => current.needs_reset(device),
                None => true,
            };
            if changed || !self.store.contains_device(device_id) {
                debug!(
                    "Initialising '{}' with window of {} samples",
                    device_id,
                    device.alarm_times.capacity()
                );
                self.store.reset_device(device);
                reset += 1;
            }
        }

        self.devices = incoming;
        reset
    }

    /// Replace every latest reading
    ///
    /// Non-finite values are dropped, leaving that channel without a reading.
    pub fn set_readings(&mut self, mut readings: Readings) {
        for (device_id, frame) in readings.iter_mut() {
            frame.retain(|channel, value| {
                let finite = value.is_finite();
                if !finite {
                    warn!("Ignoring non-finite reading {}/{} = {}", device_id, channel, value);
                }
                finite
            });
        }
        self.readings = readings;
    }

    /// Update the latest reading of one channel
    ///
    /// A non-finite value clears the channel's reading instead, so it is
    /// skipped until a usable value arrives.
    pub fn set_reading(&mut self, device_id: &str, channel: Channel, value: f64) {
        if !value.is_finite() {
            warn!("Ignoring non-finite reading {}/{} = {}", device_id, channel, value);
            if let Some(frame) = self.readings.get_mut(device_id) {
                frame.remove(&channel);
            }
            return;
        }
        self.readings
            .entry(device_id.to_string())
            .or_default()
            .insert(channel, value);
    }

    /// Run one evaluation pass at `now`.
    ///
    /// Channels without a reading are skipped and keep their state.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        self.tick_count += 1;

        for (device_id, device) in &self.devices {
            let Some(frame) = self.readings.get(device_id) else {
                trace!("No readings for '{}' yet", device_id);
                continue;
            };

            for channel in Channel::ALL {
                let Some(value) = frame.get(&channel).copied() else {
                    continue;
                };
                let Some(slot) = self.store.slot_mut(device_id, channel) else {
                    continue;
                };
                report.sampled += 1;

                let evaluation = evaluate(device, value, &mut slot.buffer);
                slot.last_evaluation = Some(evaluation);

                match evaluation {
                    Evaluation::Pending { candidate, have, need } => trace!(
                        "{}/{} {} candidate pending ({}/{} samples)",
                        device_id, channel, candidate, have, need
                    ),
                    Evaluation::Rejected { candidate, average } => trace!(
                        "{}/{} {} candidate rejected, average {:.1}",
                        device_id, channel, candidate, average
                    ),
                    _ => {}
                }

                if let Some(transition) = slot.state.apply(&evaluation, value, now) {
                    let event = AlarmEvent {
                        device_id: device_id.clone(),
                        channel,
                        transition,
                        value,
                        average: evaluation.average(),
                        timestamp: now,
                    };
                    match transition {
                        Transition::Resolved { .. } => info!("{}", event),
                        _ => warn!("{}", event),
                    }
                    report.events.push(event);
                }
            }

            let has_alarm = self.store.device_has_alarm(device_id);
            if let Some(command) = self.signal.update(device_id, has_alarm) {
                report.commands.push(command);
            }
        }

        report
    }

    pub fn store(&self) -> &AlarmStore {
        &self.store
    }

    /// Active alarms, ordered by device then channel
    pub fn active_alarms(&self) -> impl Iterator<Item = (&str, Channel, &AlarmState)> {
        list_active_alarms(&self.store)
    }

    pub fn state(&self, device_id: &str, channel: Channel) -> Option<&AlarmState> {
        self.store.state(device_id, channel)
    }

    /// Diagnostics of the latest evaluation of a channel
    pub fn last_evaluation(&self, device_id: &str, channel: Channel) -> Option<Evaluation> {
        self.store
            .slot(device_id, channel)
            .and_then(|slot| slot.last_evaluation)
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceAlarmConfig> {
        self.devices.get(device_id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceAlarmConfig> {
        self.devices.values()
    }

    /// Last indicator state handed out for dispatch
    pub fn actuator_state(&self, device_id: &str) -> Option<bool> {
        self.signal.last_sent(device_id)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{AlarmClass, ThresholdSet};
    use crate::config::AlarmTimes;

    fn device(id: &str) -> DeviceAlarmConfig {
        let thresholds = ThresholdSet::new(200.0, 400.0, 1600.0, 2000.0).unwrap();
        DeviceAlarmConfig::new(id, thresholds, AlarmTimes::uniform(3))
    }

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_inactive_and_invalid_devices_skipped() {
        let mut off = device("off");
        off.active = false;
        let mut broken = device("broken");
        broken.alarm_times = AlarmTimes::uniform(0);

        let ev = Evaluator::new(vec![device("on"), off, broken]);
        assert_eq!(ev.devices().count(), 1);
        assert!(ev.store().contains_device("on"));
        assert!(!ev.store().contains_device("off"));
        assert!(!ev.store().contains_device("broken"));
    }

    #[test]
    fn test_missing_reading_keeps_state() {
        let mut ev = Evaluator::new(vec![device("t1")]);
        for _ in 0..3 {
            ev.set_reading("t1", Channel::North, 1700.0);
            ev.tick(now());
        }
        assert!(ev.state("t1", Channel::North).unwrap().is_active);

        ev.set_readings(Readings::new());
        let report = ev.tick(now());
        assert_eq!(report.sampled, 0);
        assert!(report.events.is_empty());
        assert!(ev.state("t1", Channel::North).unwrap().is_active);
    }

    #[test]
    fn test_config_change_resets_buffers() {
        let mut ev = Evaluator::new(vec![device("t1")]);
        for _ in 0..3 {
            ev.set_reading("t1", Channel::East, 150.0);
            ev.tick(now());
        }
        assert_eq!(ev.actuator_state("t1"), Some(true));

        // Address edits keep state
        let mut edited = device("t1");
        edited.address = Some("10.0.0.9".into());
        assert_eq!(ev.set_devices(vec![edited.clone()]), 0);
        assert!(ev.state("t1", Channel::East).unwrap().is_active);

        // Window change re-initialises
        edited.alarm_times = AlarmTimes::uniform(5);
        assert_eq!(ev.set_devices(vec![edited]), 1);
        let slot = ev.store().slot("t1", Channel::East).unwrap();
        assert_eq!(slot.buffer.capacity(), 5);
        assert!(!slot.state.is_active);

        // Aggregate now false, so the indicator is switched off
        ev.set_reading("t1", Channel::East, 150.0);
        let report = ev.tick(now());
        assert_eq!(
            report.commands,
            vec![ActuatorCommand { device_id: "t1".into(), on: false }]
        );
    }

    #[test]
    fn test_removed_device_is_forgotten() {
        let mut ev = Evaluator::new(vec![device("t1"), device("t2")]);
        for _ in 0..3 {
            ev.set_reading("t1", Channel::North, 2500.0);
            ev.tick(now());
        }
        assert_eq!(ev.active_alarms().count(), 1);

        ev.set_devices(vec![device("t2")]);
        assert_eq!(ev.active_alarms().count(), 0);
        assert_eq!(ev.actuator_state("t1"), None);
        assert!(ev.device("t1").is_none());

        // Readings for unknown devices are ignored
        let report = ev.tick(now());
        assert_eq!(report.sampled, 0);
    }

    #[test]
    fn test_non_finite_readings_never_enter_the_window() {
        let mut ev = Evaluator::new(vec![device("t1")]);

        ev.set_reading("t1", Channel::North, f64::NAN);
        let report = ev.tick(now());
        assert_eq!(report.sampled, 0);

        for _ in 0..2 {
            ev.set_reading("t1", Channel::North, 2500.0);
            ev.tick(now());
        }
        assert_eq!(
            ev.last_evaluation("t1", Channel::North),
            Some(Evaluation::Pending { candidate: AlarmClass::HighHigh, have: 2, need: 3 })
        );

        // A bad value replaces the stale one rather than re-using it
        ev.set_reading("t1", Channel::North, f64::INFINITY);
        assert_eq!(ev.tick(now()).sampled, 0);

        let mut readings = Readings::new();
        readings.entry("t1".into()).or_default().insert(Channel::North, f64::NAN);
        readings.entry("t1".into()).or_default().insert(Channel::East, 2500.0);
        ev.set_readings(readings);
        assert_eq!(ev.tick(now()).sampled, 1);

        ev.set_reading("t1", Channel::North, 2500.0);
        ev.tick(now());
        let state = ev.state("t1", Channel::North).unwrap();
        assert!(state.is_active);
        assert_eq!(state.average_value, Some(2500.0));
    }

    #[test]
    fn test_last_evaluation_diagnostics() {
        let mut ev = Evaluator::new(vec![device("t1")]);
        ev.set_reading("t1", Channel::South, 1700.0);
        ev.tick(now());
        assert_eq!(
            ev.last_evaluation("t1", Channel::South),
            Some(Evaluation::Pending { candidate: AlarmClass::High, have: 1, need: 3 })
        );
        assert_eq!(ev.last_evaluation("t1", Channel::West), None);
        assert_eq!(ev.tick_count(), 1);
    }
}
