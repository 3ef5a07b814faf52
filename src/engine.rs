// src/engine.rs
use crate::{
    actuator::{create_actuator, Actuator, ActuatorDispatcher},
    alarms::AlarmEvent,
    config::{validate_devices, ActuatorConfig, Config, DeviceAlarmConfig, EngineConfig},
    error::*,
    evaluator::{Evaluator, TickReport},
    readings::ReadingBus,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug, Serialize)]
pub struct EngineStats {
    pub running: bool,
    pub tick_count: u64,
    pub watchdog_rearms: u64,
    pub actuator_sent: u64,
    pub actuator_failures: u64,
    pub uptime_secs: u64,
    pub device_count: usize,
    pub active_alarms: usize,
}

/// Detects a tick timer that stopped firing
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    stall_after: Duration,
}

impl Watchdog {
    pub fn new(stall_after: Duration) -> Self {
        Self { stall_after }
    }

    pub fn is_stalled(&self, last_tick: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_tick) > self.stall_after
    }
}

/// Everything one tick needs, cheap to clone into the timer task
#[derive(Clone)]
struct TickContext {
    evaluator: Arc<Mutex<Evaluator>>,
    bus: ReadingBus,
    dispatcher: ActuatorDispatcher,
    heartbeat: Arc<Mutex<Instant>>,
    ticks: Arc<AtomicU64>,
    events: broadcast::Sender<AlarmEvent>,
}

impl TickContext {
    fn run(&self) -> TickReport {
        let readings = self.bus.snapshot();
        let report = {
            let mut evaluator = self.evaluator.lock();
            evaluator.set_readings(readings);
            evaluator.tick(Utc::now())
        };

        *self.heartbeat.lock() = Instant::now();
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "Tick {} sampled {} channels, {} events",
            tick,
            report.sampled,
            report.events.len()
        );

        #[cfg(feature = "metrics")]
        {
            counter!("towerwatch_ticks_total").increment(1);
            counter!("towerwatch_alarm_events_total").increment(report.events.len() as u64);
        }

        for event in &report.events {
            // No subscribers is fine
            let _ = self.events.send(event.clone());
        }

        for command in report.commands.iter().cloned() {
            self.dispatcher.dispatch(command);
        }

        report
    }
}

/// Timer-driven alarm runtime
///
/// A ticker task runs [`Evaluator::tick`] every `tick_ms`; a watchdog loop in
/// [`run`](Self::run) re-arms the ticker when it has been silent for
/// `tick_ms * watchdog_factor`.
pub struct Engine {
    config: EngineConfig,
    actuator: ActuatorConfig,
    context: TickContext,
    watchdog: Watchdog,
    running: Arc<AtomicBool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    rearms: Arc<AtomicU64>,
    start_time: Instant,
}

impl Engine {
    pub fn new(config: &Config, bus: ReadingBus, actuator: Arc<dyn Actuator>) -> Result<Self> {
        config.validate()?;

        let evaluator = Evaluator::new(config.devices.iter().cloned());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        #[cfg(feature = "metrics")]
        gauge!("towerwatch_tick_interval_ms").set(config.engine.tick_ms as f64);

        info!(
            "Engine configured for {} devices, tick {} ms",
            config.active_devices().count(),
            config.engine.tick_ms
        );

        Ok(Self {
            config: config.engine.clone(),
            actuator: config.actuator.clone(),
            context: TickContext {
                evaluator: Arc::new(Mutex::new(evaluator)),
                bus,
                dispatcher: ActuatorDispatcher::new(actuator),
                heartbeat: Arc::new(Mutex::new(Instant::now())),
                ticks: Arc::new(AtomicU64::new(0)),
                events,
            },
            watchdog: Watchdog::new(config.engine.stall_after()),
            running: Arc::new(AtomicBool::new(false)),
            ticker: Mutex::new(None),
            rearms: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        })
    }

    /// Engine with a fresh reading bus and the configured actuator
    pub fn from_config(config: &Config) -> Result<Self> {
        let actuator = create_actuator(config)?;
        Self::new(config, ReadingBus::new(), actuator)
    }

    /// Run until [`stop`](Self::stop) is called
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TowerError::Config("Engine is already running".into()));
        }

        info!("Starting towerwatch engine with tick: {}ms", self.config.tick_ms);
        self.arm_ticker();

        let mut watchdog = interval(self.config.tick_interval());
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.running.load(Ordering::SeqCst) {
            watchdog.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if self.ticker_stalled() {
                let rearms = self.rearms.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Tick timer stalled, re-arming (#{})", rearms);
                #[cfg(feature = "metrics")]
                counter!("towerwatch_watchdog_rearms_total").increment(1);
                self.arm_ticker();
            }
        }

        self.disarm_ticker();
        info!("Towerwatch engine stopped");
        Ok(())
    }

    pub fn stop(&self) {
        info!("Stopping towerwatch engine");
        self.running.store(false, Ordering::SeqCst);
        self.disarm_ticker();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one evaluation pass immediately. Must be called inside a tokio
    /// runtime, actuator commands are dispatched on detached tasks.
    pub fn tick_once(&self) -> TickReport {
        self.context.run()
    }

    /// Replace device configurations at runtime
    ///
    /// The list is validated as a whole, the same way a configuration file
    /// is; on error nothing changes. Readings and actuator queues of devices
    /// missing from the list are dropped.
    pub fn apply_devices(&self, devices: Vec<DeviceAlarmConfig>) -> Result<usize> {
        validate_devices(&devices, &self.actuator)?;

        self.context.dispatcher.update_devices(&devices);
        let dropped = self
            .context
            .bus
            .retain(|device_id| devices.iter().any(|d| d.device_id == device_id));
        if dropped > 0 {
            debug!("Dropped readings of {} unconfigured devices", dropped);
        }

        let reset = self.context.evaluator.lock().set_devices(devices);
        info!("Applied device configuration, {} devices re-initialised", reset);
        Ok(reset)
    }

    /// Receive every alarm transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.context.events.subscribe()
    }

    pub fn reading_bus(&self) -> &ReadingBus {
        &self.context.bus
    }

    /// Shared evaluator, for queries
    pub fn evaluator(&self) -> Arc<Mutex<Evaluator>> {
        Arc::clone(&self.context.evaluator)
    }

    pub fn stats(&self) -> EngineStats {
        let evaluator = self.context.evaluator.lock();
        EngineStats {
            running: self.is_running(),
            tick_count: self.context.ticks.load(Ordering::Relaxed),
            watchdog_rearms: self.rearms.load(Ordering::Relaxed),
            actuator_sent: self.context.dispatcher.sent_count(),
            actuator_failures: self.context.dispatcher.failure_count(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            device_count: evaluator.devices().count(),
            active_alarms: evaluator.active_alarms().count(),
        }
    }

    fn ticker_stalled(&self) -> bool {
        let last_tick = *self.context.heartbeat.lock();
        self.watchdog.is_stalled(last_tick, Instant::now())
    }

    /// Cancel any existing ticker and start a new one
    fn arm_ticker(&self) {
        let mut ticker = self.ticker.lock();
        if let Some(handle) = ticker.take() {
            handle.abort();
        }

        *self.context.heartbeat.lock() = Instant::now();
        let context = self.context.clone();
        let period = self.config.tick_interval();

        *ticker = Some(tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                context.run();
            }
        }));
    }

    fn disarm_ticker(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.disarm_ticker();
    }
}
