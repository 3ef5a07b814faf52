// src/actuator.rs - Tower indicator actuator
use crate::config::{ActuatorConfig, ActuatorKind, Config, DeviceAlarmConfig};
use crate::error::{Result, TowerError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use metrics::counter;

/// Device-side output driven by the aggregate alarm signal
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Switch the indicator of `device_id`
    async fn set_actuator(&self, device_id: &str, on: bool) -> Result<()>;

    /// Refresh device addressing after a configuration change
    fn update_devices(&self, _devices: &[DeviceAlarmConfig]) {}
}

/// Desired indicator state for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActuatorCommand {
    pub device_id: String,
    pub on: bool,
}

// ============================================================================
// AGGREGATE SIGNAL
// ============================================================================

/// Last dispatched indicator state per device
///
/// Indicators are assumed off until told otherwise, so a device that never
/// alarms never produces a command.
#[derive(Debug, Clone, Default)]
pub struct ActuatorSignal {
    last_sent: HashMap<String, bool>,
}

impl ActuatorSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command to send for `device_id`, or `None` when nothing changed.
    ///
    /// The new state is recorded as sent whether or not the dispatch later
    /// succeeds.
    pub fn update(&mut self, device_id: &str, has_alarm: bool) -> Option<ActuatorCommand> {
        let previous = self.last_sent.get(device_id).copied().unwrap_or(false);
        if previous == has_alarm {
            return None;
        }
        self.last_sent.insert(device_id.to_string(), has_alarm);
        Some(ActuatorCommand {
            device_id: device_id.to_string(),
            on: has_alarm,
        })
    }

    pub fn last_sent(&self, device_id: &str) -> Option<bool> {
        self.last_sent.get(device_id).copied()
    }

    pub fn forget(&mut self, device_id: &str) {
        self.last_sent.remove(device_id);
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Fire-and-forget sender for actuator commands
///
/// Each device gets its own queue drained by one worker task, so commands for
/// a device land in the order they were issued even when a slow request is
/// still in flight. Devices never wait on each other.
#[derive(Clone)]
pub struct ActuatorDispatcher {
    actuator: Arc<dyn Actuator>,
    queues: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<ActuatorCommand>>>>,
    sent: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl ActuatorDispatcher {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self {
            actuator,
            queues: Arc::new(Mutex::new(HashMap::new())),
            sent: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue `command` behind any earlier command for the same device.
    /// Failures are logged and counted, never retried. Must be called inside
    /// a tokio runtime.
    pub fn dispatch(&self, command: ActuatorCommand) {
        let mut queues = self.queues.lock();

        let command = match queues.get(&command.device_id) {
            Some(queue) => match queue.send(command) {
                Ok(()) => return,
                // Worker gone, start a new one below
                Err(mpsc::error::SendError(command)) => command,
            },
            None => command,
        };

        let device_id = command.device_id.clone();
        let queue = self.spawn_worker(&device_id);
        if let Err(mpsc::error::SendError(command)) = queue.send(command) {
            warn!("Actuator queue for '{}' closed, dropping command", command.device_id);
        }
        queues.insert(device_id, queue);
    }

    fn spawn_worker(&self, device_id: &str) -> mpsc::UnboundedSender<ActuatorCommand> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ActuatorCommand>();
        let actuator = Arc::clone(&self.actuator);
        let sent = Arc::clone(&self.sent);
        let failed = Arc::clone(&self.failed);

        debug!("Starting actuator queue for '{}'", device_id);
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match actuator.set_actuator(&command.device_id, command.on).await {
                    Ok(()) => {
                        sent.fetch_add(1, Ordering::Relaxed);
                        info!(
                            "Indicator on '{}' switched {}",
                            command.device_id,
                            if command.on { "on" } else { "off" }
                        );
                        #[cfg(feature = "metrics")]
                        counter!("towerwatch_actuator_dispatch_total").increment(1);
                    }
                    Err(e) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        warn!("Actuator dispatch to '{}' failed: {}", command.device_id, e);
                        #[cfg(feature = "metrics")]
                        counter!("towerwatch_actuator_failures_total").increment(1);
                    }
                }
            }
        });
        tx
    }

    /// Refresh actuator addressing and close the queues of devices no longer
    /// configured. Pending commands on a closed queue are still delivered.
    pub fn update_devices(&self, devices: &[DeviceAlarmConfig]) {
        self.actuator.update_devices(devices);
        self.queues
            .lock()
            .retain(|device_id, _| devices.iter().any(|d| &d.device_id == device_id));
    }

    /// Devices with a live queue
    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

// ============================================================================
// IMPLEMENTATIONS
// ============================================================================

/// Actuator that only logs the requested state
#[derive(Debug, Default)]
pub struct LogActuator;

#[async_trait]
impl Actuator for LogActuator {
    async fn set_actuator(&self, device_id: &str, on: bool) -> Result<()> {
        info!("[actuator] {} -> {}", device_id, if on { "ON" } else { "OFF" });
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ActuatorRequest {
    on: bool,
}

/// Actuator posting to each tower's local HTTP API
pub struct HttpActuator {
    client: Client,
    path: String,
    addresses: RwLock<HashMap<String, String>>,
}

impl HttpActuator {
    pub fn new(config: &ActuatorConfig, devices: &[DeviceAlarmConfig]) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| TowerError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let actuator = Self {
            client,
            path: config.path.clone(),
            addresses: RwLock::new(HashMap::new()),
        };
        actuator.update_devices(devices);
        Ok(actuator)
    }

    /// Control endpoint URL of a device
    pub fn endpoint(&self, device_id: &str) -> Result<String> {
        let addresses = self.addresses.read();
        let address = addresses
            .get(device_id)
            .ok_or_else(|| TowerError::DeviceNotFound(device_id.to_string()))?;

        let base = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };

        if self.path.starts_with('/') {
            Ok(format!("{}{}", base, self.path))
        } else {
            Ok(format!("{}/{}", base, self.path))
        }
    }
}

#[async_trait]
impl Actuator for HttpActuator {
    async fn set_actuator(&self, device_id: &str, on: bool) -> Result<()> {
        let url = self.endpoint(device_id)?;
        debug!("POST {} on={}", url, on);

        let response = self
            .client
            .post(&url)
            .json(&ActuatorRequest { on })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TowerError::Actuator {
                device_id: device_id.to_string(),
                reason: format!("{} returned {}", url, status),
            })
        }
    }

    fn update_devices(&self, devices: &[DeviceAlarmConfig]) {
        let mut addresses = self.addresses.write();
        addresses.clear();
        for device in devices {
            if let Some(address) = &device.address {
                addresses.insert(device.device_id.clone(), address.clone());
            }
        }
    }
}

/// Build the actuator selected in `config`
pub fn create_actuator(config: &Config) -> Result<Arc<dyn Actuator>> {
    match config.actuator.kind {
        ActuatorKind::Log => Ok(Arc::new(LogActuator)),
        ActuatorKind::Http => Ok(Arc::new(HttpActuator::new(&config.actuator, &config.devices)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ThresholdSet;
    use crate::config::AlarmTimes;

    #[test]
    fn test_signal_dispatches_only_on_change() {
        let mut signal = ActuatorSignal::new();
        assert_eq!(signal.update("t1", false), None);
        assert_eq!(
            signal.update("t1", true),
            Some(ActuatorCommand { device_id: "t1".into(), on: true })
        );
        assert_eq!(signal.update("t1", true), None);
        assert_eq!(signal.last_sent("t1"), Some(true));
        assert_eq!(
            signal.update("t1", false),
            Some(ActuatorCommand { device_id: "t1".into(), on: false })
        );
        assert_eq!(signal.update("t2", false), None);

        signal.forget("t1");
        assert_eq!(signal.last_sent("t1"), None);
    }

    #[test]
    fn test_http_endpoint() {
        let thresholds = ThresholdSet::new(200.0, 400.0, 1600.0, 2000.0).unwrap();
        let mut a = DeviceAlarmConfig::new("a", thresholds, AlarmTimes::uniform(3));
        a.address = Some("192.168.4.1".into());
        let mut b = DeviceAlarmConfig::new("b", thresholds, AlarmTimes::uniform(3));
        b.address = Some("https://tower-b.local:8443/".into());
        let c = DeviceAlarmConfig::new("c", thresholds, AlarmTimes::uniform(3));

        let actuator = HttpActuator::new(&ActuatorConfig::default(), &[a, b, c]).unwrap();
        assert_eq!(actuator.endpoint("a").unwrap(), "http://192.168.4.1/api/light");
        assert_eq!(actuator.endpoint("b").unwrap(), "https://tower-b.local:8443/api/light");
        assert!(matches!(actuator.endpoint("c"), Err(TowerError::DeviceNotFound(_))));
    }

    async fn settle(dispatcher: &ActuatorDispatcher, expected: u64) {
        for _ in 0..100 {
            if dispatcher.sent_count() + dispatcher.failure_count() >= expected {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_dispatch_counts_outcomes() {
        let mut mock = MockActuator::new();
        mock.expect_set_actuator()
            .withf(|device_id, on| device_id.to_string() == "t1" && *on)
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_set_actuator()
            .withf(|device_id, _| device_id.to_string() == "t2")
            .times(1)
            .returning(|device_id, _| {
                Err(TowerError::Actuator {
                    device_id: device_id.to_string(),
                    reason: "status 503".into(),
                })
            });

        let dispatcher = ActuatorDispatcher::new(Arc::new(mock));
        dispatcher.dispatch(ActuatorCommand { device_id: "t1".into(), on: true });
        dispatcher.dispatch(ActuatorCommand { device_id: "t2".into(), on: false });
        settle(&dispatcher, 2).await;

        assert_eq!(dispatcher.sent_count(), 1);
        assert_eq!(dispatcher.failure_count(), 1);
        assert_eq!(dispatcher.queue_count(), 2);
    }

    /// Switching on takes longer than a tick; switching off is immediate
    #[derive(Default)]
    struct SlowOn {
        landed: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl Actuator for SlowOn {
        async fn set_actuator(&self, device_id: &str, on: bool) -> Result<()> {
            if on {
                tokio::time::sleep(Duration::from_millis(2500)).await;
            }
            self.landed.lock().push((device_id.to_string(), on));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_for_a_device_land_in_order() {
        let actuator = Arc::new(SlowOn::default());
        let dispatcher = ActuatorDispatcher::new(actuator.clone());

        dispatcher.dispatch(ActuatorCommand { device_id: "t1".into(), on: true });
        tokio::time::sleep(Duration::from_millis(1000)).await;
        dispatcher.dispatch(ActuatorCommand { device_id: "t1".into(), on: false });
        // Another tower is not held up by t1's slow request
        dispatcher.dispatch(ActuatorCommand { device_id: "t2".into(), on: false });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*actuator.landed.lock(), vec![("t2".to_string(), false)]);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(
            *actuator.landed.lock(),
            vec![
                ("t2".to_string(), false),
                ("t1".to_string(), true),
                ("t1".to_string(), false),
            ]
        );
        assert_eq!(dispatcher.sent_count(), 3);
    }

    #[tokio::test]
    async fn test_removed_device_queue_is_closed() {
        let dispatcher = ActuatorDispatcher::new(Arc::new(LogActuator));
        dispatcher.dispatch(ActuatorCommand { device_id: "t1".into(), on: true });
        settle(&dispatcher, 1).await;
        assert_eq!(dispatcher.queue_count(), 1);

        dispatcher.update_devices(&[]);
        assert_eq!(dispatcher.queue_count(), 0);

        // A later command starts a fresh queue
        dispatcher.dispatch(ActuatorCommand { device_id: "t1".into(), on: false });
        settle(&dispatcher, 2).await;
        assert_eq!(dispatcher.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_log_actuator_always_succeeds() {
        assert!(LogActuator.set_actuator("t1", true).await.is_ok());
    }
}
