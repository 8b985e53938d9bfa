//! In-memory heart rate sensor.
//!
//! Backs the `--simulate` mode of the binary and the test suites: command
//! acknowledgements can be held back or failed on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tracing::debug;
use uuid::Uuid;

use crate::client::HrClient;
use crate::error::TransportError;
use crate::gatt::{AttStatus, BODY_SENSOR_LOCATION, HEART_RATE_MEASUREMENT};
use crate::heartrate_measurement::{encode, HeartRateMeasurement};
use crate::transport::GattTransport;

pub struct SimulatedTransport {
    connected: AtomicBool,
    notifying: AtomicBool,
    hold_acks: AtomicBool,
    acks: Semaphore,
    fail_enable: AtomicBool,
    fail_disable: AtomicBool,
    enable_count: AtomicUsize,
    disable_count: AtomicUsize,
    answered: watch::Sender<usize>,
    body_sensor_location: Mutex<Option<u8>>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    /// A connected sensor worn on the chest that acknowledges immediately.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            notifying: AtomicBool::new(false),
            hold_acks: AtomicBool::new(false),
            acks: Semaphore::new(0),
            fail_enable: AtomicBool::new(false),
            fail_disable: AtomicBool::new(false),
            enable_count: AtomicUsize::new(0),
            disable_count: AtomicUsize::new(0),
            answered: watch::channel(0).0,
            body_sensor_location: Mutex::new(Some(1)),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if !connected {
            self.notifying.store(false, Ordering::SeqCst);
        }
    }

    pub fn set_body_sensor_location(&self, location: Option<u8>) {
        *self.body_sensor_location.lock() = location;
    }

    /// While held, every command waits for a [`release_acks`](Self::release_acks) permit.
    pub fn hold_acks(&self, hold: bool) {
        self.hold_acks.store(hold, Ordering::SeqCst);
    }

    pub fn release_acks(&self, count: usize) {
        self.acks.add_permits(count);
    }

    pub fn fail_next_enable(&self) {
        self.fail_enable.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_disable(&self) {
        self.fail_disable.store(true, Ordering::SeqCst);
    }

    pub fn enable_count(&self) -> usize {
        self.enable_count.load(Ordering::SeqCst)
    }

    pub fn disable_count(&self) -> usize {
        self.disable_count.load(Ordering::SeqCst)
    }

    pub fn is_notifying(&self) -> bool {
        self.notifying.load(Ordering::SeqCst)
    }

    /// Resolves once `count` enable/disable commands have been answered,
    /// successfully or not.
    ///
    /// The answer is recorded from inside the caller's command future, so on
    /// a current-thread runtime the caller has finished handling it by the
    /// time this resolves.
    pub async fn answered(&self, count: usize) {
        let mut rx = self.answered.subscribe();
        let _ = rx.wait_for(|answered| *answered >= count).await;
    }

    async fn acknowledge(&self, fail: &AtomicBool) -> Result<(), TransportError> {
        let result = self.wait_for_ack(fail).await;
        self.answered.send_modify(|answered| *answered += 1);
        result
    }

    async fn wait_for_ack(&self, fail: &AtomicBool) -> Result<(), TransportError> {
        if self.hold_acks.load(Ordering::SeqCst) {
            if let Ok(permit) = self.acks.acquire().await {
                permit.forget();
            }
        }

        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        if fail.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Rejected("simulated failure".into()));
        }

        Ok(())
    }
}

#[async_trait]
impl GattTransport for SimulatedTransport {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read_characteristic(
        &self,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let location = *self.body_sensor_location.lock();
        match location {
            Some(location) if characteristic == BODY_SENSOR_LOCATION => Ok(vec![location]),
            _ => Err(TransportError::CharacteristicNotFound(characteristic)),
        }
    }

    async fn enable_notifications(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<(), TransportError> {
        self.enable_count.fetch_add(1, Ordering::SeqCst);
        self.acknowledge(&self.fail_enable).await?;
        self.notifying.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disable_notifications(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<(), TransportError> {
        self.disable_count.fetch_add(1, Ordering::SeqCst);
        self.acknowledge(&self.fail_disable).await?;
        self.notifying.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Synthetic heart rate in the 60..=90 bpm range following a triangle wave.
pub fn synthetic_measurement(tick: u64) -> HeartRateMeasurement {
    let phase = (tick % 60) as u16;
    let heart_rate = 60 + if phase < 30 { phase } else { 60 - phase };
    let rr = (60 * 1024 / u32::from(heart_rate)) as u16;

    HeartRateMeasurement {
        heart_rate,
        sensor_contact_detected: true,
        sensor_contact_supported: true,
        energy_expended: 0,
        rr_intervals: vec![rr],
    }
}

/// Pushes a synthetic packet into `client` every `period` while the sensor
/// has notifications enabled. Runs until the task is dropped.
pub async fn run_sensor(transport: Arc<SimulatedTransport>, client: Arc<HrClient>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    let mut tick = 0u64;

    loop {
        interval.tick().await;
        if !transport.is_notifying() {
            continue;
        }

        let packet = encode(&synthetic_measurement(tick));
        debug!(tick, ?packet, "simulated notification");
        client.on_characteristic_update(HEART_RATE_MEASUREMENT, &packet, AttStatus::SUCCESS);
        tick += 1;
    }
}
