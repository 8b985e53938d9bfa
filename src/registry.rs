//! Observer registry for the heart rate measurement characteristic.
//!
//! Notifications are enabled on the peripheral when the first observer
//! attaches and disabled when the last one leaves. Commands run on the tokio
//! runtime and their acknowledgements re-enter the state machine later, so the
//! state lock is never held across a transport round trip.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{NotificationCommand, StreamError, TransportError};
use crate::heartrate_measurement::{self, HeartRateMeasurement};
use crate::transport::GattTransport;

pub type ObserverId = u64;

type Delivery = Result<HeartRateMeasurement, StreamError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationState {
    Idle,
    Enabling,
    Active,
    Disabling,
}

struct SubscriptionState {
    observers: BTreeMap<ObserverId, mpsc::UnboundedSender<Delivery>>,
    state: NotificationState,
    /// Bumped on every reset so acknowledgements from an earlier epoch are ignored.
    epoch: u64,
    next_id: ObserverId,
}

impl SubscriptionState {
    fn new() -> Self {
        Self {
            observers: BTreeMap::new(),
            state: NotificationState::Idle,
            epoch: 0,
            next_id: 0,
        }
    }

    fn fail_all(&mut self, error: StreamError) {
        for tx in std::mem::take(&mut self.observers).into_values() {
            let _ = tx.send(Err(error.clone()));
        }
        self.state = NotificationState::Idle;
        self.epoch += 1;
    }
}

pub struct SubscriptionRegistry {
    transport: Arc<dyn GattTransport>,
    service: Uuid,
    characteristic: Uuid,
    runtime: Handle,
    inner: Mutex<SubscriptionState>,
    state_tx: watch::Sender<NotificationState>,
}

impl SubscriptionRegistry {
    /// Must be called from within a tokio runtime; commands are spawned on it.
    pub fn new(
        transport: Arc<dyn GattTransport>,
        service: Uuid,
        characteristic: Uuid,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(NotificationState::Idle);

        Arc::new(Self {
            transport,
            service,
            characteristic,
            runtime: Handle::current(),
            inner: Mutex::new(SubscriptionState::new()),
            state_tx,
        })
    }

    pub fn state(&self) -> NotificationState {
        self.inner.lock().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<NotificationState> {
        self.state_tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// Registers a new observer. Measurements reach it once notifications
    /// are acknowledged as enabled.
    pub fn attach(self: &Arc<Self>) -> HrStream {
        let (tx, rx) = mpsc::unbounded_channel();

        let (id, command) = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.insert(id, tx);

            let command = match inner.state {
                NotificationState::Idle => {
                    inner.state = NotificationState::Enabling;
                    self.publish(inner.state);
                    Some((NotificationCommand::Enable, inner.epoch))
                }
                // A disable in flight is followed by a fresh enable once it completes.
                NotificationState::Enabling
                | NotificationState::Active
                | NotificationState::Disabling => None,
            };
            (id, command)
        };

        debug!(observer = id, "observer attached");
        if let Some((command, epoch)) = command {
            self.dispatch(command, epoch);
        }

        HrStream {
            rx,
            registry: Arc::downgrade(self),
            id: Some(id),
        }
    }

    /// Removes an observer. Unknown or already removed observers are ignored.
    pub fn detach(self: &Arc<Self>, id: ObserverId) {
        let command = {
            let mut inner = self.inner.lock();
            if inner.observers.remove(&id).is_none() {
                return;
            }
            debug!(observer = id, remaining = inner.observers.len(), "observer detached");

            if !inner.observers.is_empty() {
                return;
            }

            match inner.state {
                NotificationState::Active => {
                    inner.state = NotificationState::Disabling;
                    self.publish(inner.state);
                    Some((NotificationCommand::Disable, inner.epoch))
                }
                // Enabling: the disable is sent once the enable is acknowledged.
                _ => None,
            }
        };

        if let Some((command, epoch)) = command {
            self.dispatch(command, epoch);
        }
    }

    /// Decodes a notification and fans it out to every observer.
    ///
    /// Malformed packets are dropped; they do not end any stream.
    pub fn on_packet(&self, data: &[u8]) {
        let measurement = match heartrate_measurement::decode(data) {
            Ok(measurement) => measurement,
            Err(err) => {
                debug!(%err, len = data.len(), "dropping heart rate packet");
                return;
            }
        };

        let inner = self.inner.lock();
        if inner.state != NotificationState::Active {
            trace!(state = ?inner.state, "measurement outside active subscription");
            return;
        }

        for tx in inner.observers.values() {
            let _ = tx.send(Ok(measurement.clone()));
        }
    }

    /// Fails every observer with [`StreamError::LinkLost`]. No disable is sent.
    pub fn on_disconnected(&self) {
        let mut inner = self.inner.lock();
        debug!(observers = inner.observers.len(), "link lost");
        inner.fail_all(StreamError::LinkLost);
        self.publish(inner.state);
    }

    fn dispatch(self: &Arc<Self>, command: NotificationCommand, epoch: u64) {
        let registry = Arc::downgrade(self);
        let transport = self.transport.clone();
        let (service, characteristic) = (self.service, self.characteristic);

        self.runtime.spawn(async move {
            let result = match command {
                NotificationCommand::Enable => {
                    trace!("Enable HR notifications");
                    transport.enable_notifications(service, characteristic).await
                }
                NotificationCommand::Disable => {
                    trace!("Disable HR notifications");
                    transport.disable_notifications(service, characteristic).await
                }
            };

            if let Some(registry) = registry.upgrade() {
                registry.on_command_complete(command, epoch, result);
            }
        });
    }

    fn on_command_complete(
        self: &Arc<Self>,
        command: NotificationCommand,
        epoch: u64,
        result: Result<(), TransportError>,
    ) {
        let next = {
            let mut inner = self.inner.lock();
            let expected = match command {
                NotificationCommand::Enable => NotificationState::Enabling,
                NotificationCommand::Disable => NotificationState::Disabling,
            };
            if inner.epoch != epoch || inner.state != expected {
                trace!(%command, epoch, "ignoring stale acknowledgement");
                return;
            }

            let next = match result {
                Err(err) => {
                    warn!(%command, %err, "notification command failed");
                    inner.fail_all(StreamError::command_failed(command, &err));
                    None
                }
                Ok(()) => match (command, inner.observers.is_empty()) {
                    (NotificationCommand::Enable, false) => {
                        inner.state = NotificationState::Active;
                        None
                    }
                    (NotificationCommand::Enable, true) => {
                        inner.state = NotificationState::Disabling;
                        Some(NotificationCommand::Disable)
                    }
                    (NotificationCommand::Disable, true) => {
                        inner.state = NotificationState::Idle;
                        None
                    }
                    (NotificationCommand::Disable, false) => {
                        inner.state = NotificationState::Enabling;
                        Some(NotificationCommand::Enable)
                    }
                },
            };
            self.publish(inner.state);
            next.map(|command| (command, inner.epoch))
        };

        if let Some((command, epoch)) = next {
            self.dispatch(command, epoch);
        }
    }

    fn publish(&self, state: NotificationState) {
        self.state_tx.send_replace(state);
    }
}

/// Stream of decoded measurements for one observer.
///
/// Ends after the first error. Dropping it detaches the observer.
pub struct HrStream {
    rx: mpsc::UnboundedReceiver<Delivery>,
    registry: Weak<SubscriptionRegistry>,
    id: Option<ObserverId>,
}

impl HrStream {
    /// A stream that yields `error` and ends without ever attaching.
    pub(crate) fn failed(error: StreamError) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Err(error));

        HrStream {
            rx,
            registry: Weak::new(),
            id: None,
        }
    }

    pub fn observer_id(&self) -> Option<ObserverId> {
        self.id
    }

    fn detach(&mut self) {
        if let Some(id) = self.id.take() {
            if let Some(registry) = self.registry.upgrade() {
                registry.detach(id);
            }
        }
    }
}

impl Stream for HrStream {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Err(err))) => {
                self.detach();
                self.rx.close();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.detach();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for HrStream {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::{HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
    use crate::heartrate_measurement::encode;
    use crate::simulated::SimulatedTransport;
    use futures::StreamExt;

    fn registry(transport: &Arc<SimulatedTransport>) -> Arc<SubscriptionRegistry> {
        SubscriptionRegistry::new(transport.clone(), HEART_RATE_SERVICE, HEART_RATE_MEASUREMENT)
    }

    async fn wait_for(registry: &SubscriptionRegistry, state: NotificationState) {
        let mut rx = registry.subscribe_state();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    fn packet(hr: u16) -> Vec<u8> {
        encode(&HeartRateMeasurement {
            heart_rate: hr,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn first_attach_enables_once() {
        let transport = Arc::new(SimulatedTransport::new());
        let registry = registry(&transport);

        let _a = registry.attach();
        assert_eq!(registry.state(), NotificationState::Enabling);
        let _b = registry.attach();
        wait_for(&registry, NotificationState::Active).await;
        let _c = registry.attach();

        assert_eq!(transport.enable_count(), 1);
        assert_eq!(registry.observer_count(), 3);
    }

    #[tokio::test]
    async fn packets_before_enable_ack_are_not_delivered() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.hold_acks(true);
        let registry = registry(&transport);

        let mut stream = registry.attach();
        registry.on_packet(&packet(50));
        transport.release_acks(1);
        wait_for(&registry, NotificationState::Active).await;
        registry.on_packet(&packet(51));

        assert_eq!(stream.next().await.unwrap().unwrap().heart_rate, 51);
    }

    #[tokio::test]
    async fn detach_is_idempotent() {
        let transport = Arc::new(SimulatedTransport::new());
        let registry = registry(&transport);

        let stream = registry.attach();
        let id = stream.observer_id().unwrap();
        wait_for(&registry, NotificationState::Active).await;

        drop(stream);
        registry.detach(id);
        registry.detach(9999);
        wait_for(&registry, NotificationState::Idle).await;

        assert_eq!(transport.disable_count(), 1);
    }

    #[tokio::test]
    async fn last_detach_while_enabling_disables_after_ack() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.hold_acks(true);
        let registry = registry(&transport);

        drop(registry.attach());
        assert_eq!(registry.state(), NotificationState::Enabling);

        transport.release_acks(1);
        wait_for(&registry, NotificationState::Disabling).await;
        transport.release_acks(1);
        wait_for(&registry, NotificationState::Idle).await;

        assert_eq!(transport.enable_count(), 1);
        assert_eq!(transport.disable_count(), 1);
    }

    #[tokio::test]
    async fn stale_enable_ack_after_disconnect_is_ignored() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.hold_acks(true);
        let registry = registry(&transport);

        let mut stream = registry.attach();
        registry.on_disconnected();
        assert_eq!(stream.next().await, Some(Err(StreamError::LinkLost)));

        transport.release_acks(1);
        transport.answered(1).await;
        assert_eq!(registry.state(), NotificationState::Idle);
        assert_eq!(registry.observer_count(), 0);
    }

    #[tokio::test]
    async fn enable_ack_from_previous_epoch_does_not_activate_new_one() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.hold_acks(true);
        let registry = registry(&transport);

        let mut before = registry.attach();
        tokio::task::yield_now().await;
        registry.on_disconnected();
        assert_eq!(before.next().await, Some(Err(StreamError::LinkLost)));

        let mut after = registry.attach();
        assert_eq!(registry.state(), NotificationState::Enabling);

        // the first enable is answered while the second is still pending
        transport.release_acks(1);
        transport.answered(1).await;
        assert_eq!(transport.enable_count(), 2);
        assert_eq!(registry.state(), NotificationState::Enabling);

        registry.on_packet(&packet(70));
        transport.release_acks(1);
        transport.answered(2).await;
        assert_eq!(registry.state(), NotificationState::Active);

        registry.on_packet(&packet(71));
        assert_eq!(after.next().await.unwrap().unwrap().heart_rate, 71);
    }

    #[tokio::test]
    async fn disable_failure_fails_observers_that_rejoined() {
        let transport = Arc::new(SimulatedTransport::new());
        let registry = registry(&transport);

        let first = registry.attach();
        wait_for(&registry, NotificationState::Active).await;

        transport.hold_acks(true);
        drop(first);
        assert_eq!(registry.state(), NotificationState::Disabling);

        let mut rejoined = registry.attach();
        assert_eq!(registry.state(), NotificationState::Disabling);
        transport.fail_next_disable();
        transport.release_acks(1);

        match rejoined.next().await {
            Some(Err(StreamError::TransportCommandFailed {
                command: NotificationCommand::Disable,
                ..
            })) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rejoined.next().await, None);
        assert_eq!(registry.state(), NotificationState::Idle);
        assert_eq!(registry.observer_count(), 0);
        assert_eq!(transport.enable_count(), 1);
        assert_eq!(transport.disable_count(), 1);
    }

    #[tokio::test]
    async fn attach_to_running_subscription_does_not_republish_state() {
        let transport = Arc::new(SimulatedTransport::new());
        let registry = registry(&transport);

        let _first = registry.attach();
        wait_for(&registry, NotificationState::Active).await;

        let mut state = registry.subscribe_state();
        let _ = state.borrow_and_update();
        let _second = registry.attach();
        assert!(!state.has_changed().unwrap());
    }

    #[tokio::test]
    async fn disable_failure_resets_to_idle() {
        let transport = Arc::new(SimulatedTransport::new());
        let registry = registry(&transport);

        let stream = registry.attach();
        wait_for(&registry, NotificationState::Active).await;
        transport.fail_next_disable();
        drop(stream);
        wait_for(&registry, NotificationState::Idle).await;

        let _again = registry.attach();
        wait_for(&registry, NotificationState::Active).await;
        assert_eq!(transport.enable_count(), 2);
    }
}
