use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::StreamError;
use crate::gatt::{
    AttStatus, BodySensorLocation, BODY_SENSOR_LOCATION, HEART_RATE_MEASUREMENT,
    HEART_RATE_SERVICE,
};
use crate::registry::{HrStream, NotificationState, SubscriptionRegistry};
use crate::transport::GattTransport;

/// Client of the Heart Rate service of one connected peripheral.
pub struct HrClient {
    transport: Arc<dyn GattTransport>,
    registry: Arc<SubscriptionRegistry>,
    body_sensor_location: Option<BodySensorLocation>,
}

impl HrClient {
    /// Binds a client to `transport` and reads the Body Sensor Location once.
    ///
    /// A failed read is logged and leaves the location unknown.
    pub async fn new(transport: Arc<dyn GattTransport>) -> Self {
        let body_sensor_location = match transport
            .read_characteristic(HEART_RATE_SERVICE, BODY_SENSOR_LOCATION)
            .await
        {
            Ok(value) => BodySensorLocation::from_bytes(&value),
            Err(err) => {
                warn!(%err, "could not read body sensor location");
                None
            }
        };

        if let Some(location) = body_sensor_location {
            info!(?location, "body sensor location");
        }

        let registry =
            SubscriptionRegistry::new(transport.clone(), HEART_RATE_SERVICE, HEART_RATE_MEASUREMENT);

        HrClient {
            transport,
            registry,
            body_sensor_location,
        }
    }

    pub fn body_sensor_location(&self) -> Option<BodySensorLocation> {
        self.body_sensor_location
    }

    pub fn notification_state(&self) -> watch::Receiver<NotificationState> {
        self.registry.subscribe_state()
    }

    pub fn observer_count(&self) -> usize {
        self.registry.observer_count()
    }

    /// Opens a new independent stream of measurements.
    ///
    /// Nothing is replayed: the stream only sees packets that arrive after
    /// notifications are enabled. With `check_connection` set, a missing link
    /// ends the stream with [`StreamError::NotConnected`] right away.
    pub async fn observe(&self, check_connection: bool) -> HrStream {
        if check_connection && !self.transport.is_connected().await {
            debug!("observe on a disconnected peripheral");
            return HrStream::failed(StreamError::NotConnected);
        }

        self.registry.attach()
    }

    /// Transport callback for every characteristic notification.
    pub fn on_characteristic_update(&self, characteristic: Uuid, data: &[u8], status: AttStatus) {
        if characteristic != HEART_RATE_MEASUREMENT {
            return;
        }

        if !status.is_success() {
            trace!(?status, "skipping failed heart rate notification");
            return;
        }

        self.registry.on_packet(data);
    }

    /// Transport callback for link loss.
    pub fn on_disconnected(&self) {
        self.registry.on_disconnected();
    }
}
