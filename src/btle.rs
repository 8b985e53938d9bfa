//! `btleplug` backend for [`GattTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::HrClient;
use crate::error::TransportError;
use crate::gatt::AttStatus;
use crate::transport::GattTransport;

/// Transport over an already connected peripheral with discovered services.
pub struct BtleplugTransport {
    peripheral: Peripheral,
}

impl BtleplugTransport {
    pub fn new(peripheral: Peripheral) -> Self {
        BtleplugTransport { peripheral }
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.service_uuid == service && characteristic.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl GattTransport for BtleplugTransport {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn read_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic(service, characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn enable_notifications(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic(service, characteristic)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn disable_notifications(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic(service, characteristic)?;
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }
}

/// Feeds notifications and link loss of `peripheral` into `client` until the
/// peripheral disconnects.
pub async fn run_event_pump(
    adapter: &Adapter,
    peripheral: &Peripheral,
    client: Arc<HrClient>,
) -> Result<(), TransportError> {
    let mut notifications = peripheral.notifications().await?;
    let mut events = adapter.events().await?;
    let id = peripheral.id();

    loop {
        tokio::select! {
            notification = notifications.next() => match notification {
                Some(notification) => {
                    client.on_characteristic_update(notification.uuid, &notification.value, AttStatus::SUCCESS);
                }
                None => {
                    debug!(?id, "notification stream ended");
                    break;
                }
            },
            event = events.next() => match event {
                Some(CentralEvent::DeviceDisconnected(disconnected)) if disconnected == id => {
                    info!(?id, "device disconnected");
                    break;
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    client.on_disconnected();
    Ok(())
}
