use async_trait::async_trait;
use uuid::Uuid;

use crate::error::TransportError;

/// Per-characteristic GATT primitives of a connected peripheral.
///
/// Updates and link loss flow the other way, through
/// [`HrClient::on_characteristic_update`](crate::client::HrClient::on_characteristic_update)
/// and [`HrClient::on_disconnected`](crate::client::HrClient::on_disconnected).
#[async_trait]
pub trait GattTransport: Send + Sync {
    async fn is_connected(&self) -> bool;

    async fn read_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError>;

    async fn enable_notifications(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError>;

    async fn disable_notifications(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError>;
}
