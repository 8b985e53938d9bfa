//! Heart rate service client.
//!
//! Decodes Heart Rate Measurement notifications and shares them between any
//! number of independent streams, enabling notifications on the peripheral
//! only while at least one stream is open.

pub mod appsettings;
pub mod btle;
pub mod client;
pub mod error;
pub mod gatt;
pub mod heartrate_measurement;
pub mod logging;
pub mod registry;
pub mod simulated;
pub mod transport;
pub mod vrcosc_client;

pub use client::HrClient;
pub use error::{DecodeError, StreamError, TransportError};
pub use heartrate_measurement::{decode, HeartRateMeasurement};
pub use registry::{HrStream, NotificationState};
pub use transport::GattTransport;
