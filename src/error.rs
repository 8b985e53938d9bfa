use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// A single heart rate measurement packet could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated heart rate packet: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
}

/// Failure reported by the underlying GATT transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peripheral is not connected")]
    NotConnected,
    #[error("characteristic {0} not found on peripheral")]
    CharacteristicNotFound(Uuid),
    #[error("bluetooth error: {0}")]
    Btle(#[from] btleplug::Error),
    #[error("command rejected: {0}")]
    Rejected(String),
}

/// The notification command that was sent to the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCommand {
    Enable,
    Disable,
}

impl fmt::Display for NotificationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationCommand::Enable => f.write_str("enable notifications"),
            NotificationCommand::Disable => f.write_str("disable notifications"),
        }
    }
}

/// Terminal failure delivered to every observer of a heart rate stream.
///
/// Cloned once per observer on broadcast, so transport errors are carried
/// as their rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("failed to {command}: {reason}")]
    TransportCommandFailed {
        command: NotificationCommand,
        reason: String,
    },
    #[error("link to the peripheral was lost")]
    LinkLost,
    #[error("peripheral is not connected")]
    NotConnected,
}

impl StreamError {
    pub(crate) fn command_failed(command: NotificationCommand, err: &TransportError) -> Self {
        StreamError::TransportCommandFailed {
            command,
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("no local data directory available on this platform")]
    NoDataDir,
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum OscError {
    #[error("osc socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("osc encode error: {0}")]
    Encode(#[from] rosc::OscError),
    #[error("system time is outside the OSC time range")]
    TimeOutOfRange,
}
