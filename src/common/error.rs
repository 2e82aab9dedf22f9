// src/common/error.rs

use core::fmt;

/// Top-level error for Go Direct protocol operations.
///
/// Generic over the transport implementation's error type, so callers get the
/// underlying HID/BLE failure back instead of a stringly-typed wrapper.
#[derive(Debug, thiserror::Error)]
pub enum GoDirectError<E = ()>
where
    E: fmt::Debug,
{
    /// Underlying transport error (connect, disconnect, or write failure).
    #[error("transport error: {0:?}")]
    Transport(E),

    /// No reply (or no measurement) arrived within the timeout budget.
    #[error("operation timed out")]
    Timeout,

    /// The session is not in a state where this operation is allowed
    /// (e.g. `read` before `start`).
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// The available and default sensor masks share no set bit, so no sensor
    /// could be auto-selected.
    #[error("device reports no default sensor")]
    NoDefaultSensor,

    /// An inbound frame or reply could not be decoded.
    #[error("packet error: {0}")]
    Packet(#[from] PacketParseError),
}

/// Error decoding an inbound frame or command reply.
///
/// Kept separate from [`GoDirectError`] (and non-generic) because frame
/// decoding never touches the transport.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PacketParseError {
    /// Reply shorter than its fixed layout requires.
    TooShort { needed: usize, got: usize },

    /// A measurement frame referenced a sensor number that was never
    /// registered from a sensor-info query. Indicates a registry/device
    /// mismatch, so it is surfaced rather than silently dropped.
    UnknownSensor { sensor_number: u8 },

    /// Measurement sub-type byte outside the range the engine understands.
    UnknownMeasurementType(u8),
}

impl fmt::Display for PacketParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketParseError::TooShort { needed, got } => {
                write!(f, "packet too short: needed {needed} bytes, got {got}")
            }
            PacketParseError::UnknownSensor { sensor_number } => {
                write!(f, "measurement references unknown sensor {sensor_number}")
            }
            PacketParseError::UnknownMeasurementType(t) => {
                write!(f, "unknown measurement type {t:#04x}")
            }
        }
    }
}

impl std::error::Error for PacketParseError {}
