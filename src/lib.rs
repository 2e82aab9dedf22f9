// src/lib.rs

//! Protocol engine for Vernier Go Direct sensor devices.
//!
//! Implements the GDX binary command protocol shared by the USB HID and BLE
//! GATT transports: frame building and checksumming, the rolling sequence
//! counter, command replies, sensor capability queries, and streaming
//! measurement decoding. Transport discovery and connection plumbing stay
//! outside the crate behind the [`Transport`] trait.

pub mod common;
pub mod device;
pub mod sensor;

// Re-export key types for convenience
pub use common::{Command, GoDirectError, PacketParseError, Transport};
pub use common::{DeviceInfo, DeviceStatus};
pub use device::{DeviceState, GoDirectDevice};
pub use sensor::{GoDirectSensor, MeasurementKind, SamplingMode, SensorRegistry};
