// src/common/mod.rs

// --- Protocol primitives shared by the sensor and device layers ---
pub mod command;
pub mod error;
pub mod packet;
pub mod response;
pub mod transport;

// --- Re-export key types for easier access ---

// From command.rs
pub use command::Command;

// From error.rs
pub use error::{GoDirectError, PacketParseError};

// From packet.rs
pub use packet::{build_frame, checksum, verify_checksum, RollingCounter};

// From response.rs
pub use response::{parse_sensor_mask, ChargerState, DeviceInfo, DeviceStatus};

// From transport.rs
pub use transport::{response_queue, FrameAssembler, ResponseQueue, Transport};
