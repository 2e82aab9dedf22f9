//! Go Direct command definitions.
//!
//! Each variant knows its wire opcode and its opcode-specific payload
//! template. The fixed filler bytes (0xFF markers, zero padding, the init
//! magic) are what real GDX firmware expects; they are reproduced verbatim.

/// A command that can be sent to a Go Direct device.
///
/// Commands do not carry framing: the sentinel, length, sequence, and
/// checksum bytes are added by [`build_frame`](crate::common::packet::build_frame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Initialize the device and reset the rolling packet counter.
    Init,

    /// Request the status block (firmware versions, battery, charger).
    GetStatus,

    /// Request the device info block (identity, manufacture data, BLE
    /// address, NVRAM size).
    GetDeviceInfo,

    /// Request the 32-bit mask of sensors present on the device.
    GetAvailableSensors,

    /// Request the 32-bit mask of sensors the device would enable by default.
    GetDefaultSensors,

    /// Request the descriptor for one sensor channel.
    GetSensorInfo { sensor_number: u8 },

    /// Set the sampling period. The wire unit is microseconds.
    SetMeasurementPeriod { period_us: u32 },

    /// Begin streaming measurements for the sensors in the mask.
    StartMeasurements { sensor_mask: u32 },

    /// Stop streaming measurements.
    StopMeasurements,

    /// Tell the device the host is going away.
    Disconnect,
}

/// Init payload the firmware requires word for word.
const INIT_MAGIC: [u8; 20] = [
    0xa5, 0x4a, 0x06, 0x49, 0x07, 0x48, 0x08, 0x47, 0x09, 0x46, 0x0a, 0x45,
    0x0b, 0x44, 0x0c, 0x43, 0x0d, 0x42, 0x0e, 0x41,
];

impl Command {
    /// The wire opcode byte for this command.
    pub const fn opcode(&self) -> u8 {
        match self {
            Command::GetStatus => 0x10,
            Command::StartMeasurements { .. } => 0x18,
            Command::StopMeasurements => 0x19,
            Command::Init => 0x1A,
            Command::SetMeasurementPeriod { .. } => 0x1B,
            Command::GetSensorInfo { .. } => 0x50,
            Command::GetAvailableSensors => 0x51,
            Command::Disconnect => 0x54,
            Command::GetDeviceInfo => 0x55,
            Command::GetDefaultSensors => 0x56,
        }
    }

    /// Appends the opcode-specific payload (everything after the opcode
    /// byte) to `frame`.
    pub(crate) fn write_payload(&self, frame: &mut Vec<u8>) {
        match self {
            Command::Init => frame.extend_from_slice(&INIT_MAGIC),
            Command::SetMeasurementPeriod { period_us } => {
                frame.extend_from_slice(&[0xFF, 0x00]);
                frame.extend_from_slice(&period_us.to_le_bytes());
                frame.extend_from_slice(&[0x00; 4]);
            }
            Command::StartMeasurements { sensor_mask } => {
                frame.extend_from_slice(&[0xFF, 0x01]);
                frame.extend_from_slice(&sensor_mask.to_le_bytes());
                frame.extend_from_slice(&[0x00; 8]);
            }
            Command::StopMeasurements => {
                frame.extend_from_slice(&[0xFF, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
            }
            Command::GetSensorInfo { sensor_number } => frame.push(*sensor_number),
            Command::GetStatus
            | Command::GetDeviceInfo
            | Command::GetAvailableSensors
            | Command::GetDefaultSensors
            | Command::Disconnect => {}
        }
    }
}
