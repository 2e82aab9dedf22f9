//! Streaming measurement frame decoding.
//!
//! Once streaming starts the device pushes unsolicited frames tagged 0x20.
//! Byte 4 selects one of several payload layouts; the ones that carry sample
//! values all end in 4-byte little-endian samples distributed round-robin
//! across the sensors the frame names.

use log::debug;

use super::SensorRegistry;
use crate::common::error::PacketParseError;
use crate::common::response::ByteReader;

/// Sub-type byte of a streaming measurement frame (byte 4).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MeasurementType {
    /// f32 samples for a 16-bit sensor mask.
    NormalReal32,
    /// f32 samples for a 32-bit sensor mask (only the low 16 bits are used
    /// by current firmware).
    WideReal32,
    /// f32 samples for one explicitly numbered sensor.
    SingleChannelReal32,
    /// i32 samples for one explicitly numbered sensor.
    SingleChannelInt32,
    /// f32 samples from an event-driven sensor.
    AperiodicReal32,
    /// i32 samples from an event-driven sensor.
    AperiodicInt32,
    /// Stream bookkeeping, recognized and discarded.
    StartTime,
    /// Dropped-sample report, recognized and discarded.
    Dropped,
    /// Period change notice, recognized and discarded.
    Period,
}

impl MeasurementType {
    pub fn from_u8(value: u8) -> Result<Self, PacketParseError> {
        match value {
            0x06 => Ok(MeasurementType::NormalReal32),
            0x07 => Ok(MeasurementType::WideReal32),
            0x08 => Ok(MeasurementType::SingleChannelReal32),
            0x09 => Ok(MeasurementType::SingleChannelInt32),
            0x0a => Ok(MeasurementType::AperiodicReal32),
            0x0b => Ok(MeasurementType::AperiodicInt32),
            0x0c => Ok(MeasurementType::StartTime),
            0x0d => Ok(MeasurementType::Dropped),
            0x0e => Ok(MeasurementType::Period),
            other => Err(PacketParseError::UnknownMeasurementType(other)),
        }
    }

    /// True for sub-types that carry no samples and are dropped after
    /// recognition.
    pub fn is_discarded(&self) -> bool {
        matches!(
            self,
            MeasurementType::StartTime | MeasurementType::Dropped | MeasurementType::Period
        )
    }
}

/// Decodes one streaming measurement frame and appends its samples to the
/// named sensors' logs.
///
/// Samples interleave round-robin: with sensors `[a, b]` and four values on
/// the wire, `a` gets values 0 and 2, `b` gets 1 and 3. Sensor order is
/// ascending by number for the masked layouts.
pub(crate) fn handle_measurement(
    registry: &mut SensorRegistry,
    frame: &[u8],
) -> Result<(), PacketParseError> {
    let mut r = ByteReader::new(frame);
    r.skip(4)?;
    let measurement_type = MeasurementType::from_u8(r.u8()?)?;

    let (sensor_numbers, value_count) = match measurement_type {
        MeasurementType::NormalReal32 => {
            let mask = u32::from(r.u16()?);
            let count = r.i8()?.max(0) as usize;
            r.skip(1)?; // spare byte before the sample block
            (registry.numbers_for_mask(mask)?, count)
        }
        MeasurementType::WideReal32 => {
            let mask = r.u32()? & 0xFFFF;
            let count = r.i8()?.max(0) as usize;
            r.skip(1)?;
            (registry.numbers_for_mask(mask)?, count)
        }
        MeasurementType::SingleChannelReal32
        | MeasurementType::SingleChannelInt32
        | MeasurementType::AperiodicReal32
        | MeasurementType::AperiodicInt32 => {
            r.skip(1)?;
            let sensor_number = r.i8()? as u8;
            let count = r.i8()?.max(0) as usize;
            if !registry.contains(sensor_number) {
                return Err(PacketParseError::UnknownSensor { sensor_number });
            }
            (vec![sensor_number], count)
        }
        MeasurementType::StartTime | MeasurementType::Dropped | MeasurementType::Period => {
            debug!("Discarding {measurement_type:?} frame");
            return Ok(());
        }
    };

    let integer_samples = matches!(
        measurement_type,
        MeasurementType::SingleChannelInt32 | MeasurementType::AperiodicInt32
    );

    for _ in 0..value_count {
        for &sensor_number in &sensor_numbers {
            let value = if integer_samples {
                f64::from(r.i32()?)
            } else {
                f64::from(r.f32()?)
            };
            if let Some(sensor) = registry.get_mut(sensor_number) {
                sensor.append_sample(value);
            }
        }
    }
    Ok(())
}
