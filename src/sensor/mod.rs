//! Sensor descriptors and the per-session sensor registry.
//!
//! A descriptor is created once per sensor number from a get-sensor-info
//! reply and lives for the whole session; only the `enabled` flag and the
//! sample log mutate after that.

pub mod measurement;

use core::fmt;
use std::collections::BTreeMap;

use log::info;

use crate::common::error::PacketParseError;
use crate::common::response::ByteReader;

/// Numeric representation of a sensor's measurements.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MeasurementKind {
    Real,
    Int,
}

/// Whether the sensor samples on the configured period or on its own events.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SamplingMode {
    Periodic,
    Aperiodic,
}

/// One physical or virtual sensor channel on a Go Direct device.
#[derive(Debug, Clone)]
pub struct GoDirectSensor {
    sensor_number: u8,
    sensor_id: u32,
    description: String,
    units: String,
    measurement_kind: MeasurementKind,
    sampling_mode: SamplingMode,
    measurement_uncertainty: f64,
    min_measurement: f64,
    max_measurement: f64,
    min_measurement_period_ms: f64,
    max_measurement_period_ms: f64,
    typ_measurement_period_ms: f64,
    measurement_period_granularity_ms: f64,
    mutual_exclusion_mask: u32,
    /// Mutable over the session; everything above is fixed at creation.
    pub enabled: bool,
    samples: Vec<f64>,
}

impl GoDirectSensor {
    /// Parses a get-sensor-info reply into a descriptor.
    ///
    /// Layout after the 6 header bytes: number i8, spare u8, sensor id u32,
    /// numeric type u8, sampling mode u8, description [60], units [32],
    /// uncertainty f64, min/max measurement f64, min period u32 (µs),
    /// max period u64 (µs), typical period u32 (µs), granularity u32 (µs),
    /// mutual-exclusion mask u32. Periods convert to milliseconds.
    pub fn parse(reply: &[u8]) -> Result<Self, PacketParseError> {
        let mut r = ByteReader::new(reply);
        r.skip(6)?;
        let sensor_number = r.i8()? as u8;
        let _spare = r.u8()?;
        let sensor_id = r.u32()?;
        let measurement_kind = match r.u8()? {
            1 => MeasurementKind::Int,
            _ => MeasurementKind::Real,
        };
        let sampling_mode = match r.u8()? {
            1 => SamplingMode::Aperiodic,
            _ => SamplingMode::Periodic,
        };
        let description = r.text(60)?;
        let units = r.text(32)?;
        let measurement_uncertainty = r.f64()?;
        let min_measurement = r.f64()?;
        let max_measurement = r.f64()?;
        let min_period_us = r.u32()?;
        let max_period_us = r.u64()?;
        let typ_period_us = r.u32()?;
        let granularity_us = r.u32()?;
        let mutual_exclusion_mask = r.u32()?;

        Ok(GoDirectSensor {
            sensor_number,
            sensor_id,
            description,
            units,
            measurement_kind,
            sampling_mode,
            measurement_uncertainty,
            min_measurement,
            max_measurement,
            min_measurement_period_ms: f64::from(min_period_us) / 1000.0,
            max_measurement_period_ms: max_period_us as f64 / 1000.0,
            typ_measurement_period_ms: f64::from(typ_period_us) / 1000.0,
            measurement_period_granularity_ms: f64::from(granularity_us) / 1000.0,
            mutual_exclusion_mask,
            enabled: false,
            samples: Vec::new(),
        })
    }

    pub fn sensor_number(&self) -> u8 {
        self.sensor_number
    }

    pub fn sensor_id(&self) -> u32 {
        self.sensor_id
    }

    /// The sensor's name, e.g. `Force`.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The sensor's units, e.g. `N`.
    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn measurement_kind(&self) -> MeasurementKind {
        self.measurement_kind
    }

    pub fn sampling_mode(&self) -> SamplingMode {
        self.sampling_mode
    }

    /// Expected uncertainty of each measurement, in sensor units.
    pub fn measurement_uncertainty(&self) -> f64 {
        self.measurement_uncertainty
    }

    pub fn min_measurement(&self) -> f64 {
        self.min_measurement
    }

    pub fn max_measurement(&self) -> f64 {
        self.max_measurement
    }

    pub fn min_measurement_period_ms(&self) -> f64 {
        self.min_measurement_period_ms
    }

    pub fn max_measurement_period_ms(&self) -> f64 {
        self.max_measurement_period_ms
    }

    /// The typical period (ms), used by `start` when no period is given.
    pub fn typ_measurement_period_ms(&self) -> f64 {
        self.typ_measurement_period_ms
    }

    pub fn measurement_period_granularity_ms(&self) -> f64 {
        self.measurement_period_granularity_ms
    }

    /// Bit i set means sensor i cannot be enabled concurrently with this one.
    pub fn mutual_exclusion_mask(&self) -> u32 {
        self.mutual_exclusion_mask
    }

    /// All samples collected since the last `start`.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Latest sample, if any has been collected.
    pub fn value(&self) -> Option<f64> {
        self.samples.last().copied()
    }

    /// True if `other` may stay enabled alongside this sensor.
    fn allows(&self, other: u8) -> bool {
        other == self.sensor_number || self.mutual_exclusion_mask & (1 << other) == 0
    }

    pub(crate) fn append_sample(&mut self, value: f64) {
        self.samples.push(value);
    }

    pub(crate) fn clear_samples(&mut self) {
        self.samples.clear();
    }
}

impl fmt::Display for GoDirectSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.sensor_number, self.description, self.units)
    }
}

/// Sensor descriptors for one device session, keyed by sensor number.
///
/// A `BTreeMap` keeps iteration in ascending sensor-number order, which is
/// the order mask bits resolve in and the order round-robin sample
/// distribution walks.
#[derive(Debug, Default)]
pub struct SensorRegistry {
    sensors: BTreeMap<u8, GoDirectSensor>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        SensorRegistry {
            sensors: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, sensor: GoDirectSensor) {
        self.sensors.insert(sensor.sensor_number(), sensor);
    }

    pub fn contains(&self, sensor_number: u8) -> bool {
        self.sensors.contains_key(&sensor_number)
    }

    pub fn get(&self, sensor_number: u8) -> Option<&GoDirectSensor> {
        self.sensors.get(&sensor_number)
    }

    pub fn get_mut(&mut self, sensor_number: u8) -> Option<&mut GoDirectSensor> {
        self.sensors.get_mut(&sensor_number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GoDirectSensor> {
        self.sensors.values()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Sensor numbers currently enabled, ascending.
    pub fn enabled_numbers(&self) -> Vec<u8> {
        self.sensors
            .values()
            .filter(|s| s.enabled)
            .map(|s| s.sensor_number())
            .collect()
    }

    /// 32-bit OR of `1 << sensor_number` over the enabled sensors; the
    /// payload of the start-measurements command.
    pub fn enabled_mask(&self) -> u32 {
        self.sensors
            .values()
            .filter(|s| s.enabled)
            .fold(0, |mask, s| mask | 1 << s.sensor_number())
    }

    /// Resolves a measurement frame's sensor mask to registered sensor
    /// numbers, ascending by bit position. A set bit without a registered
    /// sensor is a registry/device mismatch and is surfaced as an error.
    pub fn numbers_for_mask(&self, mask: u32) -> Result<Vec<u8>, PacketParseError> {
        let mut numbers = Vec::new();
        for bit in 0..32 {
            if mask & (1 << bit) != 0 {
                if !self.contains(bit) {
                    return Err(PacketParseError::UnknownSensor { sensor_number: bit });
                }
                numbers.push(bit);
            }
        }
        Ok(numbers)
    }

    /// Enforces the mutual-exclusion masks over the currently enabled set:
    /// if an enabled sensor's mask names another enabled sensor, the named
    /// sensor is disabled. One pass over a snapshot suffices because
    /// disabling can only shrink the enabled set.
    pub fn apply_mutual_exclusion(&mut self) {
        let enabled = self.enabled_numbers();
        for &a in &enabled {
            let Some(mask_holder) = self.get(a) else { continue };
            if !mask_holder.enabled {
                continue;
            }
            let holder = mask_holder.clone();
            for &b in &enabled {
                if !holder.allows(b) {
                    info!("Sensor {b} is mutually exclusive with sensor {a}, disabling it");
                    if let Some(loser) = self.get_mut(b) {
                        loser.enabled = false;
                    }
                }
            }
        }
    }

    /// Empties every sensor's sample log. Done on each `start`.
    pub fn clear_samples(&mut self) {
        for sensor in self.sensors.values_mut() {
            sensor.clear_samples();
        }
    }
}
