//! The device session: state machine and high-level operations.
//!
//! A [`GoDirectDevice`] owns one transport connection and walks it through
//! the session lifecycle: open, configure sensors, stream, stop, close.
//! Every operation checks the session state first, so callers get an
//! [`InvalidState`](GoDirectError::InvalidState) error instead of confusing
//! on-wire behavior when they call things out of order.

mod dispatch;

use std::time::Duration;

use log::{info, warn};

use crate::common::command::Command;
use crate::common::error::GoDirectError;
use crate::common::packet::RollingCounter;
use crate::common::response::{parse_sensor_mask, DeviceInfo, DeviceStatus};
use crate::common::transport::Transport;
use crate::sensor::{GoDirectSensor, SensorRegistry};

/// Where a session is in its lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceState {
    /// No transport connection. The initial and final state.
    Closed,
    /// Transport connect in progress; the init handshake has not finished.
    Connecting,
    /// Connected and initialized, no sensors explicitly enabled yet.
    Initialized,
    /// At least one sensor enabled, not yet streaming.
    Configured,
    /// Measurements are flowing.
    Streaming,
    /// Streaming was stopped; the session can start again or close.
    Stopped,
}

/// Fallback sampling period before any sensor has provided a typical rate.
const DEFAULT_SAMPLE_PERIOD_MS: f64 = 100_000.0;

/// Floor applied to auto-selected sampling periods.
const MIN_AUTO_PERIOD_MS: f64 = 100.0;

/// One Go Direct device session over any [`Transport`].
///
/// ```no_run
/// # use godirect::{GoDirectDevice, Transport};
/// # use std::time::Duration;
/// # fn demo<T: Transport>(transport: T) -> Result<(), godirect::GoDirectError<T::Error>> {
/// let mut device = GoDirectDevice::new(transport);
/// device.open(false)?;
/// device.enable_sensors(&[1])?;
/// device.start(None)?;
/// for _ in 0..10 {
///     device.read(Duration::from_secs(5))?;
/// }
/// device.stop()?;
/// device.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct GoDirectDevice<T: Transport> {
    transport: T,
    counter: RollingCounter,
    sensors: SensorRegistry,
    state: DeviceState,
    sample_period_ms: f64,
    command_timeout: Duration,
    status: Option<DeviceStatus>,
    info: Option<DeviceInfo>,
}

impl<T: Transport> GoDirectDevice<T> {
    pub fn new(transport: T) -> Self {
        GoDirectDevice {
            transport,
            counter: RollingCounter::new(),
            sensors: SensorRegistry::new(),
            state: DeviceState::Closed,
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            command_timeout: dispatch::COMMAND_TIMEOUT,
            status: None,
            info: None,
        }
    }

    /// Connects the transport and runs the init handshake: init command,
    /// status query, device-info query. With `auto_start` the default
    /// sensors begin streaming immediately at their typical period.
    ///
    /// If any step after the transport connect fails, the transport is
    /// disconnected best-effort and the session returns to `Closed`.
    pub fn open(&mut self, auto_start: bool) -> Result<(), GoDirectError<T::Error>> {
        if self.state != DeviceState::Closed {
            return Err(GoDirectError::InvalidState("device is already open"));
        }
        self.state = DeviceState::Connecting;

        if let Err(e) = self.transport.connect() {
            self.state = DeviceState::Closed;
            return Err(GoDirectError::Transport(e));
        }
        if let Err(e) = self.handshake() {
            if let Err(d) = self.transport.disconnect() {
                warn!("Disconnect after failed open also failed: {d:?}");
            }
            self.state = DeviceState::Closed;
            return Err(e);
        }
        self.state = DeviceState::Initialized;

        if auto_start {
            self.start(None)?;
        }
        Ok(())
    }

    fn handshake(&mut self) -> Result<(), GoDirectError<T::Error>> {
        self.gdx_init()?;
        self.gdx_get_status()?;
        self.gdx_get_device_info()
    }

    /// Queries and enables the given sensor numbers, then enforces the
    /// mutual-exclusion masks over the enabled set.
    pub fn enable_sensors(&mut self, sensor_numbers: &[u8]) -> Result<(), GoDirectError<T::Error>> {
        self.require_open()?;
        for &n in sensor_numbers {
            if !self.sensors.contains(n) {
                self.gdx_get_sensor_info(n)?;
            }
            if let Some(sensor) = self.sensors.get_mut(n) {
                sensor.enabled = true;
            }
        }
        self.sensors.apply_mutual_exclusion();
        if self.state == DeviceState::Initialized {
            self.state = DeviceState::Configured;
        }
        Ok(())
    }

    /// Enables the device's preferred sensor: the lowest sensor number set
    /// in both the available and default masks. Devices report exactly one
    /// usable default this way.
    pub fn enable_default_sensors(&mut self) -> Result<(), GoDirectError<T::Error>> {
        self.require_open()?;
        let available = self.gdx_get_available_sensors()?;
        let default = self.gdx_get_default_sensors()?;
        let common = available & default;
        if common == 0 {
            return Err(GoDirectError::NoDefaultSensor);
        }
        let sensor_number = common.trailing_zeros() as u8;
        info!("Autoset sensor: {sensor_number}");
        self.enable_sensors(&[sensor_number])
    }

    /// Queries the descriptor of every sensor the device reports available
    /// and returns them all, ascending by number.
    ///
    /// Re-queried descriptors come back disabled; call
    /// [`enable_sensors`](Self::enable_sensors) after listing.
    pub fn list_sensors(&mut self) -> Result<Vec<&GoDirectSensor>, GoDirectError<T::Error>> {
        self.require_open()?;
        let available = self.gdx_get_available_sensors()?;
        for bit in 0..32 {
            if available & (1 << bit) != 0 {
                self.gdx_get_sensor_info(bit)?;
            }
        }
        Ok(self.sensors.iter().collect())
    }

    /// Starts streaming. `period_ms` of `None` selects the typical period
    /// of the first enabled sensor (never faster than 100 ms); if no sensor
    /// is enabled yet, the device's default sensor is enabled first.
    ///
    /// Any samples from a previous run are cleared.
    pub fn start(&mut self, period_ms: Option<f64>) -> Result<(), GoDirectError<T::Error>> {
        match self.state {
            DeviceState::Initialized | DeviceState::Configured | DeviceState::Stopped => {}
            _ => return Err(GoDirectError::InvalidState("start requires an open, non-streaming device")),
        }

        if self.sensors.enabled_numbers().is_empty() {
            self.enable_default_sensors()?;
        }

        let period_ms = match period_ms {
            Some(p) => p,
            None => {
                let p = self.default_period_ms().max(MIN_AUTO_PERIOD_MS);
                info!("Autoset sample period (ms): {p}");
                p
            }
        };
        self.sample_period_ms = period_ms;
        self.sensors.clear_samples();

        self.gdx_set_measurement_period(period_ms)?;
        self.gdx_start_measurements(self.sensors.enabled_mask())?;
        self.state = DeviceState::Streaming;
        Ok(())
    }

    /// Blocks until one measurement frame has been decoded into the enabled
    /// sensors' sample logs, or `timeout` elapses. Call at least as often
    /// as the sampling period.
    pub fn read(&mut self, timeout: Duration) -> Result<(), GoDirectError<T::Error>> {
        if self.state != DeviceState::Streaming {
            return Err(GoDirectError::InvalidState("read requires a streaming device"));
        }
        self.read_measurement(timeout)
    }

    /// Stops streaming. Safe to call again once stopped; the stop command
    /// is simply re-sent.
    pub fn stop(&mut self) -> Result<(), GoDirectError<T::Error>> {
        self.require_open()?;
        self.gdx_stop_measurements()?;
        self.state = DeviceState::Stopped;
        Ok(())
    }

    /// Tells the device the host is going away, then drops the transport
    /// connection. Both steps are best-effort: the session ends `Closed`
    /// with failures logged, never raised.
    pub fn close(&mut self) -> Result<(), GoDirectError<T::Error>> {
        if self.state == DeviceState::Closed {
            return Ok(());
        }
        if let Err(e) = self.gdx_disconnect() {
            warn!("Disconnect command failed, dropping the link anyway: {e}");
        }
        if let Err(e) = self.transport.disconnect() {
            warn!("Transport disconnect failed: {e:?}");
        }
        self.state = DeviceState::Closed;
        Ok(())
    }

    /// Re-queries the status block (battery level and charger state change
    /// over a session).
    pub fn refresh_status(&mut self) -> Result<&DeviceStatus, GoDirectError<T::Error>> {
        self.require_open()?;
        self.gdx_get_status()?;
        // Just stored by gdx_get_status.
        self.status
            .as_ref()
            .ok_or(GoDirectError::InvalidState("status missing after refresh"))
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Status block captured at open (or the last refresh).
    pub fn status(&self) -> Option<&DeviceStatus> {
        self.status.as_ref()
    }

    /// Device-info block captured at open.
    pub fn info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    pub fn sensors(&self) -> &SensorRegistry {
        &self.sensors
    }

    /// The sampling period the last `start` configured, in milliseconds.
    pub fn sample_period_ms(&self) -> f64 {
        self.sample_period_ms
    }

    /// Overrides the per-command reply timeout (default 5 s).
    pub fn set_command_timeout(&mut self, timeout: Duration) {
        self.command_timeout = timeout;
    }

    fn require_open(&self) -> Result<(), GoDirectError<T::Error>> {
        match self.state {
            DeviceState::Closed | DeviceState::Connecting => {
                Err(GoDirectError::InvalidState("device is not open"))
            }
            _ => Ok(()),
        }
    }

    /// Typical period (ms) of the first enabled sensor, or 0 if none.
    fn default_period_ms(&self) -> f64 {
        self.sensors
            .iter()
            .find(|s| s.enabled)
            .map(|s| s.typ_measurement_period_ms())
            .unwrap_or(0.0)
    }

    // --- One method per wire command ---

    fn gdx_init(&mut self) -> Result<(), GoDirectError<T::Error>> {
        self.write_and_check_response(&Command::Init)
    }

    fn gdx_get_status(&mut self) -> Result<(), GoDirectError<T::Error>> {
        let reply = self.write_and_get_response(&Command::GetStatus)?;
        let status = DeviceStatus::parse(&reply)?;
        info!(
            "Device status: fw {} / {}, battery {}%, charger {:?}",
            status.master_cpu_version,
            status.slave_cpu_version,
            status.battery_level_percent,
            status.charger_state
        );
        self.status = Some(status);
        Ok(())
    }

    fn gdx_get_device_info(&mut self) -> Result<(), GoDirectError<T::Error>> {
        let reply = self.write_and_get_response(&Command::GetDeviceInfo)?;
        let info = DeviceInfo::parse(&reply)?;
        info!(
            "Device info: {} {} ({})",
            info.order_code, info.serial_number, info.ble_address
        );
        self.info = Some(info);
        Ok(())
    }

    fn gdx_get_available_sensors(&mut self) -> Result<u32, GoDirectError<T::Error>> {
        let reply = self.write_and_get_response(&Command::GetAvailableSensors)?;
        let mask = parse_sensor_mask(&reply)?;
        info!("Available sensors: {}", mask.count_ones());
        Ok(mask)
    }

    fn gdx_get_default_sensors(&mut self) -> Result<u32, GoDirectError<T::Error>> {
        let reply = self.write_and_get_response(&Command::GetDefaultSensors)?;
        let mask = parse_sensor_mask(&reply)?;
        Ok(mask)
    }

    fn gdx_get_sensor_info(&mut self, sensor_number: u8) -> Result<(), GoDirectError<T::Error>> {
        let reply = self.write_and_get_response(&Command::GetSensorInfo { sensor_number })?;
        let sensor = GoDirectSensor::parse(&reply)?;
        info!("Sensor {sensor}");
        self.sensors.insert(sensor);
        Ok(())
    }

    fn gdx_set_measurement_period(&mut self, period_ms: f64) -> Result<(), GoDirectError<T::Error>> {
        let period_us = (period_ms * 1000.0).round() as u32;
        self.write_and_check_response(&Command::SetMeasurementPeriod { period_us })
    }

    fn gdx_start_measurements(&mut self, sensor_mask: u32) -> Result<(), GoDirectError<T::Error>> {
        self.write_and_check_response(&Command::StartMeasurements { sensor_mask })
    }

    fn gdx_stop_measurements(&mut self) -> Result<(), GoDirectError<T::Error>> {
        self.write_and_check_response(&Command::StopMeasurements)
    }

    fn gdx_disconnect(&mut self) -> Result<(), GoDirectError<T::Error>> {
        self.write_and_check_response(&Command::Disconnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::tests::sensor_info_reply;
    use std::collections::VecDeque;
    use std::time::Instant;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    struct MockTransport {
        replies: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
        connected: bool,
        fail_connect: bool,
        fail_disconnect: bool,
    }

    impl MockTransport {
        fn new(replies: Vec<Vec<u8>>) -> Self {
            MockTransport {
                replies: replies.into(),
                sent: Vec::new(),
                connected: false,
                fail_connect: false,
                fail_disconnect: false,
            }
        }
    }

    impl Transport for MockTransport {
        type Error = &'static str;

        fn connect(&mut self) -> Result<(), Self::Error> {
            if self.fail_connect {
                return Err("connect refused");
            }
            self.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) -> Result<(), Self::Error> {
            if self.fail_disconnect {
                return Err("hid handle already gone");
            }
            self.connected = false;
            Ok(())
        }

        fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
            self.sent.push(frame.to_vec());
            Ok(())
        }

        fn receive(&mut self, timeout: Duration) -> Vec<u8> {
            match self.replies.pop_front() {
                Some(frame) => frame,
                None => {
                    std::thread::sleep(timeout.min(Duration::from_millis(20)));
                    Vec::new()
                }
            }
        }
    }

    fn ack_reply() -> Vec<u8> {
        vec![0x58, 0x05, 0x00, 0x00, 0x00]
    }

    fn status_reply() -> Vec<u8> {
        let mut reply = vec![0x58, 0x00, 0x00, 0x00, 0x00, 0x00];
        reply.push(0x00); // status
        reply.push(0x00); // spare
        reply.extend_from_slice(&[1, 2]); // master major/minor
        reply.extend_from_slice(&30u16.to_le_bytes());
        reply.extend_from_slice(&[3, 4]); // slave major/minor
        reply.extend_from_slice(&40u16.to_le_bytes());
        reply.push(91); // battery %
        reply.push(2); // charge complete
        reply
    }

    fn device_info_reply() -> Vec<u8> {
        fn text(s: &str, width: usize) -> Vec<u8> {
            let mut field = s.as_bytes().to_vec();
            field.resize(width, 0);
            field
        }
        let mut reply = vec![0x58, 0x00, 0x00, 0x00, 0x00, 0x00];
        reply.extend_from_slice(&text("GDX-FOR", 16));
        reply.extend_from_slice(&text("0A1001B1", 16));
        reply.extend_from_slice(&text("GDX-FOR 0A1001B1", 32));
        reply.extend_from_slice(&1u16.to_le_bytes()); // mfg id
        reply.extend_from_slice(&2022u16.to_le_bytes()); // year
        reply.push(3); // month
        reply.push(9); // day
        reply.extend_from_slice(&[1, 2]);
        reply.extend_from_slice(&30u16.to_le_bytes());
        reply.extend_from_slice(&[3, 4]);
        reply.extend_from_slice(&40u16.to_le_bytes());
        reply.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]); // BLE addr
        reply.extend_from_slice(&4096u32.to_le_bytes());
        reply.extend_from_slice(&text("Force sensor", 64));
        reply
    }

    fn mask_reply(mask: u32) -> Vec<u8> {
        let mut reply = vec![0x58, 0x0A, 0x00, 0x00, 0x00, 0x00];
        reply.extend_from_slice(&mask.to_le_bytes());
        reply
    }

    fn measurement_frame(mask: u16, values: &[f32]) -> Vec<u8> {
        let mut frame = vec![0x20, 0x00, 0x00, 0x00, 0x06];
        frame.extend_from_slice(&mask.to_le_bytes());
        frame.push((values.len() / mask.count_ones().max(1) as usize) as u8);
        frame.push(0x00);
        for v in values {
            frame.extend_from_slice(&v.to_le_bytes());
        }
        frame[1] = frame.len() as u8;
        frame
    }

    fn open_replies() -> Vec<Vec<u8>> {
        vec![ack_reply(), status_reply(), device_info_reply()]
    }

    fn opened_device(extra_replies: Vec<Vec<u8>>) -> GoDirectDevice<MockTransport> {
        init_logs();
        let mut replies = open_replies();
        replies.extend(extra_replies);
        let mut device = GoDirectDevice::new(MockTransport::new(replies));
        device.set_command_timeout(Duration::from_millis(200));
        device.open(false).unwrap();
        device
    }

    fn sent_opcodes(device: &GoDirectDevice<MockTransport>) -> Vec<u8> {
        device.transport.sent.iter().map(|f| f[4]).collect()
    }

    #[test]
    fn test_open_populates_status_and_info() {
        let device = opened_device(vec![]);
        assert_eq!(device.state(), DeviceState::Initialized);

        let status = device.status().unwrap();
        assert_eq!(status.battery_level_percent, 91);
        assert_eq!(status.master_cpu_version, "1.2.30");

        let info = device.info().unwrap();
        assert_eq!(info.order_code, "GDX-FOR");
        assert_eq!(info.serial_number, "0A1001B1");
        assert_eq!(info.ble_address, "06:05:04:03:02:01");

        // Init, get status, get device info, with the sequence counter
        // starting fresh at 0xFE and decrementing per frame.
        assert_eq!(sent_opcodes(&device), vec![0x1A, 0x10, 0x55]);
        let sequences: Vec<u8> = device.transport.sent.iter().map(|f| f[2]).collect();
        assert_eq!(sequences, vec![0xFE, 0xFD, 0xFC]);
    }

    #[test]
    fn test_open_refused_by_transport() {
        let mut transport = MockTransport::new(vec![]);
        transport.fail_connect = true;
        let mut device = GoDirectDevice::new(transport);
        assert!(matches!(
            device.open(false),
            Err(GoDirectError::Transport("connect refused"))
        ));
        assert_eq!(device.state(), DeviceState::Closed);
    }

    #[test]
    fn test_failed_handshake_reverts_to_closed() {
        // No replies at all: the init exchange times out.
        let mut device = GoDirectDevice::new(MockTransport::new(vec![]));
        device.set_command_timeout(Duration::from_millis(50));
        assert!(matches!(device.open(false), Err(GoDirectError::Timeout)));
        assert_eq!(device.state(), DeviceState::Closed);
        assert!(!device.transport.connected);
    }

    #[test]
    fn test_open_twice_is_an_error() {
        let mut device = opened_device(vec![]);
        assert!(matches!(
            device.open(false),
            Err(GoDirectError::InvalidState(_))
        ));
    }

    #[test]
    fn test_enable_default_sensors_picks_lowest_common_bit() {
        let mut device = opened_device(vec![
            mask_reply(0b1010),
            mask_reply(0b1000),
            sensor_info_reply(3, 500_000, 0),
        ]);
        device.enable_default_sensors().unwrap();
        assert_eq!(device.sensors().enabled_numbers(), vec![3]);
        assert_eq!(device.state(), DeviceState::Configured);
    }

    #[test]
    fn test_enable_default_sensors_with_disjoint_masks() {
        let mut device = opened_device(vec![mask_reply(0b0110), mask_reply(0b1000)]);
        assert!(matches!(
            device.enable_default_sensors(),
            Err(GoDirectError::NoDefaultSensor)
        ));
        assert!(device.sensors().enabled_numbers().is_empty());
    }

    #[test]
    fn test_enable_sensors_applies_mutual_exclusion() {
        // Sensor 1's mask excludes sensor 2.
        let mut device = opened_device(vec![
            sensor_info_reply(1, 500_000, 0b100),
            sensor_info_reply(2, 500_000, 0),
        ]);
        device.enable_sensors(&[1, 2]).unwrap();
        assert_eq!(device.sensors().enabled_numbers(), vec![1]);
    }

    #[test]
    fn test_list_sensors_queries_every_available_number() {
        let mut device = opened_device(vec![
            mask_reply(0b101),
            sensor_info_reply(0, 500_000, 0),
            sensor_info_reply(2, 500_000, 0),
        ]);
        let listed: Vec<u8> = device
            .list_sensors()
            .unwrap()
            .iter()
            .map(|s| s.sensor_number())
            .collect();
        assert_eq!(listed, vec![0, 2]);
    }

    #[test]
    fn test_start_uses_typical_period_and_clears_samples() {
        let mut device = opened_device(vec![
            sensor_info_reply(2, 250_000, 0), // typical period 250 ms
            ack_reply(),                      // set period
            ack_reply(),                      // start
        ]);
        device.enable_sensors(&[2]).unwrap();
        device
            .sensors
            .get_mut(2)
            .unwrap()
            .append_sample(123.0);

        device.start(None).unwrap();
        assert_eq!(device.state(), DeviceState::Streaming);
        assert_eq!(device.sample_period_ms(), 250.0);
        assert!(device.sensors().get(2).unwrap().samples().is_empty());

        // Set-period frame carries 250 ms as microseconds, start frame
        // carries the enabled mask, both little-endian at offset 7.
        let sent = &device.transport.sent;
        let set_period = &sent[sent.len() - 2];
        assert_eq!(set_period[4], 0x1B);
        assert_eq!(&set_period[7..11], &250_000u32.to_le_bytes());
        let start = &sent[sent.len() - 1];
        assert_eq!(start[4], 0x18);
        assert_eq!(&start[7..11], &0b100u32.to_le_bytes());
    }

    #[test]
    fn test_start_clamps_autoset_period() {
        let mut device = opened_device(vec![
            sensor_info_reply(1, 10_000, 0), // typical period 10 ms, below the floor
            ack_reply(),
            ack_reply(),
        ]);
        device.enable_sensors(&[1]).unwrap();
        device.start(None).unwrap();
        assert_eq!(device.sample_period_ms(), 100.0);
    }

    #[test]
    fn test_start_with_explicit_period_is_not_clamped() {
        let mut device = opened_device(vec![
            sensor_info_reply(1, 500_000, 0),
            ack_reply(),
            ack_reply(),
        ]);
        device.enable_sensors(&[1]).unwrap();
        device.start(Some(10.0)).unwrap();
        assert_eq!(device.sample_period_ms(), 10.0);
    }

    #[test]
    fn test_start_enables_defaults_when_nothing_enabled() {
        let mut device = opened_device(vec![
            mask_reply(0b10),
            mask_reply(0b10),
            sensor_info_reply(1, 500_000, 0),
            ack_reply(),
            ack_reply(),
        ]);
        device.start(None).unwrap();
        assert_eq!(device.sensors().enabled_numbers(), vec![1]);
        assert_eq!(device.state(), DeviceState::Streaming);
    }

    #[test]
    fn test_start_requires_open_device() {
        let mut device = GoDirectDevice::new(MockTransport::new(vec![]));
        assert!(matches!(
            device.start(None),
            Err(GoDirectError::InvalidState(_))
        ));
    }

    #[test]
    fn test_read_requires_streaming() {
        let mut device = opened_device(vec![]);
        assert!(matches!(
            device.read(Duration::from_millis(10)),
            Err(GoDirectError::InvalidState(_))
        ));
    }

    fn streaming_device(extra_replies: Vec<Vec<u8>>) -> GoDirectDevice<MockTransport> {
        let mut replies = vec![sensor_info_reply(2, 500_000, 0), ack_reply(), ack_reply()];
        replies.extend(extra_replies);
        let mut device = opened_device(replies);
        device.enable_sensors(&[2]).unwrap();
        device.start(None).unwrap();
        device
    }

    #[test]
    fn test_read_times_out_within_budget() {
        let mut device = streaming_device(vec![]);
        let start = Instant::now();
        let result = device.read(Duration::from_millis(100));
        assert!(matches!(result, Err(GoDirectError::Timeout)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        // Bounded above too: the budget must not stretch indefinitely.
        assert!(elapsed < Duration::from_secs(1), "read blocked for {elapsed:?}");
    }

    #[test]
    fn test_read_skips_bookkeeping_and_runt_frames() {
        let mut device = streaming_device(vec![
            vec![0x20, 0x06, 0x00, 0x00, 0x0C, 0x00], // start-time notice
            vec![0x20, 0x02],                         // runt
            measurement_frame(0b100, &[9.5]),
        ]);
        device.read(Duration::from_millis(500)).unwrap();
        assert_eq!(device.sensors().get(2).unwrap().value(), Some(9.5));
    }

    #[test]
    fn test_command_reply_waits_past_interleaved_measurement() {
        let mut device = streaming_device(vec![
            measurement_frame(0b100, &[4.25]),
            status_reply(),
        ]);
        let status = device.refresh_status().unwrap();
        assert_eq!(status.battery_level_percent, 91);
        // The measurement that arrived first still landed in the registry.
        assert_eq!(device.sensors().get(2).unwrap().value(), Some(4.25));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut device = streaming_device(vec![ack_reply(), ack_reply()]);
        device.stop().unwrap();
        assert_eq!(device.state(), DeviceState::Stopped);
        device.stop().unwrap();
        assert_eq!(device.state(), DeviceState::Stopped);
        let stops = sent_opcodes(&device).iter().filter(|&&op| op == 0x19).count();
        assert_eq!(stops, 2);
    }

    #[test]
    fn test_restart_after_stop() {
        let mut device = streaming_device(vec![
            ack_reply(), // stop
            ack_reply(), // set period
            ack_reply(), // start
        ]);
        device.stop().unwrap();
        device.start(None).unwrap();
        assert_eq!(device.state(), DeviceState::Streaming);
    }

    #[test]
    fn test_close_drops_the_link() {
        let mut device = opened_device(vec![ack_reply()]);
        device.close().unwrap();
        assert_eq!(device.state(), DeviceState::Closed);
        assert!(!device.transport.connected);
        // Closing again is a no-op.
        device.close().unwrap();
    }

    #[test]
    fn test_close_swallows_transport_disconnect_failure() {
        let mut device = opened_device(vec![ack_reply()]);
        device.transport.fail_disconnect = true;
        device.close().unwrap();
        assert_eq!(device.state(), DeviceState::Closed);
    }

    #[test]
    fn test_close_without_goodbye_reply_still_closes() {
        let mut device = opened_device(vec![]);
        device.set_command_timeout(Duration::from_millis(50));
        device.close().unwrap();
        assert_eq!(device.state(), DeviceState::Closed);
        assert!(!device.transport.connected);
    }
}
