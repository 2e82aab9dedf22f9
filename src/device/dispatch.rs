//! Command/response dispatch over the transport.
//!
//! The device streams unsolicited measurement frames on the same pipe as
//! command replies, so every wait loop here must pull frames off the
//! transport, route 0x20-tagged ones into the sensor registry, and keep
//! waiting. All waits run against a wall-clock budget so a chatty device
//! cannot extend a timeout indefinitely.

use std::time::{Duration, Instant};

use log::{debug, warn};

use super::GoDirectDevice;
use crate::common::command::Command;
use crate::common::error::GoDirectError;
use crate::common::packet::{build_frame, hex, verify_checksum, RESPONSE_MEASUREMENT};
use crate::common::transport::Transport;
use crate::sensor::measurement::{handle_measurement, MeasurementType};

/// Budget for one command/response exchange.
pub(super) const COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);

impl<T: Transport> GoDirectDevice<T> {
    fn gdx_write(&mut self, frame: &[u8]) -> Result<(), GoDirectError<T::Error>> {
        debug!("GDX >> {}", hex(frame));
        self.transport.transmit(frame).map_err(GoDirectError::Transport)
    }

    fn gdx_read(&mut self, timeout: Duration) -> Vec<u8> {
        let frame = self.transport.receive(timeout);
        if !frame.is_empty() {
            debug!("GDX << {}", hex(&frame));
        }
        frame
    }

    /// Sends `command` and blocks until its reply frame arrives.
    ///
    /// Measurement frames that arrive first are decoded into the registry
    /// and do not satisfy the wait; a decode failure there is logged, not
    /// fatal, because the command exchange itself is still healthy.
    pub(super) fn write_and_get_response(
        &mut self,
        command: &Command,
    ) -> Result<Vec<u8>, GoDirectError<T::Error>> {
        let frame = build_frame(command, &mut self.counter);
        self.gdx_write(&frame)?;

        let deadline = Instant::now() + self.command_timeout;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|r| !r.is_zero()) else {
                debug!("Timeout waiting for {command:?} reply");
                return Err(GoDirectError::Timeout);
            };
            let response = self.gdx_read(remaining);
            if response.len() < 2 {
                continue;
            }
            if response[0] == RESPONSE_MEASUREMENT {
                if let Err(e) = handle_measurement(&mut self.sensors, &response) {
                    warn!("Dropping interleaved measurement: {e}");
                }
                continue;
            }
            verify_checksum(&response);
            return Ok(response);
        }
    }

    /// Sends `command` and waits for any acknowledging frame, discarding
    /// its bytes.
    pub(super) fn write_and_check_response(
        &mut self,
        command: &Command,
    ) -> Result<(), GoDirectError<T::Error>> {
        self.write_and_get_response(command).map(|_| ())
    }

    /// Blocks until one sample-bearing measurement frame has been decoded
    /// into the registry, or `timeout` elapses.
    ///
    /// Runt frames, non-measurement frames, and the bookkeeping sub-types
    /// (start time, dropped count, period change) never satisfy the wait.
    pub(super) fn read_measurement(
        &mut self,
        timeout: Duration,
    ) -> Result<(), GoDirectError<T::Error>> {
        let deadline = Instant::now() + timeout;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|r| !r.is_zero()) else {
                debug!("Timeout waiting for a measurement");
                return Err(GoDirectError::Timeout);
            };
            let response = self.gdx_read(remaining);
            if response.len() < 5 {
                continue;
            }
            if response[0] != RESPONSE_MEASUREMENT {
                debug!("Not a measurement frame, still waiting");
                continue;
            }
            if MeasurementType::from_u8(response[4]).is_ok_and(|t| t.is_discarded()) {
                continue;
            }
            handle_measurement(&mut self.sensors, &response)?;
            return Ok(());
        }
    }
}
