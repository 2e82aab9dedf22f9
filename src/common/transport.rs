//! The transport seam and the notification hand-off queue.
//!
//! Discovery, connection establishment, and MTU chunking all live outside
//! this crate. The engine only needs four capabilities, identical for USB
//! HID and BLE: connect, disconnect, transmit a whole frame, and receive
//! with a timeout. A BLE implementation that gets its bytes pushed from a
//! notification callback can bridge them into the blocking `receive` call
//! with [`response_queue`].

use std::fmt::Debug;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::{Duration, Instant};

use log::{debug, error};

use super::packet::hex;

/// Capability contract the device session drives.
///
/// `receive` returns a complete frame, or an empty vec once `timeout`
/// elapses with nothing to deliver. How the bytes got there (synchronous
/// HID read, queued BLE notifications) is the implementer's business.
pub trait Transport {
    /// Error type for connect/disconnect/transmit failures.
    type Error: Debug;

    fn connect(&mut self) -> Result<(), Self::Error>;

    fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Writes one complete frame. Implementers fragment to the transport
    /// MTU (20-byte BLE writes, 64-byte HID reports) transparently.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Blocks up to `timeout` for one complete inbound frame. An empty vec
    /// signals timeout.
    fn receive(&mut self, timeout: Duration) -> Vec<u8>;
}

/// How long the producer side will wait on a full queue before dropping a
/// frame. Short on purpose: a notification callback must not stall the
/// radio stack behind a slow consumer.
const PUT_TIMEOUT: Duration = Duration::from_millis(500);

/// Creates the bounded single-producer/single-consumer pair bridging a
/// notification callback to a blocking `receive`.
pub fn response_queue(capacity: usize) -> (FrameAssembler, ResponseQueue) {
    let (tx, rx) = sync_channel(capacity);
    (
        FrameAssembler {
            buffer: Vec::new(),
            tx,
        },
        ResponseQueue { rx },
    )
}

/// Producer half: owned by the notification callback context.
///
/// Notifications arrive as arbitrary fragments; the device's frames declare
/// their own length in byte 1, so the assembler accumulates until at least
/// that many bytes are buffered, then forwards whole frames downstream.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    tx: SyncSender<Vec<u8>>,
}

impl FrameAssembler {
    /// Feeds one notification's worth of bytes into the assembler.
    pub fn push(&mut self, chunk: &[u8]) {
        debug!("BLE NOTIFY: <<< {}", hex(chunk));
        self.buffer.extend_from_slice(chunk);

        while self.buffer.len() >= 2 {
            let expected = usize::from(self.buffer[1]).max(2);
            if self.buffer.len() < expected {
                break;
            }
            let rest = self.buffer.split_off(expected);
            let frame = std::mem::replace(&mut self.buffer, rest);
            self.enqueue(frame);
        }
    }

    fn enqueue(&self, mut frame: Vec<u8>) {
        // Bounded wait on a full queue so a burst does not immediately drop
        // data, but the callback never blocks the radio stack for long.
        let deadline = Instant::now() + PUT_TIMEOUT;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(f)) => {
                    if Instant::now() >= deadline {
                        error!("Response queue full for {PUT_TIMEOUT:?}, dropping frame");
                        return;
                    }
                    frame = f;
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(TrySendError::Disconnected(_)) => {
                    error!("Response queue consumer is gone, dropping frame");
                    return;
                }
            }
        }
    }
}

/// Consumer half: the dispatcher blocks on this with the caller's budget.
#[derive(Debug)]
pub struct ResponseQueue {
    rx: Receiver<Vec<u8>>,
}

impl ResponseQueue {
    /// Blocks up to `timeout` for the next complete frame; empty on timeout
    /// (or if the producer side has been dropped).
    pub fn recv(&self, timeout: Duration) -> Vec<u8> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_reassembles_fragmented_frame() {
        init_logs();
        let (mut assembler, queue) = response_queue(4);
        // One 25-byte frame delivered as 20 + 5, the way a BLE stack with a
        // 20-byte MTU fragments it.
        let mut frame = vec![0x58, 25, 0xFE, 0x00, 0x1A];
        frame.extend_from_slice(&[0xAB; 20]);
        assembler.push(&frame[..20]);
        assert!(queue.recv(Duration::from_millis(10)).is_empty());
        assembler.push(&frame[20..]);
        assert_eq!(queue.recv(Duration::from_millis(10)), frame);
    }

    #[test]
    fn test_two_frames_in_one_notification() {
        let (mut assembler, queue) = response_queue(4);
        let first = vec![0x20, 0x05, 0x01, 0x02, 0x03];
        let second = vec![0x20, 0x06, 0x04, 0x05, 0x06, 0x07];
        let mut joined = first.clone();
        joined.extend_from_slice(&second);
        assembler.push(&joined);
        assert_eq!(queue.recv(Duration::from_millis(10)), first);
        assert_eq!(queue.recv(Duration::from_millis(10)), second);
    }

    #[test]
    fn test_recv_times_out_empty() {
        let (_assembler, queue) = response_queue(1);
        let start = std::time::Instant::now();
        assert!(queue.recv(Duration::from_millis(50)).is_empty());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_queue_survives_producer_drop() {
        let (mut assembler, queue) = response_queue(2);
        assembler.push(&[0x20, 0x02]);
        drop(assembler);
        assert_eq!(queue.recv(Duration::from_millis(10)), vec![0x20, 0x02]);
        assert!(queue.recv(Duration::from_millis(10)).is_empty());
    }
}
