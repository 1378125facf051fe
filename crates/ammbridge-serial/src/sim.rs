//! In-memory serial channel for headless tests.
//!
//! [`SimSerial`] replays scripted inbound chunks (one chunk per
//! `read_until` call) and records every write, so the full bridge loop can
//! run in CI without a device attached.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use ammbridge_serial::{SerialChannel, SimSerial};
//!
//! let mut serial = SimSerial::new().with_inbound(b"[REPORT]ok\n");
//! let written = serial.written();
//!
//! assert_eq!(serial.read_until(b'\n', Duration::from_millis(1)).unwrap(), b"[REPORT]ok\n");
//! serial.write(b"[AMM_Command]START_SIM\n").unwrap();
//! assert_eq!(written.lines(), vec!["[AMM_Command]START_SIM\n".to_string()]);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ammbridge_types::BridgeError;

use crate::channel::SerialChannel;

/// Shared view of everything written to a [`SimSerial`].
#[derive(Clone, Default, Debug)]
pub struct WriteLog(Arc<Mutex<Vec<String>>>);

impl WriteLog {
    /// Every successful write, in order, decoded lossily.
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn push(&self, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(String::from_utf8_lossy(bytes).into_owned());
    }
}

/// Simulated serial device.
#[derive(Default)]
pub struct SimSerial {
    inbound: VecDeque<Vec<u8>>,
    written: WriteLog,
    fail_writes: bool,
    closed: bool,
    /// Sleep applied when a read finds nothing scripted, mimicking a real
    /// read timeout without burning CPU in loop tests.
    idle_read: Option<Duration>,
}

impl SimSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one chunk to be returned by a future `read_until`.
    pub fn with_inbound(mut self, chunk: &[u8]) -> Self {
        self.inbound.push_back(chunk.to_vec());
        self
    }

    /// Make every write fail with [`BridgeError::SerialIo`].
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Sleep for at most `timeout` (capped at `max`) when no chunk is queued.
    pub fn with_idle_read(mut self, max: Duration) -> Self {
        self.idle_read = Some(max);
        self
    }

    /// Handle to the write log that stays valid after the channel is moved.
    pub fn written(&self) -> WriteLog {
        self.written.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl SerialChannel for SimSerial {
    fn read_until(&mut self, _delimiter: u8, timeout: Duration) -> Result<Vec<u8>, BridgeError> {
        if self.closed {
            return Err(BridgeError::SerialIo("simulated port is closed".into()));
        }
        match self.inbound.pop_front() {
            Some(chunk) => Ok(chunk),
            None => {
                if let Some(max) = self.idle_read {
                    std::thread::sleep(timeout.min(max));
                }
                Ok(Vec::new())
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), BridgeError> {
        if self.closed {
            return Err(BridgeError::SerialIo("simulated port is closed".into()));
        }
        if self.fail_writes {
            return Err(BridgeError::SerialIo("simulated write failure".into()));
        }
        self.written.push(bytes);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
