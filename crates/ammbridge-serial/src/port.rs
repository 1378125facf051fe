//! [`SerialPortChannel`] – a [`SerialChannel`] over a real tty via the
//! `serialport` crate.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use ammbridge_types::BridgeError;
use serialport::SerialPort;
use tracing::{debug, info};

use crate::channel::SerialChannel;

/// Upper bound on bytes returned by a single [`SerialChannel::read_until`].
pub const DEFAULT_READ_BUFFER_MAX: usize = 8192;

/// Serial device opened 8N1 at a fixed baud rate.
pub struct SerialPortChannel {
    path: String,
    port: Option<Box<dyn SerialPort>>,
    read_buffer_max: usize,
}

impl SerialPortChannel {
    /// Open `path` at `baud_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SerialOpen`] when the device cannot be opened.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, BridgeError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(|e| BridgeError::SerialOpen {
                port: path.to_string(),
                details: e.to_string(),
            })?;
        info!(port = path, baud_rate, "serial port opened");
        Ok(Self {
            path: path.to_string(),
            port: Some(port),
            read_buffer_max: DEFAULT_READ_BUFFER_MAX,
        })
    }

    /// Override the per-read byte cap.
    pub fn with_read_buffer_max(mut self, max: usize) -> Self {
        self.read_buffer_max = max.max(1);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, BridgeError> {
        let path = &self.path;
        self.port
            .as_mut()
            .ok_or_else(|| BridgeError::SerialIo(format!("{path} is closed")))
    }
}

impl SerialChannel for SerialPortChannel {
    fn read_until(&mut self, delimiter: u8, timeout: Duration) -> Result<Vec<u8>, BridgeError> {
        let max = self.read_buffer_max;
        let port = self.port_mut()?;
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        let mut byte = [0u8; 1];

        while out.len() < max {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            port.set_timeout(remaining)
                .map_err(|e| BridgeError::SerialIo(e.to_string()))?;
            match port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    out.push(byte[0]);
                    if byte[0] == delimiter {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(BridgeError::SerialIo(e.to_string())),
            }
        }
        Ok(out)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), BridgeError> {
        let port = self.port_mut()?;
        port.write_all(bytes)
            .map_err(|e| BridgeError::SerialIo(e.to_string()))?;
        port.flush().map_err(|e| BridgeError::SerialIo(e.to_string()))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.path, "serial port closed");
        }
    }
}
