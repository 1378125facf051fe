//! Generic [`SerialChannel`] trait for line-oriented byte transports.

use std::time::Duration;

use ammbridge_types::BridgeError;

/// Byte-level serial transport as seen by the bridge core.
///
/// The channel is owned by the main loop; reads and writes never happen
/// concurrently, so methods take `&mut self`.
pub trait SerialChannel: Send {
    /// Read bytes until `delimiter` has been received or `timeout` elapses.
    ///
    /// On timeout the bytes received so far are returned, which may be an
    /// empty vector.  The delimiter, when present, is included in the result.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SerialIo`] on a transport failure other than a
    /// timeout.
    fn read_until(&mut self, delimiter: u8, timeout: Duration) -> Result<Vec<u8>, BridgeError>;

    /// Write every byte of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SerialIo`] if the bytes could not be written.
    fn write(&mut self, bytes: &[u8]) -> Result<(), BridgeError>;

    /// Release the underlying device.  Further reads and writes fail.
    fn close(&mut self);
}
