//! `ammbridge-serial` – the device side of the bridge.
//!
//! # Modules
//!
//! - [`channel`] – the [`SerialChannel`] trait the core reads from and writes
//!   to.
//! - [`port`] – [`SerialPortChannel`], a real tty opened with the
//!   `serialport` crate.
//! - [`sim`] – [`SimSerial`], a scripted in-memory channel for tests.

pub mod channel;
pub mod port;
pub mod sim;

pub use channel::SerialChannel;
pub use port::{DEFAULT_READ_BUFFER_MAX, SerialPortChannel};
pub use sim::{SimSerial, WriteLog};
