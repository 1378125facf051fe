//! Outbound line queue between bus callbacks and the serial writer.
//!
//! Producers hold a cloneable [`TransmitSender`] and never block.  The single
//! [`TransmitDrainer`] lives on the main loop and is the only code that writes
//! to the [`SerialChannel`].

use std::time::Duration;

use ammbridge_serial::SerialChannel;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::{debug, warn};

/// Default gap between consecutive serial writes.
pub const DEFAULT_PACING: Duration = Duration::from_millis(100);

/// Most lines written by one [`TransmitDrainer::drain`] pass.
pub const MAX_PASS_LINES: usize = 32;

/// Create a connected sender/drainer pair.
pub fn transmit_queue() -> (TransmitSender, TransmitDrainer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TransmitSender { tx }, TransmitDrainer { rx })
}

/// Producer half.  Clone one per callback.
#[derive(Clone, Debug)]
pub struct TransmitSender {
    tx: UnboundedSender<String>,
}

impl TransmitSender {
    /// Append a fully formatted line.  Returns `false` once the drainer is
    /// gone.
    pub fn enqueue(&self, line: impl Into<String>) -> bool {
        self.tx.send(line.into()).is_ok()
    }
}

/// Outcome of one [`TransmitDrainer::drain`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub written: usize,
    pub dropped: usize,
}

/// Consumer half.
#[derive(Debug)]
pub struct TransmitDrainer {
    rx: UnboundedReceiver<String>,
}

impl TransmitDrainer {
    /// Write the lines queued when the pass starts to `serial`, oldest first,
    /// sleeping `pacing` after each one.
    ///
    /// At most [`MAX_PASS_LINES`] are written; the rest, and anything
    /// enqueued during the pass, wait for the next one.  A failed write drops
    /// that line; there is no retry.
    pub fn drain(&mut self, serial: &mut dyn SerialChannel, pacing: Duration) -> DrainReport {
        let mut report = DrainReport::default();
        let pending = self.rx.len().min(MAX_PASS_LINES);
        for _ in 0..pending {
            let line = match self.rx.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            };
            match serial.write(line.as_bytes()) {
                Ok(()) => {
                    debug!(line = %line.trim_end(), "sent");
                    report.written += 1;
                }
                Err(e) => {
                    warn!(error = %e, line = %line.trim_end(), "serial write failed; line dropped");
                    report.dropped += 1;
                }
            }
            if !pacing.is_zero() {
                std::thread::sleep(pacing);
            }
        }
        report
    }

    /// Lines waiting to be drained.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
