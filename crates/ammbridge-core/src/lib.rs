//! `ammbridge-core` – the translation engine between the serial device and the
//! message bus.
//!
//! # Modules
//!
//! - [`protocol`] – wire constants, line framing, `[Topic]k=v;k=v` parsing and
//!   the outbound line renderers.
//! - [`routing`] – the immutable [`RoutingTable`] snapshot and its swap cell.
//! - [`configurator`] – applies capability-descriptor XML documents.
//! - [`inbound`] – classifies serial lines and routes them.
//! - [`outbound`] – filters bus records against the routing table and renders
//!   them as serial lines.
//! - [`transmit`] – the paced outbound line queue.
//! - [`lifecycle`] – the main loop, shutdown flag and console listener.
//!
//! # Wiring
//!
//! ```text
//!  serial ──read──► InboundDispatcher ──► Configurator ──► RoutingState
//!                          │                   │               │
//!                          └──────► MessageBus ◄┘               │
//!                                      │                        │
//!                                 DispatchTable ──► OutboundFilter
//!                                                         │
//!  serial ◄──write── TransmitDrainer ◄── TransmitSender ◄──┘
//! ```

pub mod configurator;
pub mod inbound;
pub mod lifecycle;
pub mod outbound;
pub mod protocol;
pub mod routing;
pub mod transmit;

pub use configurator::Configurator;
pub use inbound::{DEFAULT_MAX_PENDING, InboundDispatcher, LineKind, classify, diagnostic_level};
pub use lifecycle::{
    Bridge, BridgeTiming, DEFAULT_READ_TIMEOUT, LifecycleState, OUTBOUND_KINDS, RunSummary, Shutdown, StateWatch,
    listen_console, outbound_dispatch_table, spawn_console_listener,
};
pub use outbound::OutboundFilter;
pub use routing::{RoutingState, RoutingTable};
pub use transmit::{DEFAULT_PACING, DrainReport, MAX_PASS_LINES, TransmitDrainer, TransmitSender, transmit_queue};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use ammbridge_middleware::MessageBus;
    use ammbridge_types::{BridgeError, ModuleIdentity, Record, RecordKind};

    /// [`MessageBus`] that keeps every record it is given.
    #[derive(Default)]
    pub struct RecordingBus {
        records: Mutex<Vec<Record>>,
        fail: bool,
    }

    impl RecordingBus {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn records(&self) -> Vec<Record> {
            self.records.lock().unwrap().clone()
        }

        pub fn count(&self, kind: RecordKind) -> usize {
            self.records().iter().filter(|r| r.kind() == kind).count()
        }
    }

    impl MessageBus for RecordingBus {
        fn write(&self, record: Record) -> Result<(), BridgeError> {
            if self.fail {
                return Err(BridgeError::Bus("recording bus set to fail".into()));
            }
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    pub fn identity() -> Arc<ModuleIdentity> {
        Arc::new(ModuleIdentity::generate(
            "AMM_Serial_Bridge",
            "Serial Bridge",
            "Vcom3D",
            "1.0.0",
            "1.0.0",
        ))
    }
}
