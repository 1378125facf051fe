//! [`Bridge`] – the blocking main loop, its [`LifecycleState`], and the
//! shared [`Shutdown`] flag.
//!
//! ```text
//! Starting ──► Running ──► Draining ──► Stopped
//! ```
//!
//! While `Running` the loop alternates one bounded serial read (fed to the
//! [`InboundDispatcher`]) with one bounded drain pass of the transmit queue, and
//! re-checks the shutdown flag after every cycle.  The flag is set by the
//! signal handler or by an operator typing `EXIT` on the console.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use ammbridge_middleware::DispatchTable;
use ammbridge_serial::SerialChannel;
use ammbridge_types::RecordKind;
use tracing::{debug, error, info, warn};

use crate::inbound::InboundDispatcher;
use crate::outbound::OutboundFilter;
use crate::protocol::LINE_DELIMITER;
use crate::transmit::{DEFAULT_PACING, TransmitDrainer};

/// Default upper bound on a single serial read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Record kinds the device can receive.
pub const OUTBOUND_KINDS: [RecordKind; 6] = [
    RecordKind::PhysiologyValue,
    RecordKind::PhysiologyWaveform,
    RecordKind::PhysiologyModification,
    RecordKind::RenderModification,
    RecordKind::Command,
    RecordKind::SimulationControl,
];

// ────────────────────────────────────────────────────────────────────────────
// Shutdown flag
// ────────────────────────────────────────────────────────────────────────────

/// Process-wide stop request.  Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Lifecycle state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Starting = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Starting,
            1 => LifecycleState::Running,
            2 => LifecycleState::Draining,
            _ => LifecycleState::Stopped,
        }
    }
}

/// Read-only view of a [`Bridge`]'s state that can be moved to another thread.
#[derive(Debug, Clone)]
pub struct StateWatch(Arc<AtomicU8>);

impl StateWatch {
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bridge
// ────────────────────────────────────────────────────────────────────────────

/// Loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeTiming {
    pub read_timeout: Duration,
    pub pacing: Duration,
}

impl Default for BridgeTiming {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            pacing: DEFAULT_PACING,
        }
    }
}

/// Totals accumulated over one [`Bridge::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub lines_in: u64,
    pub lines_out: u64,
    pub lines_dropped: u64,
    pub read_errors: u64,
}

pub struct Bridge {
    serial: Box<dyn SerialChannel>,
    inbound: InboundDispatcher,
    drainer: TransmitDrainer,
    shutdown: Shutdown,
    timing: BridgeTiming,
    state: Arc<AtomicU8>,
}

impl Bridge {
    pub fn new(
        serial: Box<dyn SerialChannel>,
        inbound: InboundDispatcher,
        drainer: TransmitDrainer,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            serial,
            inbound,
            drainer,
            shutdown,
            timing: BridgeTiming::default(),
            state: Arc::new(AtomicU8::new(LifecycleState::Starting as u8)),
        }
    }

    pub fn with_timing(mut self, timing: BridgeTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn state_watch(&self) -> StateWatch {
        StateWatch(Arc::clone(&self.state))
    }

    pub fn inbound(&self) -> &InboundDispatcher {
        &self.inbound
    }

    fn set_state(&self, next: LifecycleState) {
        let prev = LifecycleState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        debug!(from = ?prev, to = ?next, "bridge state");
    }

    /// Run until the shutdown flag is set, then close the serial channel.
    ///
    /// Read errors are logged and retried after the read timeout; they never
    /// end the loop.
    pub fn run(&mut self) -> RunSummary {
        let mut summary = RunSummary::default();
        self.set_state(LifecycleState::Running);
        info!(
            read_timeout_ms = self.timing.read_timeout.as_millis() as u64,
            pacing_ms = self.timing.pacing.as_millis() as u64,
            "bridge running"
        );

        while !self.shutdown.is_triggered() {
            summary.cycles += 1;
            match self.serial.read_until(LINE_DELIMITER, self.timing.read_timeout) {
                Ok(bytes) if !bytes.is_empty() => {
                    summary.lines_in += self.inbound.feed(&bytes) as u64;
                }
                Ok(_) => {}
                Err(e) => {
                    summary.read_errors += 1;
                    error!(error = %e, "serial read failed");
                    std::thread::sleep(self.timing.read_timeout);
                }
            }

            let report = self.drainer.drain(self.serial.as_mut(), self.timing.pacing);
            summary.lines_out += report.written as u64;
            summary.lines_dropped += report.dropped as u64;
        }

        self.set_state(LifecycleState::Draining);
        self.serial.close();
        self.set_state(LifecycleState::Stopped);
        info!(
            lines_in = summary.lines_in,
            lines_out = summary.lines_out,
            dropped = summary.lines_dropped,
            "bridge stopped"
        );
        summary
    }
}

/// Dispatch table routing every device-bound record kind to `filter`.
pub fn outbound_dispatch_table(filter: OutboundFilter) -> DispatchTable {
    let mut table = DispatchTable::new();
    for kind in OUTBOUND_KINDS {
        let filter = filter.clone();
        table.register(kind, move |record| filter.handle(record));
    }
    table
}

// ────────────────────────────────────────────────────────────────────────────
// Console
// ────────────────────────────────────────────────────────────────────────────

/// Read operator lines from `input` until `EXIT` or end of input.
///
/// `EXIT` (any case, surrounding whitespace ignored) triggers `shutdown`.
/// End of input or a read error returns without triggering it.
pub fn listen_console<R: BufRead>(input: R, shutdown: &Shutdown) {
    for line in input.lines() {
        match line {
            Ok(line) if line.trim().eq_ignore_ascii_case("EXIT") => {
                info!("EXIT received on console");
                shutdown.trigger();
                return;
            }
            Ok(line) => debug!(input = %line.trim(), "console input ignored"),
            Err(e) => {
                warn!(error = %e, "console read failed; listener exiting");
                return;
            }
        }
    }
    debug!("console closed");
}

/// Run [`listen_console`] on a dedicated OS thread.
pub fn spawn_console_listener<R>(input: R, shutdown: Shutdown) -> std::io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    std::thread::Builder::new()
        .name("ammbridge-console".into())
        .spawn(move || listen_console(input, &shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurator::Configurator;
    use crate::routing::RoutingState;
    use crate::test_support::{RecordingBus, identity};
    use crate::transmit::transmit_queue;
    use ammbridge_middleware::MessageBus;
    use ammbridge_serial::SimSerial;
    use ammbridge_types::{Command, Record};
    use std::io::Cursor;
    use std::time::Instant;

    fn fast() -> BridgeTiming {
        BridgeTiming {
            read_timeout: Duration::from_millis(5),
            pacing: Duration::ZERO,
        }
    }

    #[test]
    fn exit_sets_shutdown_flag() {
        let shutdown = Shutdown::new();
        listen_console(Cursor::new("status\n  exit  \nnever read\n"), &shutdown);
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn eof_does_not_set_shutdown_flag() {
        let shutdown = Shutdown::new();
        listen_console(Cursor::new("status\nhelp\n"), &shutdown);
        assert!(!shutdown.is_triggered());
    }

    #[test]
    fn spawned_listener_shares_flag() {
        let shutdown = Shutdown::new();
        spawn_console_listener(Cursor::new("EXIT\n"), shutdown.clone())
            .unwrap()
            .join()
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn run_processes_input_drains_queue_and_stops() {
        let bus = Arc::new(RecordingBus::default());
        let routing = Arc::new(RoutingState::new());
        let shared: Arc<dyn MessageBus> = bus.clone();
        let inbound = InboundDispatcher::new(Configurator::new(identity(), Arc::clone(&routing)), shared);

        let serial = SimSerial::new()
            .with_inbound(b"[AMM_Command]START_SIM\n")
            .with_idle_read(Duration::from_millis(5));
        let written = serial.written();

        let (tx, drainer) = transmit_queue();
        tx.enqueue("[AMM_Command]PAUSE_SIM\n");

        let shutdown = Shutdown::new();
        let mut bridge = Bridge::new(Box::new(serial), inbound, drainer, shutdown.clone()).with_timing(fast());
        assert_eq!(bridge.state(), LifecycleState::Starting);
        let watch = bridge.state_watch();

        let stopper = std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while watch.get() != LifecycleState::Running && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            std::thread::sleep(Duration::from_millis(50));
            shutdown.trigger();
        });

        let summary = bridge.run();
        stopper.join().unwrap();

        assert_eq!(bridge.state(), LifecycleState::Stopped);
        assert_eq!(summary.lines_in, 1);
        assert_eq!(summary.lines_out, 1);
        assert_eq!(
            bus.records(),
            vec![Record::Command(Command {
                message: "START_SIM".into()
            })]
        );
        assert_eq!(written.lines(), vec!["[AMM_Command]PAUSE_SIM\n"]);
    }

    #[test]
    fn shutdown_is_seen_while_producers_outpace_the_serial_line() {
        let bus: Arc<dyn MessageBus> = Arc::new(RecordingBus::default());
        let inbound = InboundDispatcher::new(Configurator::new(identity(), Arc::new(RoutingState::new())), bus);
        let serial = SimSerial::new().with_idle_read(Duration::from_millis(5));
        let (tx, drainer) = transmit_queue();
        let shutdown = Shutdown::new();
        let timing = BridgeTiming {
            read_timeout: Duration::from_millis(5),
            pacing: Duration::from_millis(10),
        };
        let mut bridge = Bridge::new(Box::new(serial), inbound, drainer, shutdown.clone()).with_timing(timing);

        let producing = Arc::new(AtomicBool::new(true));
        let producer = {
            let producing = Arc::clone(&producing);
            std::thread::spawn(move || {
                let mut i = 0u64;
                while producing.load(Ordering::SeqCst) {
                    tx.enqueue(format!("[HF_ECG]{i}\n"));
                    i += 1;
                    std::thread::sleep(Duration::from_millis(2));
                }
            })
        };
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            shutdown.trigger();
        });

        let started = Instant::now();
        let summary = bridge.run();
        let elapsed = started.elapsed();
        let still_producing = producing.load(Ordering::SeqCst);
        producing.store(false, Ordering::SeqCst);
        producer.join().unwrap();
        stopper.join().unwrap();

        assert!(still_producing);
        assert!(elapsed < Duration::from_secs(2), "run took {elapsed:?}");
        assert!(summary.cycles > 1);
        assert_eq!(bridge.state(), LifecycleState::Stopped);
    }

    #[test]
    fn read_errors_do_not_end_the_loop() {
        let bus: Arc<dyn MessageBus> = Arc::new(RecordingBus::default());
        let inbound = InboundDispatcher::new(Configurator::new(identity(), Arc::new(RoutingState::new())), bus);
        let mut serial = SimSerial::new();
        serial.close();
        let (_tx, drainer) = transmit_queue();
        let shutdown = Shutdown::new();
        let mut bridge = Bridge::new(Box::new(serial), inbound, drainer, shutdown.clone()).with_timing(fast());

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(40));
            shutdown.trigger();
        });
        let summary = bridge.run();
        stopper.join().unwrap();

        assert!(summary.read_errors >= 2);
        assert_eq!(bridge.state(), LifecycleState::Stopped);
    }

    #[test]
    fn preset_shutdown_skips_the_loop() {
        let bus: Arc<dyn MessageBus> = Arc::new(RecordingBus::default());
        let inbound = InboundDispatcher::new(Configurator::new(identity(), Arc::new(RoutingState::new())), bus);
        let (_tx, drainer) = transmit_queue();
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut bridge = Bridge::new(Box::new(SimSerial::new()), inbound, drainer, shutdown);
        assert_eq!(bridge.run(), RunSummary::default());
        assert_eq!(bridge.state(), LifecycleState::Stopped);
    }

    #[test]
    fn dispatch_table_covers_device_bound_kinds() {
        let (tx, _drainer) = transmit_queue();
        let table = outbound_dispatch_table(OutboundFilter::new(Arc::new(RoutingState::new()), tx));
        let mut expected = OUTBOUND_KINDS.to_vec();
        expected.sort();
        assert_eq!(table.kinds(), expected);
    }
}
