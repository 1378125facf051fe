//! `ammbridge` – AMM serial bridge.
//!
//! Connects a device speaking the AMM serial line protocol to the simulation
//! message bus:
//!
//! 1. Loads `~/.ammbridge/config.toml` (or `--config`), applies `AMMBRIDGE_*`
//!    environment overrides and command-line flags.
//! 2. Assigns the bridge's module identity, registers the device-bound bus
//!    handlers and optionally starts the WebSocket bus gateway.
//! 3. Opens the serial port and runs the bridge loop until Ctrl-C, SIGTERM or
//!    `EXIT` on stdin.
//!
//! Exit status: `0` on clean shutdown, `1` for invalid arguments or
//! configuration, `2` when the serial port cannot be opened, `3` when the
//! runtime or bus cannot be started.

mod config;
mod telemetry;

use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ammbridge_core::{
    Bridge, Configurator, InboundDispatcher, OutboundFilter, RoutingState, Shutdown, outbound_dispatch_table,
    spawn_console_listener, transmit_queue,
};
use ammbridge_middleware::{BusGateway, BusParticipant, EventBus, MessageBus};
use ammbridge_serial::SerialPortChannel;
use ammbridge_types::ModuleIdentity;
use clap::Parser;
use colored::Colorize;
use tracing::{error, info, warn};

const ARGUMENT_ERROR: i32 = 1;
const SERIAL_FAILURE: i32 = 2;
const STARTUP_FAILURE: i32 = 3;

/// Bridge an AMM serial device onto the simulation message bus.
#[derive(Parser, Debug)]
#[command(name = "ammbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial device path.
    #[arg(short, long)]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Configuration file (default: ~/.ammbridge/config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serve the bus over WebSocket on this address, e.g. 127.0.0.1:9090.
    #[arg(long)]
    gateway: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { ARGUMENT_ERROR } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let _guard = telemetry::init_tracing("ammbridge", telemetry::level_for_verbosity(args.verbose));

    let mut cfg = match config::load(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red());
            std::process::exit(ARGUMENT_ERROR);
        }
    };
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(baud) = args.baud {
        cfg.baud_rate = baud;
    }
    if let Some(gateway) = args.gateway {
        cfg.gateway_addr = Some(gateway);
    }

    print_banner(&cfg);
    std::process::exit(run(cfg));
}

fn run(cfg: config::Config) -> i32 {
    let gateway_addr = match cfg.gateway_addr.as_deref().map(str::parse::<SocketAddr>).transpose() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("{}: invalid gateway address: {e}", "Config error".red());
            return ARGUMENT_ERROR;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("ammbridge-bus")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start Tokio runtime");
            return STARTUP_FAILURE;
        }
    };

    // ── Starting ──────────────────────────────────────────────────────────
    let identity = Arc::new(module_identity(&cfg));
    info!(
        module = %identity.name(),
        module_id = %identity.module_id(),
        model = %identity.model(),
        manufacturer = %identity.manufacturer(),
        serial_number = %identity.serial_number(),
        module_version = %identity.module_version(),
        "module identity assigned"
    );

    let bus = Arc::new(EventBus::default());
    let participant = BusParticipant::new(Arc::clone(&bus), identity.source_tag());

    let routing = Arc::new(RoutingState::new());
    let (tx, drainer) = transmit_queue();
    let mut filter = OutboundFilter::new(Arc::clone(&routing), tx);
    if let Some(dir) = &cfg.static_config_dir {
        filter = filter.with_static_config_dir(dir.clone());
    }
    let pumps = match outbound_dispatch_table(filter).spawn(&participant, runtime.handle()) {
        Ok(pumps) => pumps,
        Err(e) => {
            error!(error = %e, "failed to register bus handlers");
            return STARTUP_FAILURE;
        }
    };
    info!(handlers = pumps.len(), "bus handlers registered");

    if let Some(addr) = gateway_addr {
        let gateway = BusGateway::new(Arc::clone(&bus));
        runtime.spawn(async move {
            if let Err(e) = gateway.run_ws_server(addr).await {
                error!(error = %e, "bus gateway stopped");
            }
        });
    }

    let serial = match SerialPortChannel::open(&cfg.port, cfg.baud_rate) {
        Ok(serial) => serial.with_read_buffer_max(cfg.read_buffer_max),
        Err(e) => {
            error!(error = %e, "serial port unavailable");
            eprintln!("{} {e}", "✗".red().bold());
            return SERIAL_FAILURE;
        }
    };

    // ── Shutdown triggers ─────────────────────────────────────────────────
    let shutdown = Shutdown::new();
    let on_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Signal received – shutting down …".yellow().bold());
        on_signal.trigger();
    }) {
        warn!(error = %e, "failed to install signal handler; use EXIT to stop");
    }
    if let Err(e) = spawn_console_listener(BufReader::new(std::io::stdin()), shutdown.clone()) {
        warn!(error = %e, "console listener unavailable");
    }

    // ── Running ───────────────────────────────────────────────────────────
    let writer: Arc<dyn MessageBus> = Arc::new(participant);
    let inbound = InboundDispatcher::new(Configurator::new(Arc::clone(&identity), routing), writer)
        .with_max_pending(cfg.read_buffer_max.saturating_mul(8));
    let mut bridge = Bridge::new(Box::new(serial), inbound, drainer, shutdown).with_timing(cfg.timing());
    let summary = bridge.run();

    for pump in pumps {
        pump.abort();
    }
    runtime.shutdown_timeout(Duration::from_millis(500));

    println!(
        "{} {} lines in, {} out, {} dropped",
        "✓".green().bold(),
        summary.lines_in,
        summary.lines_out,
        summary.lines_dropped
    );
    0
}

fn module_identity(cfg: &config::Config) -> ModuleIdentity {
    ModuleIdentity::generate(
        cfg.module_name.clone(),
        cfg.model.clone(),
        cfg.manufacturer.clone(),
        cfg.serial_number.clone(),
        cfg.module_version.clone(),
    )
}

fn print_banner(cfg: &config::Config) {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║          AMM Serial Bridge           ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!(
        "  {} {}",
        "version".dimmed(),
        env!("CARGO_PKG_VERSION").bold()
    );
    println!("  {} {} @ {}", "serial ".dimmed(), cfg.port.bold(), cfg.baud_rate);
    if let Some(addr) = &cfg.gateway_addr {
        println!("  {} ws://{}", "gateway".dimmed(), addr.bold());
    }
    println!("  Type {} to stop.\n", "EXIT".bold().cyan());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let args = Args::try_parse_from(["ammbridge", "-p", "/dev/ttyUSB0", "-b", "9600", "-vv"]).unwrap();
        assert_eq!(args.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(args.baud, Some(9600));
        assert_eq!(args.verbose, 2);
        assert!(args.gateway.is_none());
    }

    #[test]
    fn long_flags_parse() {
        let args = Args::try_parse_from([
            "ammbridge",
            "--port",
            "/dev/ttyACM0",
            "--config",
            "/etc/ammbridge.toml",
            "--gateway",
            "0.0.0.0:9090",
        ])
        .unwrap();
        assert_eq!(args.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(args.config, Some(PathBuf::from("/etc/ammbridge.toml")));
        assert_eq!(args.gateway.as_deref(), Some("0.0.0.0:9090"));
    }

    #[test]
    fn bad_baud_is_an_argument_error() {
        let err = Args::try_parse_from(["ammbridge", "-b", "fast"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn version_flag_is_not_an_error_exit() {
        let err = Args::try_parse_from(["ammbridge", "-V"]).unwrap_err();
        assert!(!err.use_stderr());
    }

    #[test]
    fn identity_carries_configured_descriptor_fields() {
        let cfg = config::Config {
            module_name: "Pad_Bridge".into(),
            model: "PB-2".into(),
            manufacturer: "Acme".into(),
            serial_number: "0042".into(),
            module_version: "3.1".into(),
            ..config::Config::default()
        };
        let identity = module_identity(&cfg);
        assert_eq!(identity.name(), "Pad_Bridge");
        assert_eq!(identity.model(), "PB-2");
        assert_eq!(identity.manufacturer(), "Acme");
        assert_eq!(identity.serial_number(), "0042");
        assert_eq!(identity.module_version(), "3.1");
        assert!(identity.source_tag().starts_with("Pad_Bridge::"));
    }

    #[test]
    fn unreachable_serial_port_maps_to_serial_failure() {
        let cfg = config::Config {
            port: "/dev/ammbridge-does-not-exist".into(),
            ..config::Config::default()
        };
        assert_eq!(run(cfg), SERIAL_FAILURE);
    }

    #[test]
    fn bad_gateway_address_maps_to_argument_error() {
        let cfg = config::Config {
            gateway_addr: Some("not-an-address".into()),
            ..config::Config::default()
        };
        assert_eq!(run(cfg), ARGUMENT_ERROR);
    }
}
