//! Serial → bus direction.
//!
//! [`InboundDispatcher`] owns the byte accumulator.  Each read is appended
//! with [`InboundDispatcher::feed`]; every line completed by it is classified
//! by prefix and routed to the [`Configurator`], the bus, or the log.

use std::sync::Arc;

use ammbridge_middleware::MessageBus;
use ammbridge_serial::DEFAULT_READ_BUFFER_MAX;
use ammbridge_types::{Assessment, BridgeError, Command, PhysiologyModification, Record, RenderModification};
use tracing::{Level, debug, error, info, trace, warn};

use crate::configurator::Configurator;
use crate::protocol::{
    COMMAND_PREFIX, DIAGNOSTICS_LOG_TOPIC, GENERIC_TOPIC_PREFIX, GenericMessage, PERFORMANCE_ASSESSMENT_TOPIC,
    PHYSIOLOGY_MODIFICATION_TOPIC, RENDER_MODIFICATION_TOPIC, REPORT_PREFIX, XML_PREFIX, drain_lines,
    parse_generic,
};

/// What a single serial line is, judged by its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Report,
    Command,
    Xml,
    Generic,
    Empty,
    Unrecognized,
}

/// Classify `line` by fixed prefixes, first match wins.
///
/// `[REPORT]` and `[AMM_Command]` are tested before the bare `[` so they
/// never reach the generic router.
pub fn classify(line: &str) -> LineKind {
    if line.is_empty() {
        LineKind::Empty
    } else if line.starts_with(REPORT_PREFIX) {
        LineKind::Report
    } else if line.starts_with(COMMAND_PREFIX) {
        LineKind::Command
    } else if line.starts_with(XML_PREFIX) {
        LineKind::Xml
    } else if line.starts_with(GENERIC_TOPIC_PREFIX) {
        LineKind::Generic
    } else {
        LineKind::Unrecognized
    }
}

/// Default limit on bytes held without a line delimiter.
pub const DEFAULT_MAX_PENDING: usize = DEFAULT_READ_BUFFER_MAX * 8;

pub struct InboundDispatcher {
    buffer: Vec<u8>,
    max_pending: usize,
    configurator: Configurator,
    bus: Arc<dyn MessageBus>,
}

impl InboundDispatcher {
    pub fn new(configurator: Configurator, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            buffer: Vec::new(),
            max_pending: DEFAULT_MAX_PENDING,
            configurator,
            bus,
        }
    }

    /// Discard the partial line once it grows past `max` bytes.
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }

    /// Append `bytes` and process every line they complete.
    ///
    /// Returns the number of complete lines handled, including discarded
    /// ones.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        self.buffer.extend_from_slice(bytes);
        let lines = drain_lines(&mut self.buffer);
        let count = lines.len();
        for line in lines {
            self.process(&line);
        }
        if self.buffer.len() > self.max_pending {
            warn!(
                bytes = self.buffer.len(),
                max = self.max_pending,
                "no line delimiter received; partial line discarded"
            );
            self.buffer.clear();
        }
        if count > 0 {
            trace!(lines = count, pending = self.buffer.len(), "inbound pass");
        }
        count
    }

    /// Bytes received after the last complete line.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn configurator(&self) -> &Configurator {
        &self.configurator
    }

    /// Route one complete line.  Failures are logged, never returned.
    pub fn process(&mut self, line: &str) {
        match classify(line) {
            LineKind::Report => {
                let report = &line[REPORT_PREFIX.len()..];
                debug!(report, "device report");
            }
            LineKind::Command => {
                let message = line[COMMAND_PREFIX.len()..].trim_end().to_string();
                debug!(command = %message, "device command");
                self.write(Record::Command(Command { message }));
            }
            LineKind::Xml => {
                if let Err(e) = self.configurator.handle_document(line, self.bus.as_ref()) {
                    warn!(error = %e, "capability document rejected");
                }
            }
            LineKind::Generic => {
                if let Err(e) = self.route_generic(line) {
                    warn!(error = %e, "generic line rejected");
                }
            }
            LineKind::Empty => {}
            LineKind::Unrecognized => {
                debug!(line = %line, "unrecognized serial line discarded");
            }
        }
    }

    fn route_generic(&self, line: &str) -> Result<(), BridgeError> {
        let message = parse_generic(line)?;
        match message.topic.as_str() {
            RENDER_MODIFICATION_TOPIC => {
                self.write(Record::RenderModification(RenderModification {
                    mod_type: message.field("type").to_string(),
                    payload: message.field("payload").to_string(),
                }));
            }
            PHYSIOLOGY_MODIFICATION_TOPIC => {
                self.write(Record::PhysiologyModification(PhysiologyModification {
                    mod_type: message.field("type").to_string(),
                    payload: message.field("payload").to_string(),
                }));
            }
            PERFORMANCE_ASSESSMENT_TOPIC => {
                self.write(Record::Assessment(Assessment {
                    comment: message.field("info").to_string(),
                }));
            }
            DIAGNOSTICS_LOG_TOPIC => log_device_diagnostic(&message),
            other => debug!(topic = %other, "unknown topic"),
        }
        Ok(())
    }

    fn write(&self, record: Record) {
        let kind = record.kind();
        if let Err(e) = self.bus.write(record) {
            error!(?kind, error = %e, "bus write failed");
        }
    }
}

/// Severity a device diagnostic is logged at, keyed by its `type` field.
pub fn diagnostic_level(kind: &str) -> Level {
    match kind {
        "info" => Level::INFO,
        "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::DEBUG,
    }
}

fn log_device_diagnostic(message: &GenericMessage) {
    let payload = message.field("payload");
    let level = diagnostic_level(message.field("type"));
    if level == Level::ERROR {
        error!(target: "ammbridge::device", "{payload}");
    } else if level == Level::WARN {
        warn!(target: "ammbridge::device", "{payload}");
    } else if level == Level::INFO {
        info!(target: "ammbridge::device", "{payload}");
    } else {
        debug!(target: "ammbridge::device", "{payload}");
    }
}
