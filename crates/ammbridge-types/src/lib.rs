//! `ammbridge-types` – shared vocabulary of the serial bridge.
//!
//! Every record that crosses the message bus, the envelope it travels in, the
//! bridge's own [`ModuleIdentity`], and the [`BridgeError`] type used by all
//! other crates live here so that the middleware, serial and core crates agree
//! on one set of definitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Identity
// ────────────────────────────────────────────────────────────────────────────

/// Identity of this bridge process on the bus.
///
/// Assigned once at startup, before any bus activity, and never reassigned.
/// The fields are private so the identity cannot be mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleIdentity {
    module_id: Uuid,
    name: String,
    model: String,
    manufacturer: String,
    serial_number: String,
    module_version: String,
}

impl ModuleIdentity {
    /// Generate a fresh identity with a random v4 UUID.
    pub fn generate(
        name: impl Into<String>,
        model: impl Into<String>,
        manufacturer: impl Into<String>,
        serial_number: impl Into<String>,
        module_version: impl Into<String>,
    ) -> Self {
        Self {
            module_id: Uuid::new_v4(),
            name: name.into(),
            model: model.into(),
            manufacturer: manufacturer.into(),
            serial_number: serial_number.into(),
            module_version: module_version.into(),
        }
    }

    pub fn module_id(&self) -> Uuid {
        self.module_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn module_version(&self) -> &str {
        &self.module_version
    }

    /// Bus source tag used for every event this module publishes.
    pub fn source_tag(&self) -> String {
        format!("{}::{}", self.name, self.module_id)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Records
// ────────────────────────────────────────────────────────────────────────────

/// Free-form command string exchanged between simulation modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub message: String,
}

/// Settings snapshot of one device capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentData {
    pub instrument: String,
    /// Newline-joined `name=value` pairs.
    pub payload: String,
}

/// One-time announcement of the module behind the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalDescription {
    pub module_id: Uuid,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub module_version: String,
    #[serde(default)]
    pub capabilities_schema: String,
    #[serde(default)]
    pub description: String,
}

/// Capability configuration announced by a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfiguration {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub module_id: Uuid,
    pub name: String,
    pub capabilities_configuration: String,
}

/// Canonical operational state of one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusValue {
    Operational,
    Inoperative,
    Exigent,
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusValue::Operational => write!(f, "OPERATIONAL"),
            StatusValue::Inoperative => write!(f, "INOPERATIVE"),
            StatusValue::Exigent => write!(f, "EXIGENT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub module_id: Uuid,
    pub module_name: String,
    pub capability: String,
    pub value: StatusValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request to change how the simulation is rendered (e.g. visible bleeding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderModification {
    #[serde(rename = "type")]
    pub mod_type: String,
    pub payload: String,
}

/// Request to change the physiology engine's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysiologyModification {
    #[serde(rename = "type")]
    pub mod_type: String,
    pub payload: String,
}

/// Learner performance assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub comment: String,
}

/// Low-rate scalar sample from the physiology engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysiologyValue {
    pub name: String,
    pub value: f64,
}

/// High-frequency waveform sample from the physiology engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysiologyWaveform {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    Run,
    Halt,
    Reset,
    Save,
}

/// Simulation run-state change broadcast by the simulation manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationControl {
    #[serde(rename = "type")]
    pub control: ControlType,
}

/// Every record the bridge reads from or writes to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record")]
pub enum Record {
    Command(Command),
    InstrumentData(InstrumentData),
    OperationalDescription(OperationalDescription),
    ModuleConfiguration(ModuleConfiguration),
    Status(Status),
    RenderModification(RenderModification),
    PhysiologyModification(PhysiologyModification),
    Assessment(Assessment),
    PhysiologyValue(PhysiologyValue),
    PhysiologyWaveform(PhysiologyWaveform),
    SimulationControl(SimulationControl),
}

impl Record {
    /// The [`RecordKind`] lane this record travels on.
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Command(_) => RecordKind::Command,
            Record::InstrumentData(_) => RecordKind::InstrumentData,
            Record::OperationalDescription(_) => RecordKind::OperationalDescription,
            Record::ModuleConfiguration(_) => RecordKind::ModuleConfiguration,
            Record::Status(_) => RecordKind::Status,
            Record::RenderModification(_) => RecordKind::RenderModification,
            Record::PhysiologyModification(_) => RecordKind::PhysiologyModification,
            Record::Assessment(_) => RecordKind::Assessment,
            Record::PhysiologyValue(_) => RecordKind::PhysiologyValue,
            Record::PhysiologyWaveform(_) => RecordKind::PhysiologyWaveform,
            Record::SimulationControl(_) => RecordKind::SimulationControl,
        }
    }
}

/// Discriminant of [`Record`], used as a routing key on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    Command,
    InstrumentData,
    OperationalDescription,
    ModuleConfiguration,
    Status,
    RenderModification,
    PhysiologyModification,
    Assessment,
    PhysiologyValue,
    PhysiologyWaveform,
    SimulationControl,
}

impl RecordKind {
    pub const ALL: [RecordKind; 11] = [
        RecordKind::Command,
        RecordKind::InstrumentData,
        RecordKind::OperationalDescription,
        RecordKind::ModuleConfiguration,
        RecordKind::Status,
        RecordKind::RenderModification,
        RecordKind::PhysiologyModification,
        RecordKind::Assessment,
        RecordKind::PhysiologyValue,
        RecordKind::PhysiologyWaveform,
        RecordKind::SimulationControl,
    ];
}

// ────────────────────────────────────────────────────────────────────────────
// Envelope
// ────────────────────────────────────────────────────────────────────────────

/// A [`Record`] as it travels over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Publisher tag, e.g. `"AMM_Serial_Bridge::<uuid>"` or `"gateway/10.0.0.4:5123"`.
    pub source: String,
    pub payload: Record,
}

impl Event {
    /// Wrap `payload` in a fresh envelope stamped now.
    pub fn new(source: impl Into<String>, payload: Record) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type shared by every bridge crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Unable to open serial port {port}: {details}")]
    SerialOpen { port: String, details: String },

    #[error("Serial I/O error: {0}")]
    SerialIo(String),

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Malformed serial line: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
