//! Bus → serial direction.
//!
//! [`OutboundFilter::handle`] is registered as the bus handler for every
//! record kind the device can receive.  It checks the current routing
//! snapshot, renders the record with [`render`], and pushes the line onto the
//! transmit queue.  It never touches the serial channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ammbridge_types::Record;
use tracing::{debug, error, info, warn};

use crate::protocol::{
    LOAD_SCENARIO_MARKER, PHYSIOLOGY_MODIFICATION_TOPIC, RENDER_MODIFICATION_TOPIC, high_frequency_name,
    render_alias, render_command, render_modification, render_node_data, strip_system_marker,
};
use crate::routing::{RoutingState, RoutingTable};
use crate::transmit::TransmitSender;

/// Render `record` as a serial line if `table` allows it through.
pub fn render(record: &Record, table: &RoutingTable) -> Option<String> {
    match record {
        Record::PhysiologyWaveform(sample) => {
            let topic = high_frequency_name(&sample.name);
            table
                .is_subscribed(&topic)
                .then(|| render_sample(table, &topic, &sample.name, sample.value))
        }
        Record::PhysiologyValue(sample) => table
            .is_subscribed(&sample.name)
            .then(|| render_sample(table, &sample.name, &sample.name, sample.value)),
        Record::PhysiologyModification(m) => {
            (table.is_subscribed(&m.mod_type) || table.is_subscribed(PHYSIOLOGY_MODIFICATION_TOPIC))
                .then(|| render_modification(PHYSIOLOGY_MODIFICATION_TOPIC, &m.mod_type, &m.payload))
        }
        Record::RenderModification(m) => {
            (table.is_subscribed(&m.mod_type) || table.is_subscribed(RENDER_MODIFICATION_TOPIC))
                .then(|| render_modification(RENDER_MODIFICATION_TOPIC, &m.mod_type, &m.payload))
        }
        Record::Command(c) => Some(render_command(strip_system_marker(&c.message))),
        _ => None,
    }
}

fn render_sample(table: &RoutingTable, topic: &str, name: &str, value: f64) -> String {
    match table.alias(topic) {
        Some(alias) => render_alias(alias, value),
        None => render_node_data(name, value),
    }
}

/// Bus-side handler feeding the transmit queue.
#[derive(Clone)]
pub struct OutboundFilter {
    routing: Arc<RoutingState>,
    queue: TransmitSender,
    static_config_dir: Option<PathBuf>,
}

impl OutboundFilter {
    pub fn new(routing: Arc<RoutingState>, queue: TransmitSender) -> Self {
        Self {
            routing,
            queue,
            static_config_dir: None,
        }
    }

    /// Directory holding `<scene>_<module>.txt` files replayed on scenario
    /// load.
    pub fn with_static_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_config_dir = Some(dir.into());
        self
    }

    /// Filter, render and enqueue one bus record.
    pub fn handle(&self, record: Record) {
        if let Record::SimulationControl(control) = &record {
            info!(control = ?control.control, "simulation control received");
            return;
        }

        let table = self.routing.snapshot();
        let Some(line) = render(&record, &table) else {
            return;
        };
        debug!(kind = ?record.kind(), line = %line.trim_end(), "queued for device");
        self.enqueue(line);

        if let Record::Command(c) = &record {
            let command = strip_system_marker(&c.message);
            if let Some(scene) = command.strip_prefix(LOAD_SCENARIO_MARKER) {
                self.replay_static_config(scene.trim(), &table);
            }
        }
    }

    fn replay_static_config(&self, scene: &str, table: &RoutingTable) {
        let (Some(dir), Some(module)) = (&self.static_config_dir, table.module_name.as_deref()) else {
            debug!(scene, "no static configuration source; scenario load forwarded only");
            return;
        };
        let Some(path) = static_config_path(dir, scene, module) else {
            warn!(scene, module, "scene or module name is not a plain file name; replay skipped");
            return;
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                error!(path = %path.display(), error = %e, "static configuration unreadable");
                return;
            }
        };
        if content.trim().is_empty() {
            error!(path = %path.display(), "static configuration empty");
            return;
        }
        let mut sent = 0usize;
        for line in content.lines().filter(|l| !l.is_empty()) {
            self.enqueue(format!("{line}\n"));
            sent += 1;
        }
        info!(path = %path.display(), lines = sent, "static configuration queued");
    }

    fn enqueue(&self, line: String) {
        if !self.queue.enqueue(line) {
            error!("transmit queue closed; line discarded");
        }
    }
}

/// `<dir>/<scene>_<module>.txt`, or `None` when either name could leave
/// `dir`.
pub fn static_config_path(dir: &Path, scene: &str, module: &str) -> Option<PathBuf> {
    (is_plain_name(scene) && is_plain_name(module)).then(|| dir.join(format!("{scene}_{module}.txt")))
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}
