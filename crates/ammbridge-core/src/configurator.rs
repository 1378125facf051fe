//! [`Configurator`] – applies capability-descriptor documents sent by the
//! device.
//!
//! Two document shapes are understood, selected by the root element:
//!
//! - `AMMModuleConfiguration` rebuilds the routing table (subscribed and
//!   published topics, aliases, equipment settings) and, the first time, makes
//!   the bridge announce the device on the bus.
//! - `AMMModuleStatus` turns per-capability status attributes into
//!   [`Status`] records.
//!
//! Both shapes are decoded with `quick_xml::de` into the private model below.
//! Every attribute is optional; absent data means "nothing to do".

use std::collections::BTreeMap;
use std::sync::Arc;

use ammbridge_middleware::MessageBus;
use ammbridge_types::{
    BridgeError, InstrumentData, ModuleConfiguration, ModuleIdentity, OperationalDescription,
    Record, Status, StatusValue,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::protocol::{HIGH_FREQUENCY_TOPIC, high_frequency_name};
use crate::routing::{RoutingState, RoutingTable};

// ────────────────────────────────────────────────────────────────────────────
// XML model
// ────────────────────────────────────────────────────────────────────────────

/// The root element name picks the variant.
#[derive(Debug, Deserialize)]
enum Document {
    #[serde(rename = "AMMModuleConfiguration")]
    Configuration(DocumentBody),
    #[serde(rename = "AMMModuleStatus")]
    Status(DocumentBody),
}

#[derive(Debug, Deserialize)]
struct DocumentBody {
    #[serde(default)]
    module: Option<ModuleElement>,
}

#[derive(Debug, Default, Deserialize)]
struct ModuleElement {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@manufacturer", default)]
    manufacturer: Option<String>,
    #[serde(rename = "@model", default)]
    model: Option<String>,
    #[serde(rename = "@serial_number", default)]
    serial_number: Option<String>,
    #[serde(rename = "@module_version", default)]
    module_version: Option<String>,
    #[serde(default)]
    capabilities: Option<CapabilitiesElement>,
}

#[derive(Debug, Default, Deserialize)]
struct CapabilitiesElement {
    #[serde(rename = "capability", default)]
    capabilities: Vec<CapabilityElement>,
}

#[derive(Debug, Default, Deserialize)]
struct CapabilityElement {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@status", default)]
    status: Option<String>,
    #[serde(rename = "@message", default)]
    message: Option<String>,
    #[serde(default)]
    starting_settings: Option<SettingsBlock>,
    #[serde(default)]
    configuration: Option<SettingsBlock>,
    #[serde(default)]
    subscribed_topics: Option<TopicsBlock>,
    #[serde(default)]
    published_topics: Option<TopicsBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsBlock {
    #[serde(rename = "setting", default)]
    settings: Vec<SettingElement>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingElement {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@value", default)]
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TopicsBlock {
    #[serde(rename = "topic", default)]
    topics: Vec<TopicElement>,
}

#[derive(Debug, Default, Deserialize)]
struct TopicElement {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@nodepath", default)]
    nodepath: Option<String>,
    #[serde(rename = "@map_name", default)]
    map_name: Option<String>,
}

impl TopicElement {
    /// Name under which the topic is matched by the outbound filter.
    fn forwarded_name(&self) -> Option<String> {
        let name = self.name.as_deref().filter(|n| !n.is_empty());
        let nodepath = self.nodepath.as_deref().filter(|p| !p.is_empty());
        match (name, nodepath) {
            (Some(HIGH_FREQUENCY_TOPIC), Some(path)) => Some(high_frequency_name(path)),
            (_, Some(path)) => Some(path.to_string()),
            (Some(name), None) => Some(name.to_string()),
            (None, None) => None,
        }
    }
}

/// Map a device status attribute onto the canonical bus value.
pub fn parse_status_value(raw: &str) -> Option<StatusValue> {
    match raw {
        "OPERATIONAL" => Some(StatusValue::Operational),
        "HALTING_ERROR" => Some(StatusValue::Inoperative),
        "IMPENDING_ERROR" => Some(StatusValue::Exigent),
        _ => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Configurator
// ────────────────────────────────────────────────────────────────────────────

/// Applies configuration and status documents.
///
/// Owned by the inbound side of the bridge; the only writer of
/// [`RoutingState`].
pub struct Configurator {
    identity: Arc<ModuleIdentity>,
    routing: Arc<RoutingState>,
    initializing: bool,
}

impl Configurator {
    pub fn new(identity: Arc<ModuleIdentity>, routing: Arc<RoutingState>) -> Self {
        Self {
            identity,
            routing,
            initializing: true,
        }
    }

    /// `true` until the first configuration document has been applied.
    pub fn is_initializing(&self) -> bool {
        self.initializing
    }

    /// Apply one XML document.
    ///
    /// Bus write failures are logged and do not abort the document.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Xml`] when the document does not parse, has an
    /// unknown root element, or lacks a `<module>` element.  Routing state is
    /// left untouched in that case.
    pub fn handle_document(&mut self, xml: &str, bus: &dyn MessageBus) -> Result<(), BridgeError> {
        let document: Document =
            quick_xml::de::from_str(xml).map_err(|e| BridgeError::Xml(e.to_string()))?;
        match document {
            Document::Configuration(body) => {
                let module = body
                    .module
                    .ok_or_else(|| BridgeError::Xml("configuration document has no <module>".into()))?;
                self.apply_configuration(module, xml, bus);
            }
            Document::Status(body) => {
                let module = body
                    .module
                    .ok_or_else(|| BridgeError::Xml("status document has no <module>".into()))?;
                self.apply_status(module, bus);
            }
        }
        Ok(())
    }

    fn apply_configuration(&mut self, module: ModuleElement, raw: &str, bus: &dyn MessageBus) {
        let module_name = module.name.clone().unwrap_or_default();

        if self.initializing {
            let description = OperationalDescription {
                module_id: self.identity.module_id(),
                name: module_name.clone(),
                model: module.model.clone().unwrap_or_default(),
                manufacturer: module.manufacturer.clone().unwrap_or_default(),
                serial_number: module.serial_number.clone().unwrap_or_default(),
                module_version: module.module_version.clone().unwrap_or_default(),
                capabilities_schema: String::new(),
                description: String::new(),
            };
            info!(module = %module_name, "announcing device module");
            publish(bus, Record::OperationalDescription(description));
            self.initializing = false;
        }

        publish(
            bus,
            Record::ModuleConfiguration(ModuleConfiguration {
                timestamp: Utc::now().timestamp_millis(),
                module_id: self.identity.module_id(),
                name: module_name.clone(),
                capabilities_configuration: raw.to_string(),
            }),
        );

        let mut table = RoutingTable::clone(&self.routing.snapshot());
        table.module_name = Some(module_name);

        let mut subscriptions_reset = false;
        let mut publications_reset = false;

        let capabilities = module.capabilities.map(|c| c.capabilities).unwrap_or_default();
        for capability in capabilities {
            let name = capability.name.clone().filter(|n| !n.is_empty());
            let has_settings = capability.starting_settings.is_some() || capability.configuration.is_some();

            if let (Some(name), true) = (&name, has_settings) {
                let settings = merge_settings(&capability);
                let payload = settings
                    .iter()
                    .map(|(key, value)| format!("{key}={value}\n"))
                    .collect::<String>();
                debug!(capability = %name, count = settings.len(), "equipment settings replaced");
                table.settings.insert(name.clone(), settings);
                publish(
                    bus,
                    Record::InstrumentData(InstrumentData {
                        instrument: name.clone(),
                        payload,
                    }),
                );
            } else if has_settings {
                warn!("settings on a capability without a name ignored");
            }
            let name = name.as_deref().unwrap_or("-");

            if let Some(block) = &capability.subscribed_topics {
                if !subscriptions_reset {
                    table.subscribed.clear();
                    table.aliases.clear();
                    subscriptions_reset = true;
                }
                for topic in &block.topics {
                    let Some(forwarded) = topic.forwarded_name() else {
                        continue;
                    };
                    if let Some(alias) = topic.map_name.as_deref().filter(|a| !a.is_empty()) {
                        table.aliases.insert(forwarded.clone(), alias.to_string());
                    }
                    debug!(capability = %name, topic = %forwarded, "subscribed");
                    table.subscribed.insert(forwarded);
                }
            }

            if let Some(block) = &capability.published_topics {
                if !publications_reset {
                    table.published.clear();
                    publications_reset = true;
                }
                for topic in &block.topics {
                    if let Some(forwarded) = topic.forwarded_name() {
                        debug!(capability = %name, topic = %forwarded, "publishes");
                        table.published.insert(forwarded);
                    }
                }
            }
        }

        info!(
            subscribed = ?table.subscribed_sorted(),
            published = table.published.len(),
            "routing table updated"
        );
        self.routing.replace(table);
    }

    fn apply_status(&self, module: ModuleElement, bus: &dyn MessageBus) {
        let module_name = module.name.unwrap_or_default();
        let capabilities = module.capabilities.map(|c| c.capabilities).unwrap_or_default();
        for capability in capabilities {
            let capability_name = capability.name.unwrap_or_default();
            let raw = capability.status.unwrap_or_default();
            let Some(value) = parse_status_value(&raw) else {
                warn!(capability = %capability_name, status = %raw, "invalid capability status");
                continue;
            };
            info!(module = %module_name, capability = %capability_name, status = %value, "capability status");
            publish(
                bus,
                Record::Status(Status {
                    module_id: self.identity.module_id(),
                    module_name: module_name.clone(),
                    capability: capability_name,
                    value,
                    message: capability.message,
                }),
            );
        }
    }
}

/// Starting settings overlaid with configured settings.
fn merge_settings(capability: &CapabilityElement) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    let blocks = [&capability.starting_settings, &capability.configuration];
    for block in blocks.into_iter().flatten() {
        for setting in &block.settings {
            let Some(name) = setting.name.as_deref().filter(|n| !n.is_empty()) else {
                continue;
            };
            merged.insert(name.to_string(), setting.value.clone().unwrap_or_default());
        }
    }
    merged
}

fn publish(bus: &dyn MessageBus, record: Record) {
    let kind = record.kind();
    if let Err(e) = bus.write(record) {
        error!(?kind, error = %e, "bus write failed");
    }
}
