//! Serial wire grammar: line framing, prefix tags, `key=value` tokens and the
//! outbound line renderers.
//!
//! Every line on the wire is `\n`-terminated text.  Inbound lines are
//! classified by prefix (see [`crate::inbound`]); outbound lines always start
//! with a bracketed tag.

use std::collections::BTreeMap;

use ammbridge_types::BridgeError;

pub const REPORT_PREFIX: &str = "[REPORT]";
pub const COMMAND_PREFIX: &str = "[AMM_Command]";
pub const XML_PREFIX: &str = "<?xml";
pub const GENERIC_TOPIC_PREFIX: &str = "[";

/// Marks a bus command as addressed to every module.
pub const SYSTEM_MARKER: &str = "[SYS]";
/// Follows [`SYSTEM_MARKER`] on scenario load commands.
pub const LOAD_SCENARIO_MARKER: &str = "LOAD_SCENARIO:";

pub const NODE_DATA_TAG: &str = "AMM_Node_Data";
pub const HIGH_FREQUENCY_TOPIC: &str = "AMM_HighFrequencyNode_Data";
pub const HIGH_FREQUENCY_PREFIX: &str = "HF_";

pub const RENDER_MODIFICATION_TOPIC: &str = "AMM_Render_Modification";
pub const PHYSIOLOGY_MODIFICATION_TOPIC: &str = "AMM_Physiology_Modification";
pub const PERFORMANCE_ASSESSMENT_TOPIC: &str = "AMM_Performance_Assessment";
pub const DIAGNOSTICS_LOG_TOPIC: &str = "AMM_Diagnostics_Log_Record";

pub const LINE_DELIMITER: u8 = b'\n';

// ────────────────────────────────────────────────────────────────────────────
// Framing
// ────────────────────────────────────────────────────────────────────────────

/// Remove every complete line from `buffer` and return them in order.
///
/// The `\n` and at most one trailing `\r` are stripped.  Bytes after the last
/// `\n` are a partial line and stay in `buffer` for the next read.
pub fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let Some(last) = buffer.iter().rposition(|b| *b == LINE_DELIMITER) else {
        return Vec::new();
    };
    let complete: Vec<u8> = buffer.drain(..=last).collect();
    complete[..complete.len() - 1]
        .split(|b| *b == LINE_DELIMITER)
        .map(|raw| {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            String::from_utf8_lossy(raw).into_owned()
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Generic bracketed-topic lines
// ────────────────────────────────────────────────────────────────────────────

/// A parsed `[Topic]key=value;key=value` line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenericMessage {
    pub topic: String,
    pub fields: BTreeMap<String, String>,
}

impl GenericMessage {
    /// Value of `key`, or `""` when the key was not present.
    pub fn field(&self, key: &str) -> &str {
        self.fields.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Parse a bracketed-topic line.
///
/// The topic is the text between the first `[` and the first `]`.  The rest
/// is split on `;` (empty tokens are skipped) and each token on its first `=`;
/// a token without `=` maps to an empty value.  A repeated key keeps its last
/// value.
///
/// # Errors
///
/// Returns [`BridgeError::Protocol`] when the line has no `[ … ]` pair.
pub fn parse_generic(line: &str) -> Result<GenericMessage, BridgeError> {
    let open = line
        .find('[')
        .ok_or_else(|| BridgeError::Protocol(format!("missing '[' in {line:?}")))?;
    let close = line
        .find(']')
        .filter(|close| *close > open)
        .ok_or_else(|| BridgeError::Protocol(format!("missing ']' in {line:?}")))?;

    let topic = line[open + 1..close].to_string();
    let fields = line[close + 1..]
        .split(';')
        .filter(|token| !token.is_empty())
        .map(|token| match token.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (token.to_string(), String::new()),
        })
        .collect();

    Ok(GenericMessage { topic, fields })
}

// ────────────────────────────────────────────────────────────────────────────
// Outbound renderers
// ────────────────────────────────────────────────────────────────────────────

/// Name under which a waveform is subscribed and aliased.
pub fn high_frequency_name(name: &str) -> String {
    format!("{HIGH_FREQUENCY_PREFIX}{name}")
}

/// `[AMM_Node_Data]name=value\n`
pub fn render_node_data(name: &str, value: f64) -> String {
    format!("[{NODE_DATA_TAG}]{name}={value}\n")
}

/// `[alias]value\n`
pub fn render_alias(alias: &str, value: f64) -> String {
    format!("[{alias}]{value}\n")
}

/// `[<topic>]type=<type>;payload=<payload>\n`
pub fn render_modification(topic: &str, mod_type: &str, payload: &str) -> String {
    format!("[{topic}]type={mod_type};payload={payload}\n")
}

/// `[AMM_Command]<value>\n`
pub fn render_command(value: &str) -> String {
    format!("{COMMAND_PREFIX}{value}\n")
}

/// Strip the [`SYSTEM_MARKER`] from a bus command, if present.
pub fn strip_system_marker(message: &str) -> &str {
    message.strip_prefix(SYSTEM_MARKER).unwrap_or(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_lines_keeps_partial_tail() {
        let mut buf = b"[REPORT]one\n[AMM_Command]ST".to_vec();
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["[REPORT]one".to_string()]);
        assert_eq!(buf, b"[AMM_Command]ST");

        buf.extend_from_slice(b"ART_SIM\r\n");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["[AMM_Command]START_SIM".to_string()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_lines_without_delimiter_consumes_nothing() {
        let mut buf = b"<?xml version".to_vec();
        assert!(drain_lines(&mut buf).is_empty());
        assert_eq!(buf.len(), 13);
    }

    #[test]
    fn drain_lines_yields_empty_and_cr_lines_as_empty() {
        let mut buf = b"\n\r\nx\n".to_vec();
        assert_eq!(drain_lines(&mut buf), vec!["", "", "x"]);
    }

    #[test]
    fn parse_generic_extracts_topic_and_fields() {
        let msg = parse_generic("[AMM_Render_Modification]type=bleed;payload=severe").unwrap();
        assert_eq!(msg.topic, "AMM_Render_Modification");
        assert_eq!(msg.field("type"), "bleed");
        assert_eq!(msg.field("payload"), "severe");
        assert_eq!(msg.field("location"), "");
    }

    #[test]
    fn parse_generic_splits_on_first_equals_only() {
        let msg = parse_generic("[T]payload=a=b;flag;;info=x").unwrap();
        assert_eq!(msg.field("payload"), "a=b");
        assert_eq!(msg.field("flag"), "");
        assert!(msg.fields.contains_key("flag"));
        assert_eq!(msg.field("info"), "x");
        assert_eq!(msg.fields.len(), 3);
    }

    #[test]
    fn parse_generic_last_duplicate_wins() {
        let msg = parse_generic("[T]type=a;type=b").unwrap();
        assert_eq!(msg.field("type"), "b");
    }

    #[test]
    fn parse_generic_rejects_unterminated_topic() {
        assert!(matches!(
            parse_generic("[AMM_Render_Modification type=x"),
            Err(BridgeError::Protocol(_))
        ));
    }

    #[test]
    fn renderers_produce_wire_lines() {
        assert_eq!(render_node_data("Cardiovascular_HeartRate", 72.0), "[AMM_Node_Data]Cardiovascular_HeartRate=72\n");
        assert_eq!(render_alias("HR", 72.5), "[HR]72.5\n");
        assert_eq!(
            render_modification(PHYSIOLOGY_MODIFICATION_TOPIC, "hemorrhage", "rate=2"),
            "[AMM_Physiology_Modification]type=hemorrhage;payload=rate=2\n"
        );
        assert_eq!(render_command("START_SIM"), "[AMM_Command]START_SIM\n");
    }

    #[test]
    fn system_marker_is_stripped_once() {
        assert_eq!(strip_system_marker("[SYS]START_SIM"), "START_SIM");
        assert_eq!(strip_system_marker("START_SIM"), "START_SIM");
        assert_eq!(high_frequency_name("ECG"), "HF_ECG");
    }
}
