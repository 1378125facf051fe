//! Bridge configuration – reads `~/.ammbridge/config.toml`.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `AMMBRIDGE_*`
//! environment variables, command-line flags (applied in `main`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ammbridge_core::BridgeTiming;
use ammbridge_types::BridgeError;
use serde::{Deserialize, Serialize};

/// Persisted bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial device path.
    pub port: String,
    pub baud_rate: u32,
    /// Upper bound on one serial read.
    pub read_timeout_ms: u64,
    /// Pause after every serial write.
    pub pacing_ms: u64,
    pub read_buffer_max: usize,

    pub module_name: String,
    pub model: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub module_version: String,

    /// Address for the WebSocket bus gateway, e.g. `127.0.0.1:9090`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_addr: Option<String>,
    /// Directory of `<scene>_<module>.txt` files replayed on scenario load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_config_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: "/dev/tty96B0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 500,
            pacing_ms: 100,
            read_buffer_max: ammbridge_serial::DEFAULT_READ_BUFFER_MAX,
            module_name: "AMM_Serial_Bridge".to_string(),
            model: "Serial Bridge".to_string(),
            manufacturer: "Vcom3D".to_string(),
            serial_number: "1.0.0".to_string(),
            module_version: "1.0.0".to_string(),
            gateway_addr: None,
            static_config_dir: None,
        }
    }
}

impl Config {
    pub fn timing(&self) -> BridgeTiming {
        BridgeTiming {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            pacing: Duration::from_millis(self.pacing_ms),
        }
    }
}

/// Return the path to `~/.ammbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".ammbridge").join("config.toml")
}

/// Load configuration from `explicit` or, when `None`, the default path.
///
/// A missing default file yields the defaults.  A missing explicit file is an
/// error.  Environment overrides are applied in both cases.
pub fn load(explicit: Option<&Path>) -> Result<Config, BridgeError> {
    let mut cfg = match explicit {
        Some(path) => load_from(path)?
            .ok_or_else(|| BridgeError::Config(format!("config file {} not found", path.display())))?,
        None => load_from(&config_path())?.unwrap_or_default(),
    };
    apply_env_overrides(&mut cfg)?;
    Ok(cfg)
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `AMMBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `AMMBRIDGE_PORT` | `port` |
/// | `AMMBRIDGE_BAUD` | `baud_rate` |
/// | `AMMBRIDGE_PACING_MS` | `pacing_ms` |
/// | `AMMBRIDGE_READ_TIMEOUT_MS` | `read_timeout_ms` |
/// | `AMMBRIDGE_GATEWAY` | `gateway_addr` |
/// | `AMMBRIDGE_STATIC_CONFIG_DIR` | `static_config_dir` |
pub fn apply_env_overrides(cfg: &mut Config) -> Result<(), BridgeError> {
    apply_overrides(cfg, |key| std::env::var(key).ok())
}

fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) -> Result<(), BridgeError> {
    if let Some(v) = var("AMMBRIDGE_PORT") {
        cfg.port = v;
    }
    if let Some(v) = var("AMMBRIDGE_BAUD") {
        cfg.baud_rate = parse_number("AMMBRIDGE_BAUD", &v)?;
    }
    if let Some(v) = var("AMMBRIDGE_PACING_MS") {
        cfg.pacing_ms = parse_number("AMMBRIDGE_PACING_MS", &v)?;
    }
    if let Some(v) = var("AMMBRIDGE_READ_TIMEOUT_MS") {
        cfg.read_timeout_ms = parse_number("AMMBRIDGE_READ_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = var("AMMBRIDGE_GATEWAY") {
        cfg.gateway_addr = Some(v);
    }
    if let Some(v) = var("AMMBRIDGE_STATIC_CONFIG_DIR") {
        cfg.static_config_dir = Some(PathBuf::from(v));
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, BridgeError> {
    raw.trim()
        .parse()
        .map_err(|_| BridgeError::Config(format!("{key}={raw:?} is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_device_expectations() {
        let cfg = Config::default();
        assert_eq!(cfg.port, "/dev/tty96B0");
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.timing().read_timeout, Duration::from_millis(500));
        assert_eq!(cfg.timing().pacing, Duration::from_millis(100));
        assert_eq!(cfg.module_name, "AMM_Serial_Bridge");
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "port = \"/dev/ttyUSB1\"\npacing_ms = 20\n").expect("write");

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.port, "/dev/ttyUSB1");
        assert_eq!(cfg.pacing_ms, 20);
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.gateway_addr, None);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let err = load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "baud_rate = \"fast\"").expect("write");
        assert!(matches!(load_from(&path), Err(BridgeError::Config(_))));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            vars(&[
                ("AMMBRIDGE_PORT", "/dev/ttyACM0"),
                ("AMMBRIDGE_BAUD", "57600"),
                ("AMMBRIDGE_GATEWAY", "127.0.0.1:9090"),
                ("AMMBRIDGE_STATIC_CONFIG_DIR", "/srv/static"),
            ]),
        )
        .expect("valid overrides");
        assert_eq!(cfg.port, "/dev/ttyACM0");
        assert_eq!(cfg.baud_rate, 57_600);
        assert_eq!(cfg.gateway_addr.as_deref(), Some("127.0.0.1:9090"));
        assert_eq!(cfg.static_config_dir, Some(PathBuf::from("/srv/static")));
    }

    #[test]
    fn invalid_numeric_override_is_rejected() {
        let mut cfg = Config::default();
        let err = apply_overrides(&mut cfg, vars(&[("AMMBRIDGE_PACING_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("AMMBRIDGE_PACING_MS"));
        assert_eq!(cfg.pacing_ms, 100);
    }

    #[test]
    fn config_path_points_to_ammbridge_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".ammbridge"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }
}
