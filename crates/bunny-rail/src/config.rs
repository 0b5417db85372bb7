//! Settings for the upload proxy and the paced playback loop.
//!
//! Both structs deserialize from JSON with every field optional. Values are
//! layered: defaults, then a JSON file, then `BUNNY_*` environment
//! variables, then command-line flags (applied by the binaries).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RailError, Result};
use crate::ring::DEFAULT_CAPACITY;
use crate::server::DEFAULT_MAX_PAYLOAD;
use crate::trajectory::{Linkage, ParseOptions, DEFAULT_LAST_DURATION_MS};

/// Default address of the inbound upload port.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:10000";

/// Default address of the switch agent.
pub const DEFAULT_CONTROL_PLANE: &str = "127.0.0.1:5555";

/// Upload proxy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the upload server binds to.
    pub listen: String,
    /// Address of the switch agent.
    pub control_plane: String,
    /// Robot path every upload is applied to.
    pub robot_id: i64,
    /// Point-table capacity per robot (the ring modulus).
    pub capacity: u32,
    /// Duration of the last point of each batch, in ms.
    pub last_duration_ms: u64,
    /// Largest accepted payload, in bytes.
    pub max_payload: usize,
    /// Control-plane connect timeout in ms; 0 waits for the OS default.
    pub connect_timeout_ms: u64,
    /// How uploaded rows link to each other.
    pub linkage: Linkage,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            control_plane: DEFAULT_CONTROL_PLANE.to_string(),
            robot_id: 0,
            capacity: DEFAULT_CAPACITY,
            last_duration_ms: DEFAULT_LAST_DURATION_MS,
            max_payload: DEFAULT_MAX_PAYLOAD,
            connect_timeout_ms: 2000,
            linkage: Linkage::Forward,
        }
    }
}

impl ProxyConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| RailError::Config(format!("{}: {e}", path.display())))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup.
    ///
    /// Values that do not parse are logged and skipped.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BUNNY_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("BUNNY_CONTROL_PLANE") {
            self.control_plane = v;
        }
        override_parsed(&lookup, "BUNNY_ROBOT_ID", &mut self.robot_id);
        override_parsed(&lookup, "BUNNY_CAPACITY", &mut self.capacity);
        override_parsed(&lookup, "BUNNY_LAST_DURATION_MS", &mut self.last_duration_ms);
        override_parsed(&lookup, "BUNNY_MAX_PAYLOAD", &mut self.max_payload);
        override_parsed(&lookup, "BUNNY_LINKAGE", &mut self.linkage);
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(RailError::Config("capacity must be > 0".into()));
        }
        if self.max_payload == 0 {
            return Err(RailError::Config("max_payload must be > 0".into()));
        }
        self.wire_robot_id()?;
        Ok(())
    }

    /// Robot id as carried in control records.
    pub fn wire_robot_id(&self) -> Result<i32> {
        i32::try_from(self.robot_id)
            .map_err(|_| RailError::Config(format!("robot_id {} does not fit in i32", self.robot_id)))
    }

    /// How upload payloads are parsed.
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            linkage: self.linkage,
            last_duration_ms: self.last_duration_ms,
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => warn!(key, value = %raw, "ignoring unparsable override"),
        }
    }
}

/// Paced playback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub robot_id: i64,
    /// Ring modulus the shifted ids wrap at.
    pub capacity: u32,
    /// Added to every uploaded and deleted id.
    pub offset: u32,
    /// Robot time covered by the first upload, in ms.
    pub initial_batch_ms: u64,
    /// Wait after the first upload, in ms.
    pub lead_ms: u64,
    /// Robot time covered by each later upload, in ms.
    pub episode_batch_ms: u64,
    /// Wait between episodes, in ms.
    pub tick_ms: u64,
    /// Factor applied to the buffered time before points are released.
    pub slack: f64,
    /// Duration of the last source point, in ms.
    pub last_duration_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            robot_id: 0,
            capacity: DEFAULT_CAPACITY,
            offset: 0,
            initial_batch_ms: 5000,
            lead_ms: 3000,
            episode_batch_ms: 1000,
            tick_ms: 1000,
            slack: 1.1,
            last_duration_ms: DEFAULT_LAST_DURATION_MS,
        }
    }
}

impl PlaybackConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| RailError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(RailError::Config("capacity must be > 0".into()));
        }
        if !(self.slack.is_finite() && self.slack > 0.0) {
            return Err(RailError::Config(format!("slack must be positive, got {}", self.slack)));
        }
        self.wire_robot_id()?;
        Ok(())
    }

    pub fn wire_robot_id(&self) -> Result<i32> {
        i32::try_from(self.robot_id)
            .map_err(|_| RailError::Config(format!("robot_id {} does not fit in i32", self.robot_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen, "127.0.0.1:10000");
        assert_eq!(config.control_plane, "127.0.0.1:5555");
        assert_eq!(config.capacity, 1000);
        assert!(config.validate().is_ok());
        assert!(PlaybackConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ProxyConfig = serde_json::from_str(r#"{"robot_id": 3, "capacity": 64}"#).unwrap();
        assert_eq!(config.robot_id, 3);
        assert_eq!(config.capacity, 64);
        assert_eq!(config.last_duration_ms, 2000);
    }

    #[test]
    fn test_json_file_round_trip() {
        let path = std::env::temp_dir().join(format!("bunny-config-{}.json", std::process::id()));
        let mut config = ProxyConfig::default();
        config.robot_id = 7;
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = ProxyConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BUNNY_LISTEN", "0.0.0.0:9000"),
            ("BUNNY_CAPACITY", "250"),
            ("BUNNY_ROBOT_ID", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = ProxyConfig::default();
        config.apply_env_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.capacity, 250);
        assert_eq!(config.robot_id, 0);
    }

    #[test]
    fn test_linkage_is_configurable() {
        assert_eq!(ProxyConfig::default().parse_options().linkage, Linkage::Forward);

        let config: ProxyConfig = serde_json::from_str(r#"{"linkage": "looping"}"#).unwrap();
        assert_eq!(config.parse_options().linkage, Linkage::Looping);

        let mut config = ProxyConfig::default();
        config.apply_env_from(|key| (key == "BUNNY_LINKAGE").then(|| "looping".to_string()));
        assert_eq!(config.parse_options().linkage, Linkage::Looping);

        config.apply_env_from(|key| (key == "BUNNY_LINKAGE").then(|| "sideways".to_string()));
        assert_eq!(config.linkage, Linkage::Looping);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = ProxyConfig::default();
        config.capacity = 0;
        assert!(matches!(config.validate(), Err(RailError::Config(_))));

        let mut config = ProxyConfig::default();
        config.max_payload = 0;
        assert!(config.validate().is_err());

        let mut config = ProxyConfig::default();
        config.robot_id = i64::from(i32::MAX) + 1;
        assert!(config.validate().is_err());

        let mut playback = PlaybackConfig::default();
        playback.slack = 0.0;
        assert!(playback.validate().is_err());
    }
}
