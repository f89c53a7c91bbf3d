//! Target configuration structures

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TargetError;

/// Per-target configuration, one TOML file per target.
///
/// ```toml
/// name = "cortex-m3"
/// orchestrator = "lab"
/// output_directory = "/tmp/lab-run"
///
/// [status]
/// board = "nucleo-f103"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Unique name of the target within its orchestrator.
    pub name: String,

    /// Orchestrator name, used as the prefix of log source names.
    #[serde(default = "default_orchestrator")]
    pub orchestrator: String,

    /// Directory for the per-target text log (`<dir>/<name>.log`).
    #[serde(default)]
    pub output_directory: Option<PathBuf>,

    /// Optional JSONL event log path.
    #[serde(default)]
    pub event_log: Option<PathBuf>,

    /// Initial auxiliary status entries.
    #[serde(default)]
    pub status: BTreeMap<String, serde_json::Value>,
}

// Serde default functions
fn default_orchestrator() -> String {
    "orchestrator".to_string()
}

impl TargetConfig {
    /// Config with defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            orchestrator: default_orchestrator(),
            output_directory: None,
            event_log: None,
            status: BTreeMap::new(),
        }
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, TargetError> {
        let content = std::fs::read_to_string(path).map_err(|source| TargetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, TargetError> {
        Ok(toml::from_str(content)?)
    }

    /// Log source name: `<orchestrator>.targets.<name>`.
    pub fn log_source(&self) -> String {
        format!("{}.targets.{}", self.orchestrator, self.name)
    }

    /// Path of the text log, if an output directory is configured.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.output_directory
            .as_ref()
            .map(|dir| dir.join(format!("{}.log", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = TargetConfig::from_toml_str("name = \"qemu0\"").unwrap();
        assert_eq!(config, TargetConfig::new("qemu0"));
        assert_eq!(config.log_source(), "orchestrator.targets.qemu0");
        assert_eq!(config.log_path(), None);
    }

    #[test]
    fn full_config_parses_status_table() {
        let config = TargetConfig::from_toml_str(
            r#"
name = "cortex-m3"
orchestrator = "lab"
output_directory = "/tmp/lab-run"
event_log = "/tmp/lab-run/events.jsonl"

[status]
board = "nucleo-f103"
cores = 1
"#,
        )
        .unwrap();

        assert_eq!(config.orchestrator, "lab");
        assert_eq!(
            config.log_path(),
            Some(PathBuf::from("/tmp/lab-run/cortex-m3.log"))
        );
        assert_eq!(config.status.get("board"), Some(&json!("nucleo-f103")));
        assert_eq!(config.status.get("cores"), Some(&json!(1)));
    }

    #[test]
    fn missing_name_is_a_parse_error() {
        let err = TargetConfig::from_toml_str("orchestrator = \"lab\"").unwrap_err();
        assert!(matches!(err, TargetError::ConfigParse(_)));
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("target.toml");
        std::fs::write(&path, "name = \"avr\"\norchestrator = \"bench\"\n").unwrap();

        let config = TargetConfig::load(&path).unwrap();
        assert_eq!(config.log_source(), "bench.targets.avr");

        let err = TargetConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, TargetError::Io { .. }));
    }
}
