//! Manager configuration, read from a TOML file (`manager.toml` by default).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::wire::InstanceCount;
use crate::error::ConfigError;
use crate::io::registry::OpenOrder;

/// Manager configuration (TOML).
///
/// Missing fields default to a single instance with a time limit of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ManagerConfig {
    /// Number of submission instances to request (1..=42).
    pub instances: usize,

    /// Per-instance time limit sent during negotiation.
    pub time_limit: u32,

    /// Instance index order used when opening pipes.
    pub open_order: OpenOrder,

    /// Emit a debug event for every protocol step. Requires `log_file`:
    /// stderr carries the verdict.
    pub trace: bool,

    /// Send `-1` to every instance before the verdict is written.
    pub notify_instances_on_shutdown: bool,

    /// Verdict message when problem logic fails unexpectedly.
    pub failure_message: String,

    /// Verdict message when the orchestrator refuses a restart.
    pub abort_message: String,

    /// Write logs here instead of stderr (which carries the verdict text).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    pub echo: EchoConfig,
}

/// Settings of the bundled echo problem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EchoConfig {
    /// Number of rounds; instances are restarted between rounds.
    pub rounds: u32,
    /// Upper bound on the query count read from the input.
    pub max_queries: i64,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            rounds: 1,
            max_queries: 1000,
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            instances: 1,
            time_limit: 1,
            open_order: OpenOrder::Ascending,
            trace: false,
            notify_instances_on_shutdown: false,
            failure_message: "error in manager".to_string(),
            abort_message: String::new(),
            log_file: None,
            echo: EchoConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        InstanceCount::new(self.instances)?;
        if self.time_limit == 0 {
            return Err(ConfigError::Zero("time_limit"));
        }
        if self.echo.rounds == 0 {
            return Err(ConfigError::Zero("echo.rounds"));
        }
        if self.echo.max_queries <= 0 {
            return Err(ConfigError::Zero("echo.max_queries"));
        }
        if self.trace && self.log_file.is_none() {
            return Err(ConfigError::TraceWithoutLogFile);
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ManagerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ManagerConfig> {
    if !path.exists() {
        let cfg = ManagerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ManagerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Render a validated config as TOML with a trailing newline.
pub fn render_config(cfg: &ManagerConfig) -> Result<String> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ManagerConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("manager.toml");
        fs::write(
            &path,
            "instances = 2\ntime_limit = 5\nopen_order = \"descending\"\n\n[echo]\nrounds = 3\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.instances, 2);
        assert_eq!(cfg.time_limit, 5);
        assert_eq!(cfg.open_order, OpenOrder::Descending);
        assert_eq!(cfg.echo.rounds, 3);
        assert_eq!(cfg.echo.max_queries, 1000);
        assert_eq!(cfg.failure_message, "error in manager");
    }

    #[test]
    fn instance_count_out_of_range_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("manager.toml");
        fs::write(&path, "instances = 43\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("outside 1..=42"));
    }

    #[test]
    fn zero_time_limit_rejected() {
        let cfg = ManagerConfig {
            time_limit: 0,
            ..ManagerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Zero("time_limit"))));
    }

    #[test]
    fn trace_needs_a_log_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("manager.toml");
        fs::write(&path, "trace = true\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("log_file"));

        fs::write(&path, "trace = true\nlog_file = \"manager.log\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert!(cfg.trace);
    }

    #[test]
    fn render_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("manager.toml");
        let cfg = ManagerConfig {
            instances: 4,
            trace: true,
            log_file: Some(temp.path().join("manager.log")),
            ..ManagerConfig::default()
        };
        fs::write(&path, render_config(&cfg).expect("render")).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }
}
