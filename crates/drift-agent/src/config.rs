//! Agent configuration

use anyhow::Result;
use drift_lib::recommendation::DEFAULT_RECOMMENDATION_TTL_HOURS;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration, read from `DRIFT_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Instance name attached to every structured log event
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Port for the trigger API, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory holding one JSON table per resource kind
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Settings document; defaults to `<data_dir>/settings.json`
    #[serde(default)]
    pub settings_path: Option<PathBuf>,

    /// Audit log; defaults to `<data_dir>/audit.jsonl`
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,

    /// Upper bound for a single remediation call
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,

    /// Run a tick plus maintenance on this interval; unset disables the heartbeat
    #[serde(default)]
    pub tick_interval_secs: Option<u64>,

    #[serde(default = "default_recommendation_ttl_hours")]
    pub recommendation_ttl_hours: u64,

    /// Built-in scenarios to leave out of the catalog
    #[serde(default)]
    pub disabled_scenarios: Vec<String>,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "drift-agent".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_action_timeout_ms() -> u64 {
    30_000
}

fn default_recommendation_ttl_hours() -> u64 {
    DEFAULT_RECOMMENDATION_TTL_HOURS
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            api_port: default_api_port(),
            data_dir: default_data_dir(),
            settings_path: None,
            audit_log_path: None,
            action_timeout_ms: default_action_timeout_ms(),
            tick_interval_secs: None,
            recommendation_ttl_hours: default_recommendation_ttl_hours(),
            disabled_scenarios: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_source(Self::environment())
    }

    /// Load configuration from an explicit environment source
    pub fn from_source(source: config::Environment) -> Result<Self> {
        let config = config::Config::builder().add_source(source).build()?;
        Ok(config.try_deserialize()?)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix("DRIFT")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("disabled_scenarios")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.settings_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("settings.json"))
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_log_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("audit.jsonl"))
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn tick_interval(&self) -> Option<Duration> {
        self.tick_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn recommendation_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.recommendation_ttl_hours as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> AgentConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_source(AgentConfig::environment().source(Some(map))).unwrap()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = from_vars(&[]);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.action_timeout(), Duration::from_secs(30));
        assert_eq!(config.tick_interval(), None);
        assert_eq!(config.recommendation_ttl_hours, 168);
        assert_eq!(config.settings_path(), PathBuf::from("./data/settings.json"));
        assert!(config.disabled_scenarios.is_empty());
    }

    #[test]
    fn test_reads_prefixed_variables() {
        let config = from_vars(&[
            ("DRIFT_API_PORT", "9191"),
            ("DRIFT_DATA_DIR", "/var/lib/drift"),
            ("DRIFT_ACTION_TIMEOUT_MS", "1500"),
            ("DRIFT_TICK_INTERVAL_SECS", "600"),
            ("DRIFT_DISABLED_SCENARIOS", "idle_ec2,gp2_ebs"),
        ]);
        assert_eq!(config.api_port, 9191);
        assert_eq!(config.audit_log_path(), PathBuf::from("/var/lib/drift/audit.jsonl"));
        assert_eq!(config.action_timeout(), Duration::from_millis(1500));
        assert_eq!(config.tick_interval(), Some(Duration::from_secs(600)));
        assert_eq!(config.disabled_scenarios, vec!["idle_ec2", "gp2_ebs"]);
    }

    #[test]
    fn test_zero_interval_disables_heartbeat() {
        let config = from_vars(&[("DRIFT_TICK_INTERVAL_SECS", "0")]);
        assert_eq!(config.tick_interval(), None);
    }
}
