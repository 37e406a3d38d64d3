/*!
 * Configuration for the DR-Logic service
 *
 * Loaded from a TOML file at startup. Every field has a default, so an empty
 * file (or no file at all) yields a runnable in-memory configuration.
 */

use drlogic_core_policy::{PolicyEngine, SiteBudget};
use drlogic_core_registry::{Bandwidth, EntityKind, SiteId};
use drlogic_recovery::RecoveryPolicy;
use drlogic_sentinel::LoopPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub loops: LoopsConfig,

    #[serde(default)]
    pub protection: ProtectionConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub replication_actions: ReplicationActions,

    #[serde(default)]
    pub recovery: RecoveryPolicy,

    #[serde(default)]
    pub driver: DriverConfig,

    /// Protected sites with their backup site and replication budget
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address of the control API
    #[serde(default = "default_bind")]
    pub bind: String,

    /// redb database file (None = in-memory, state lost on exit)
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Shorthand for log_level = debug
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            state_path: None,
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopsConfig {
    /// Period of the protection control loop
    #[serde(default = "default_drlogic_interval")]
    pub drlogic_interval_secs: u64,

    /// Period of the artifact cleanup loop
    #[serde(default = "default_clean_up_interval")]
    pub clean_up_interval_secs: u64,
}

impl Default for LoopsConfig {
    fn default() -> Self {
        Self {
            drlogic_interval_secs: default_drlogic_interval(),
            clean_up_interval_secs: default_clean_up_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionConfig {
    #[serde(default = "default_max_protection_interval")]
    pub max_protection_interval_secs: u64,

    /// Staleness SLA
    #[serde(default = "default_max_staleness")]
    pub max_staleness_secs: u64,

    /// Artifacts older than retention_factor × max_protection_interval expire
    #[serde(default = "default_retention_factor")]
    pub retention_factor: u32,

    /// Consecutive failures before an entity needs attention
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,

    /// Deadline of a single replicate or recreate call
    #[serde(default = "default_driver_timeout")]
    pub driver_timeout_secs: u64,

    #[serde(default = "default_min_flow_bandwidth")]
    pub min_flow_bandwidth: u64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            max_protection_interval_secs: default_max_protection_interval(),
            max_staleness_secs: default_max_staleness(),
            retention_factor: default_retention_factor(),
            retry_ceiling: default_retry_ceiling(),
            driver_timeout_secs: default_driver_timeout(),
            min_flow_bandwidth: default_min_flow_bandwidth(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Policy engine name: dummy, fairness or criticality
    #[serde(default = "default_engine")]
    pub engine: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
        }
    }
}

/// Replication action applied to newly protected entities of each kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationActions {
    #[serde(default = "default_instance_action")]
    pub instance: String,

    #[serde(default = "default_volume_action")]
    pub volume: String,
}

impl Default for ReplicationActions {
    fn default() -> Self {
        Self {
            instance: default_instance_action(),
            volume: default_volume_action(),
        }
    }
}

impl ReplicationActions {
    pub fn for_kind(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Instance => &self.instance,
            EntityKind::Volume => &self.volume,
        }
    }
}

/// Replication engine backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// In-process engine that keeps artifacts in memory; for demos and tests
    #[default]
    Memory,

    /// Remote engine spoken to over JSON/HTTP
    Http,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub kind: DriverKind,

    /// Base URL of the replication engine (required for http)
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub id: SiteId,

    /// Site that protected entities are recreated at
    pub backup_site: SiteId,

    /// Aggregate replication bandwidth of the site
    pub bandwidth: u64,

    #[serde(default = "default_instance_share")]
    pub instance_share: f64,

    #[serde(default = "default_volume_share")]
    pub volume_share: f64,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_bind() -> String {
    "127.0.0.1:8470".to_string()
}

fn default_drlogic_interval() -> u64 {
    60
}

fn default_clean_up_interval() -> u64 {
    600
}

fn default_max_protection_interval() -> u64 {
    3600
}

fn default_max_staleness() -> u64 {
    3 * 3600
}

fn default_retention_factor() -> u32 {
    3
}

fn default_retry_ceiling() -> u32 {
    5
}

fn default_driver_timeout() -> u64 {
    300
}

fn default_min_flow_bandwidth() -> u64 {
    10
}

fn default_engine() -> String {
    "fairness".to_string()
}

fn default_instance_action() -> String {
    "image_copy".to_string()
}

fn default_volume_action() -> String {
    "volume_backup".to_string()
}

fn default_instance_share() -> f64 {
    0.6
}

fn default_volume_share() -> f64 {
    0.3
}

impl DrConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Configuration written by `drlogic default-config`: the defaults plus
    /// one example site pair
    pub fn example() -> Self {
        Self {
            sites: vec![SiteConfig {
                id: "site-a".to_string(),
                backup_site: "site-b".to_string(),
                bandwidth: 1000,
                instance_share: default_instance_share(),
                volume_share: default_volume_share(),
            }],
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.loop_policy().validate().map_err(ConfigError::Invalid)?;
        self.recovery
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("recovery: {}", e)))?;
        self.engine()?;

        if self.protection.driver_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "driver_timeout_secs must be greater than zero".to_string(),
            ));
        }

        for (kind, action) in [
            ("instance", &self.replication_actions.instance),
            ("volume", &self.replication_actions.volume),
        ] {
            if action.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "replication action for {} must not be empty",
                    kind
                )));
            }
        }

        if self.driver.kind == DriverKind::Http && self.driver.endpoint.is_none() {
            return Err(ConfigError::Invalid(
                "driver.endpoint is required for the http driver".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for site in &self.sites {
            if !seen.insert(site.id.as_str()) {
                return Err(ConfigError::Invalid(format!("site {} is configured twice", site.id)));
            }
            if site.backup_site == site.id {
                return Err(ConfigError::Invalid(format!(
                    "site {} cannot be its own backup site",
                    site.id
                )));
            }
        }
        for budget in self.site_budgets() {
            budget
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }

        Ok(())
    }

    /// Selected policy engine
    pub fn engine(&self) -> Result<PolicyEngine, ConfigError> {
        PolicyEngine::from_name(&self.policy.engine)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn loop_policy(&self) -> LoopPolicy {
        LoopPolicy {
            drlogic_interval_s: self.loops.drlogic_interval_secs,
            clean_up_interval_s: self.loops.clean_up_interval_secs,
            max_protection_interval_s: self.protection.max_protection_interval_secs,
            max_staleness_s: self.protection.max_staleness_secs,
            retention_factor: self.protection.retention_factor,
            retry_ceiling: self.protection.retry_ceiling,
            min_flow_bandwidth: self.protection.min_flow_bandwidth,
        }
    }

    pub fn site_budgets(&self) -> Vec<SiteBudget> {
        self.sites
            .iter()
            .map(|s| {
                SiteBudget::new(
                    s.id.clone(),
                    Bandwidth(s.bandwidth),
                    s.instance_share,
                    s.volume_share,
                )
            })
            .collect()
    }

    /// Backup site of each protected site
    pub fn backup_sites(&self) -> HashMap<SiteId, SiteId> {
        self.sites
            .iter()
            .map(|s| (s.id.clone(), s.backup_site.clone()))
            .collect()
    }

    pub fn driver_timeout(&self) -> Duration {
        Duration::from_secs(self.protection.driver_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = DrConfig::from_toml("").unwrap();
        assert_eq!(config.loops, LoopsConfig::default());
        assert_eq!(config.protection.max_protection_interval_secs, 3600);
        assert_eq!(config.protection.max_staleness_secs, 10800);
        assert_eq!(config.policy.engine, "fairness");
        assert_eq!(config.driver.kind, DriverKind::Memory);
        assert!(config.service.state_path.is_none());
        assert!(config.sites.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config_example() {
        let toml_str = r#"
[service]
bind = "0.0.0.0:9000"
state_path = "/var/lib/drlogic/state.redb"
log_level = "debug"

[loops]
drlogic_interval_secs = 30
clean_up_interval_secs = 300

[protection]
max_protection_interval_secs = 1800
max_staleness_secs = 7200
retention_factor = 4
retry_ceiling = 3

[policy]
engine = "dummy"

[replication_actions]
instance = "block_sync"

[recovery]
step_attempts = 5

[driver]
kind = "http"
endpoint = "http://engine.internal:8080"

[[sites]]
id = "fra1"
backup_site = "ams1"
bandwidth = 2000
instance_share = 0.5
volume_share = 0.4

[[sites]]
id = "ams1"
backup_site = "fra1"
bandwidth = 1000
"#;

        let config = DrConfig::from_toml(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.service.bind, "0.0.0.0:9000");
        assert_eq!(config.service.log_level, LogLevel::Debug);
        assert_eq!(config.engine().unwrap(), PolicyEngine::Fairness);
        assert_eq!(config.replication_actions.for_kind(EntityKind::Instance), "block_sync");
        assert_eq!(config.replication_actions.for_kind(EntityKind::Volume), "volume_backup");
        assert_eq!(config.recovery.step_attempts, 5);
        assert_eq!(config.recovery.retry_delay_ms, 500);

        let policy = config.loop_policy();
        assert_eq!(policy.drlogic_interval_s, 30);
        assert_eq!(policy.retention_factor, 4);

        let budgets = config.site_budgets();
        assert_eq!(budgets[1].instance_share, 0.6);
        assert_eq!(config.backup_sites()["fra1"], "ams1");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = DrConfig::example();
        config.loops.drlogic_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = DrConfig::example();
        config.protection.max_staleness_secs = 60;
        assert!(config.validate().is_err());

        let mut config = DrConfig::example();
        config.policy.engine = "round-robin".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(msg)) if msg.contains("round-robin")
        ));

        let mut config = DrConfig::example();
        config.sites[0].instance_share = 0.8;
        assert!(config.validate().is_err(), "shares summing above 1 must be rejected");

        let mut config = DrConfig::example();
        config.sites[0].volume_share = -0.1;
        assert!(config.validate().is_err());

        let mut config = DrConfig::example();
        config.sites[0].backup_site = "site-a".to_string();
        assert!(config.validate().is_err());

        let mut config = DrConfig::example();
        config.driver.kind = DriverKind::Http;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bounds_intervals_and_retention() {
        let config = DrConfig::from_toml(
            "[protection]\nmax_protection_interval_secs = 10000000000000000\n\
             max_staleness_secs = 10000000000000000\n",
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_protection_interval_s"));

        let mut config = DrConfig::example();
        config.protection.retention_factor = 3_000_000_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(msg)) if msg.contains("retention_factor")
        ));

        let mut config = DrConfig::example();
        config.loops.clean_up_interval_secs = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_round_trips_through_toml() {
        let rendered = DrConfig::example().to_toml().unwrap();
        let parsed = DrConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed.sites, DrConfig::example().sites);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        let err = DrConfig::from_file(Path::new("/nonexistent/drlogic.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
