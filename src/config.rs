use crate::error::{PulseError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_interval")]
    pub interval: String,
    /// How long a vanished container is remembered before eviction
    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold: String,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default)]
    pub sdk_check: SdkCheckConfig,
}

fn default_interval() -> String {
    "30s".to_string()
}

fn default_eviction_threshold() -> String {
    "60s".to_string()
}

fn default_max_concurrent_fetches() -> usize {
    4
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            eviction_threshold: default_eviction_threshold(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            sdk_check: SdkCheckConfig::default(),
        }
    }
}

/// Command run inside the collector's own container to find an active SDK
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sdk_command")]
    pub command: Vec<String>,
    #[serde(default = "default_sdk_marker")]
    pub marker: String,
}

fn default_sdk_command() -> Vec<String> {
    vec![
        "cat".to_string(),
        "/usr/appinsights/docker/sdk.info".to_string(),
    ]
}

fn default_sdk_marker() -> String {
    "InstrumentationKey=".to_string()
}

impl Default for SdkCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_sdk_command(),
            marker: default_sdk_marker(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub socket: Option<String>,
    #[serde(default = "default_docker_timeout")]
    pub timeout: String,
}

fn default_docker_timeout() -> String {
    "120s".to_string()
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            timeout: default_docker_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Explicit container id; wins over every other source
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default = "default_id_file")]
    pub id_file: Option<String>,
    #[serde(default = "default_cgroup_path")]
    pub cgroup_path: String,
    #[serde(default = "default_mountinfo_path")]
    pub mountinfo_path: String,
}

fn default_id_file() -> Option<String> {
    Some("/usr/appinsights/docker/docker.info".to_string())
}

fn default_cgroup_path() -> String {
    "/proc/self/cgroup".to_string()
}

fn default_mountinfo_path() -> String {
    "/proc/self/mountinfo".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            container_id: None,
            id_file: default_id_file(),
            cgroup_path: default_cgroup_path(),
            mountinfo_path: default_mountinfo_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkType {
    #[default]
    Stdout,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(rename = "type", default)]
    pub sink_type: SinkType,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub instrumentation_key: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_sink_timeout")]
    pub timeout: String,
}

fn default_endpoint() -> String {
    "https://dc.services.visualstudio.com/v2/track".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval() -> String {
    "5s".to_string()
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_sink_timeout() -> String {
    "10s".to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            sink_type: SinkType::default(),
            endpoint: default_endpoint(),
            instrumentation_key: String::new(),
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
            queue_capacity: default_queue_capacity(),
            timeout: default_sink_timeout(),
        }
    }
}

/// Load config from file with environment variable substitution
pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PulseError::Config(format!("Failed to read config file: {}", e)))?;

    parse(&content)
}

/// Parse and validate config text
pub fn parse(content: &str) -> Result<Config> {
    let content = substitute_env_vars(content)?;

    let config: Config = serde_yaml::from_str(&content)?;

    validate(&config)?;

    Ok(config)
}

/// Substitute ${VAR} patterns with environment variables
fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| PulseError::Config(format!("Invalid substitution pattern: {}", e)))?;
    let mut result = content.to_string();
    let mut missing_vars = Vec::new();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let placeholder = &cap[0];

        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(placeholder, &value);
            }
            Err(_) => {
                missing_vars.push(var_name.to_string());
            }
        }
    }

    if !missing_vars.is_empty() {
        // Unset variables become empty; validation rejects the ones that matter
        for var in &missing_vars {
            let placeholder = format!("${{{}}}", var);
            result = result.replace(&placeholder, "");
        }
        tracing::warn!(
            missing = ?missing_vars,
            "Some environment variables are not set"
        );
    }

    Ok(result)
}

/// Parse duration string (e.g., "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s)
        .map_err(|e| PulseError::Config(format!("Invalid duration '{}': {}", s, e)))
}

fn non_zero_duration(field: &str, value: &str) -> Result<Duration> {
    let duration = parse_duration(value)?;
    if duration.is_zero() {
        return Err(PulseError::Config(format!("{} must be greater than zero", field)));
    }
    Ok(duration)
}

impl CollectorConfig {
    pub fn interval(&self) -> Result<Duration> {
        non_zero_duration("collector.interval", &self.interval)
    }

    pub fn eviction_threshold(&self) -> Result<Duration> {
        non_zero_duration("collector.eviction_threshold", &self.eviction_threshold)
    }
}

impl DockerConfig {
    pub fn timeout(&self) -> Result<Duration> {
        non_zero_duration("docker.timeout", &self.timeout)
    }
}

impl SinkConfig {
    pub fn flush_interval(&self) -> Result<Duration> {
        non_zero_duration("sink.flush_interval", &self.flush_interval)
    }

    pub fn timeout(&self) -> Result<Duration> {
        non_zero_duration("sink.timeout", &self.timeout)
    }
}

/// Validate configuration
fn validate(config: &Config) -> Result<()> {
    let collector = &config.collector;
    collector.interval()?;
    collector.eviction_threshold()?;

    if collector.max_concurrent_fetches == 0 {
        return Err(PulseError::Config(
            "collector.max_concurrent_fetches must be at least 1".to_string(),
        ));
    }

    if collector.sdk_check.enabled {
        if collector.sdk_check.command.is_empty() {
            return Err(PulseError::Config(
                "collector.sdk_check.command must not be empty when the check is enabled"
                    .to_string(),
            ));
        }
        if collector.sdk_check.marker.is_empty() {
            return Err(PulseError::Config(
                "collector.sdk_check.marker must not be empty when the check is enabled"
                    .to_string(),
            ));
        }
    }

    config.docker.timeout()?;

    if config.sink.sink_type == SinkType::Http {
        let sink = &config.sink;
        if sink.instrumentation_key.trim().is_empty() {
            return Err(PulseError::Config(
                "sink.instrumentation_key must be set for the http sink".to_string(),
            ));
        }
        sink.endpoint
            .parse::<reqwest::Url>()
            .map_err(|_| PulseError::Config(format!("Invalid sink endpoint: {}", sink.endpoint)))?;
        if sink.batch_size == 0 || sink.queue_capacity == 0 {
            return Err(PulseError::Config(
                "sink.batch_size and sink.queue_capacity must be at least 1".to_string(),
            ));
        }
        sink.flush_interval()?;
        sink.timeout()?;
    }

    Ok(())
}
