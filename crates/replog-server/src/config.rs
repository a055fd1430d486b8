//! Server configuration
//!
//! Sources, lowest priority first: defaults, an optional TOML file
//! (`--config`), `REPLOG_*` environment variables, command-line flags.

use clap::Parser;
use replog_core::replication::{
    DEFAULT_RPC_PORT, HeartbeatMode, MonitorConfig, NodeRole, ReplicationConfig,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`Config`]
    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },

    /// Environment variable with an unusable value
    #[error("Invalid value {value:?} for {key}")]
    Env {
        /// Variable name
        key: String,
        /// Offending value
        value: String,
    },

    /// Settings that do not form a runnable node
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Replog server CLI arguments
#[derive(Parser, Debug, Default)]
#[command(name = "replog-server")]
#[command(about = "Replicated log server (master or secondary)", long_about = None)]
pub struct Args {
    /// Launch as master
    #[arg(short = 'm', long, conflicts_with = "secondary")]
    pub master: bool,

    /// Launch as secondary
    #[arg(short = 's', long)]
    pub secondary: bool,

    /// Hostname to bind to
    #[arg(long)]
    pub hostname: Option<String>,

    /// Port to bind to for HTTP
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Port to bind to for RPC (required for a secondary)
    #[arg(long, alias = "grpc-port")]
    pub rpc_port: Option<u16>,

    /// Secondary address in host:port format (repeatable)
    #[arg(short = 'S', long = "add-secondary", value_name = "HOST:PORT")]
    pub secondaries: Vec<String>,

    /// Milliseconds between heartbeat rounds
    #[arg(long)]
    pub heartbeat_interval_ms: Option<u64>,

    /// Require secondaries to report SERVING before their id is fetched
    #[arg(long)]
    pub health_check: bool,

    /// Largest accepted write concern (default: secondaries + 1)
    #[arg(long)]
    pub max_write_concern: Option<u32>,

    /// Delay before a secondary applies each entry, in milliseconds
    #[arg(long)]
    pub apply_delay_ms: Option<u64>,

    /// Write logs to this file instead of stdout
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node role
    pub role: NodeRole,
    /// Hostname to bind to
    pub hostname: String,
    /// HTTP port
    pub http_port: u16,
    /// RPC port, required for a secondary
    pub rpc_port: Option<u16>,
    /// Secondary RPC addresses (master only)
    pub secondaries: Vec<String>,
    /// Largest accepted write concern, master included
    pub max_write_concern: Option<u32>,
    /// Delay before a secondary applies each entry, in milliseconds
    pub apply_delay_ms: u64,
    /// Log file, stdout when unset
    pub log_file: Option<PathBuf>,
    /// Verbose logging
    pub verbose: bool,
    /// Quorum append settings
    pub replication: ReplicationConfig,
    /// Heartbeat and catch-up settings
    pub monitor: MonitorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: NodeRole::Master,
            hostname: "127.0.0.1".to_string(),
            http_port: 8080,
            rpc_port: None,
            secondaries: Vec::new(),
            max_write_concern: None,
            apply_delay_ms: 0,
            log_file: None,
            verbose: false,
            replication: ReplicationConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Config {
    /// Build the configuration from every source and validate it
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Override fields from `REPLOG_*` variables looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(role) = lookup("REPLOG_ROLE") {
            self.role = match role.to_lowercase().as_str() {
                "master" => NodeRole::Master,
                "secondary" | "slave" => NodeRole::Secondary,
                _ => return Err(env_error("REPLOG_ROLE", role)),
            };
        }
        if let Some(hostname) = lookup("REPLOG_HOSTNAME") {
            self.hostname = hostname;
        }
        if let Some(port) = lookup("REPLOG_HTTP_PORT") {
            self.http_port = parse_env("REPLOG_HTTP_PORT", port)?;
        }
        if let Some(port) = lookup("REPLOG_RPC_PORT") {
            self.rpc_port = Some(parse_env("REPLOG_RPC_PORT", port)?);
        }
        if let Some(list) = lookup("REPLOG_SECONDARIES") {
            self.secondaries = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(ms) = lookup("REPLOG_HEARTBEAT_MS") {
            self.monitor.interval = Duration::from_millis(parse_env("REPLOG_HEARTBEAT_MS", ms)?);
        }
        if let Some(flag) = lookup("REPLOG_HEALTH_CHECK") {
            self.monitor.heartbeat = if parse_env::<bool>("REPLOG_HEALTH_CHECK", flag)? {
                HeartbeatMode::health_check()
            } else {
                HeartbeatMode::LastContiguousId
            };
        }
        if let Some(max) = lookup("REPLOG_MAX_WRITE_CONCERN") {
            self.max_write_concern = Some(parse_env("REPLOG_MAX_WRITE_CONCERN", max)?);
        }
        if let Some(ms) = lookup("REPLOG_APPLY_DELAY_MS") {
            self.apply_delay_ms = parse_env("REPLOG_APPLY_DELAY_MS", ms)?;
        }
        if let Some(path) = lookup("REPLOG_LOG_FILE") {
            self.log_file = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Override fields with flags given on the command line
    pub fn apply_args(&mut self, args: &Args) {
        if args.master {
            self.role = NodeRole::Master;
        } else if args.secondary {
            self.role = NodeRole::Secondary;
        }
        if let Some(hostname) = &args.hostname {
            self.hostname = hostname.clone();
        }
        if let Some(port) = args.http_port {
            self.http_port = port;
        }
        if args.rpc_port.is_some() {
            self.rpc_port = args.rpc_port;
        }
        if !args.secondaries.is_empty() {
            self.secondaries = args.secondaries.clone();
        }
        if let Some(ms) = args.heartbeat_interval_ms {
            self.monitor.interval = Duration::from_millis(ms);
        }
        if args.health_check {
            self.monitor.heartbeat = HeartbeatMode::health_check();
        }
        if args.max_write_concern.is_some() {
            self.max_write_concern = args.max_write_concern;
        }
        if let Some(ms) = args.apply_delay_ms {
            self.apply_delay_ms = ms;
        }
        if args.log_file.is_some() {
            self.log_file = args.log_file.clone();
        }
        self.verbose |= args.verbose;
    }

    /// Check that the settings describe a runnable node
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.role {
            NodeRole::Master => {
                if self.secondaries.is_empty() {
                    return Err(ConfigError::Invalid(
                        "At least one secondary must be specified for a master".into(),
                    ));
                }
                if let Some(max) = self.max_write_concern {
                    let limit = self.secondaries.len() as u32 + 1;
                    if max == 0 || max > limit {
                        return Err(ConfigError::Invalid(format!(
                            "max_write_concern must be between 1 and {}",
                            limit
                        )));
                    }
                }
            }
            NodeRole::Secondary => {
                if self.rpc_port.is_none() {
                    return Err(ConfigError::Invalid(
                        "rpc_port must be specified for a secondary".into(),
                    ));
                }
            }
        }

        self.replication.validate().map_err(ConfigError::Invalid)?;
        self.monitor.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// HTTP bind address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.http_port)
    }

    /// RPC bind address
    pub fn rpc_addr(&self) -> String {
        format!(
            "{}:{}",
            self.hostname,
            self.rpc_port.unwrap_or(DEFAULT_RPC_PORT)
        )
    }

    /// Largest accepted write concern, master included
    pub fn effective_max_write_concern(&self) -> u32 {
        self.max_write_concern
            .unwrap_or(self.secondaries.len() as u32 + 1)
    }

    /// Secondary apply delay
    pub fn apply_delay(&self) -> Duration {
        Duration::from_millis(self.apply_delay_ms)
    }
}

fn env_error(key: &str, value: String) -> ConfigError {
    ConfigError::Env {
        key: key.to_string(),
        value,
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| env_error(key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.role, NodeRole::Master);
        assert_eq!(config.http_addr(), "127.0.0.1:8080");
        assert_eq!(config.monitor.interval, Duration::from_secs(5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_master_args() {
        let args = Args::parse_from([
            "replog-server",
            "-m",
            "--hostname",
            "0.0.0.0",
            "--http-port",
            "18080",
            "-S",
            "127.0.0.1:50051",
            "-S",
            "127.0.0.1:50052",
        ]);
        let mut config = Config::default();
        config.apply_args(&args);

        assert!(config.validate().is_ok());
        assert_eq!(config.secondaries.len(), 2);
        assert_eq!(config.http_addr(), "0.0.0.0:18080");
        assert_eq!(config.effective_max_write_concern(), 3);
    }

    #[test]
    fn test_secondary_requires_rpc_port() {
        let args = Args::parse_from(["replog-server", "-s", "--http-port", "28080"]);
        let mut config = Config::default();
        config.apply_args(&args);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let args = Args::parse_from(["replog-server", "-s", "--grpc-port", "50051"]);
        config.apply_args(&args);
        assert!(config.validate().is_ok());
        assert_eq!(config.rpc_addr(), "127.0.0.1:50051");
    }

    #[test]
    fn test_master_and_secondary_conflict() {
        assert!(Args::try_parse_from(["replog-server", "-m", "-s"]).is_err());
    }

    #[test]
    fn test_env_overrides_file_and_args_override_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
role = "secondary"
hostname = "10.0.0.1"
http_port = 9000
rpc_port = 50061

[monitor]
interval = 250
"#
        )
        .unwrap();

        let mut config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.role, NodeRole::Secondary);
        assert_eq!(config.monitor.interval, Duration::from_millis(250));

        config
            .apply_env(env(&[
                ("REPLOG_HTTP_PORT", "9100"),
                ("REPLOG_HOSTNAME", "10.0.0.2"),
            ]))
            .unwrap();
        assert_eq!(config.http_addr(), "10.0.0.2:9100");

        let args = Args::parse_from(["replog-server", "--http-port", "9200"]);
        config.apply_args(&args);
        assert_eq!(config.http_addr(), "10.0.0.2:9200");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_secondaries_and_bad_values() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("REPLOG_SECONDARIES", "a:1, b:2,"),
                ("REPLOG_HEARTBEAT_MS", "100"),
            ]))
            .unwrap();
        assert_eq!(config.secondaries, vec!["a:1", "b:2"]);
        assert_eq!(config.monitor.interval, Duration::from_millis(100));

        let err = config
            .apply_env(env(&[("REPLOG_HTTP_PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
        assert!(
            config
                .apply_env(env(&[("REPLOG_ROLE", "leader")]))
                .is_err()
        );
    }

    #[test]
    fn test_health_check_mode() {
        let mut config = Config::default();
        assert_eq!(config.monitor.heartbeat, HeartbeatMode::LastContiguousId);

        config
            .apply_env(env(&[("REPLOG_HEALTH_CHECK", "true")]))
            .unwrap();
        assert_eq!(
            config.monitor.heartbeat,
            HeartbeatMode::HealthCheck {
                service_name: "replog".into()
            }
        );

        config
            .apply_env(env(&[("REPLOG_HEALTH_CHECK", "false")]))
            .unwrap();
        assert_eq!(config.monitor.heartbeat, HeartbeatMode::LastContiguousId);

        let args = Args::parse_from(["replog-server", "-m", "-S", "a:1", "--health-check"]);
        config.apply_args(&args);
        assert_eq!(config.monitor.heartbeat, HeartbeatMode::health_check());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_write_concern_bounds() {
        let mut config = Config {
            secondaries: vec!["a:1".into()],
            max_write_concern: Some(3),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_write_concern = Some(2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/replog.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
