//! Configuration system for the RIFT CLI.

use rift_core::{
    ClassifierConfig, ClockConfig, Delta, DeltaType, DeltaConfig, NatDescriptor, NatType,
    PunchConfig, RiftConfig,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// RIFT configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Node identity
    #[serde(default)]
    pub node: NodeConfig,
    /// Route and NAT description
    #[serde(default)]
    pub network: NetworkConfig,
    /// Clock synchronization
    #[serde(default)]
    pub clock: ClockSection,
    /// NAT probing
    #[serde(default)]
    pub probe: ProbeSection,
    /// Hole punching
    #[serde(default)]
    pub punch: PunchSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node id on the signaling network
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Interface index advertised in our address
    #[serde(default)]
    pub if_index: u8,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface address punches bind on
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
    /// External address, defaults to the bind address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ip: Option<String>,
    /// Advertised listen port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// NAT type in front of the interface
    #[serde(default = "default_nat_type")]
    pub nat_type: String,
    /// Delta type of the NAT
    #[serde(default = "default_delta_type")]
    pub delta_type: String,
    /// Delta constant
    #[serde(default)]
    pub delta_value: i32,
}

/// Clock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockSection {
    /// SNTP servers as host:port
    #[serde(default = "default_ntp_servers")]
    pub ntp_servers: Vec<String>,
    /// Queries per estimate
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Samples that must survive trimming
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Largest accepted standard deviation (ms)
    #[serde(default = "default_max_sdev_ms")]
    pub max_sdev_ms: f64,
    /// Timeout per query (ms)
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Estimates attempted before giving up
    #[serde(default = "default_clock_retries")]
    pub retries: usize,
}

/// Probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSection {
    /// Classification servers probed concurrently
    #[serde(default = "default_max_servers")]
    pub max_servers: usize,
    /// Time budget per classification phase (ms)
    #[serde(default = "default_phase_timeout_ms")]
    pub phase_timeout_ms: u64,
    /// Mapping probes per delta round
    #[serde(default = "default_test_count")]
    pub delta_tests: usize,
    /// Observations needed to accept a delta
    #[serde(default = "default_threshold")]
    pub delta_threshold: usize,
    /// Timeout per mapping probe (ms)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

/// Punch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunchSection {
    /// Mappings predicted per punch
    #[serde(default = "default_predictions")]
    pub predictions: usize,
    /// Burst window (ms)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Gap between connect attempts (ms)
    #[serde(default = "default_spacing_ms")]
    pub spacing_ms: u64,
    /// Timeout per connect attempt (ms)
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Delay before the meeting time (ms)
    #[serde(default = "default_meet_delay_ms")]
    pub meet_delay_ms: u64,
    /// Idle session ceiling (seconds)
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Outer protocol deadline (seconds)
    #[serde(default = "default_protocol_deadline_secs")]
    pub protocol_deadline_secs: u64,
    /// Signaling servers as host:port
    #[serde(default)]
    pub signal_servers: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_node_id() -> String {
    "rift.node".to_string()
}

fn default_bind_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    40000
}

fn default_nat_type() -> String {
    "open".to_string()
}

fn default_delta_type() -> String {
    "na".to_string()
}

fn default_ntp_servers() -> Vec<String> {
    vec![
        "time.cloudflare.com:123".to_string(),
        "time.google.com:123".to_string(),
        "pool.ntp.org:123".to_string(),
    ]
}

fn default_samples() -> usize {
    50
}

fn default_min_samples() -> usize {
    10
}

fn default_max_sdev_ms() -> f64 {
    60.0
}

fn default_query_timeout_ms() -> u64 {
    2000
}

fn default_clock_retries() -> usize {
    3
}

fn default_max_servers() -> usize {
    5
}

fn default_phase_timeout_ms() -> u64 {
    500
}

fn default_test_count() -> usize {
    8
}

fn default_threshold() -> usize {
    5
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_predictions() -> usize {
    2
}

fn default_window_ms() -> u64 {
    6000
}

fn default_spacing_ms() -> u64 {
    5
}

fn default_attempt_timeout_ms() -> u64 {
    2000
}

fn default_meet_delay_ms() -> u64 {
    3000
}

fn default_session_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_protocol_deadline_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            if_index: 0,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            external_ip: None,
            listen_port: default_listen_port(),
            nat_type: default_nat_type(),
            delta_type: default_delta_type(),
            delta_value: 0,
        }
    }
}

impl Default for ClockSection {
    fn default() -> Self {
        Self {
            ntp_servers: default_ntp_servers(),
            samples: default_samples(),
            min_samples: default_min_samples(),
            max_sdev_ms: default_max_sdev_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            retries: default_clock_retries(),
        }
    }
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            max_servers: default_max_servers(),
            phase_timeout_ms: default_phase_timeout_ms(),
            delta_tests: default_test_count(),
            delta_threshold: default_threshold(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for PunchSection {
    fn default() -> Self {
        Self {
            predictions: default_predictions(),
            window_ms: default_window_ms(),
            spacing_ms: default_spacing_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            meet_delay_ms: default_meet_delay_ms(),
            session_ttl_secs: default_session_ttl_secs(),
            protocol_deadline_secs: default_protocol_deadline_secs(),
            signal_servers: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("rift/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse the bind address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn bind_ip(&self) -> anyhow::Result<IpAddr> {
        Ok(self.network.bind_ip.parse()?)
    }

    /// Parse the external address, falling back to the bind address
    ///
    /// # Errors
    ///
    /// Returns an error if either address cannot be parsed.
    pub fn external_ip(&self) -> anyhow::Result<IpAddr> {
        match &self.network.external_ip {
            Some(ip) => Ok(ip.parse()?),
            None => self.bind_ip(),
        }
    }

    /// NAT descriptor of the configured route
    ///
    /// # Errors
    ///
    /// Returns an error for unknown NAT or delta names.
    pub fn nat(&self) -> anyhow::Result<NatDescriptor> {
        let nat_type: NatType = self.network.nat_type.parse()?;
        let delta_type: DeltaType = self.network.delta_type.parse()?;
        Ok(NatDescriptor::new(
            nat_type,
            Delta::new(delta_type, self.network.delta_value),
        ))
    }

    /// Engine configuration derived from the file sections
    #[must_use]
    pub fn to_runtime(&self) -> RiftConfig {
        let ms = Duration::from_millis;
        RiftConfig {
            clock: ClockConfig {
                samples: self.clock.samples,
                min_samples: self.clock.min_samples,
                max_sdev_ms: self.clock.max_sdev_ms,
                query_timeout: ms(self.clock.query_timeout_ms),
                retries: self.clock.retries,
                ..ClockConfig::default()
            },
            classifier: ClassifierConfig {
                max_servers: self.probe.max_servers,
                phase_timeout: ms(self.probe.phase_timeout_ms),
            },
            delta: DeltaConfig {
                test_count: self.probe.delta_tests,
                threshold: self.probe.delta_threshold,
                probe_timeout: ms(self.probe.probe_timeout_ms),
            },
            punch: PunchConfig {
                predictions: self.punch.predictions,
                window: ms(self.punch.window_ms),
                attempt_spacing: ms(self.punch.spacing_ms),
                attempt_timeout: ms(self.punch.attempt_timeout_ms),
                meet_delay: ms(self.punch.meet_delay_ms),
                session_ttl: Duration::from_secs(self.punch.session_ttl_secs),
                protocol_deadline: Duration::from_secs(self.punch.protocol_deadline_secs),
                signal_servers: self.punch.signal_servers.len().max(1),
                ..PunchConfig::default()
            },
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        // Node id follows peer address rules
        let id = &self.node.node_id;
        if id.is_empty()
            || id.len() > 64
            || !id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
        {
            anyhow::bail!("Invalid node id: {}", id);
        }

        let bind = self.bind_ip()?;
        let external = self.external_ip()?;
        if bind.is_ipv4() != external.is_ipv4() {
            anyhow::bail!("Bind and external addresses must share an address family");
        }
        if self.network.listen_port == 0 {
            anyhow::bail!("Listen port must be non-zero");
        }
        self.nat()?;

        if self.clock.ntp_servers.is_empty() {
            anyhow::bail!("At least one NTP server is required");
        }
        for server in &self.clock.ntp_servers {
            self.validate_host_port(server, "NTP server")?;
        }
        if self.clock.min_samples == 0 || self.clock.min_samples > self.clock.samples {
            anyhow::bail!("Clock min_samples must be between 1 and samples");
        }
        if self.clock.max_sdev_ms <= 0.0 {
            anyhow::bail!("Clock max_sdev_ms must be positive");
        }

        if self.probe.delta_tests < 2 || self.probe.delta_threshold > self.probe.delta_tests {
            anyhow::bail!("Delta tests must be at least 2 and cover the threshold");
        }

        if self.punch.predictions == 0 || self.punch.predictions > rift_core::MAX_PREDICTIONS {
            anyhow::bail!(
                "Predictions must be between 1 and {}",
                rift_core::MAX_PREDICTIONS
            );
        }
        if self.punch.window_ms == 0 {
            anyhow::bail!("Punch window must be non-zero");
        }
        if self.punch.signal_servers.len() > usize::from(u8::MAX) {
            anyhow::bail!("Too many signaling servers");
        }
        for server in &self.punch.signal_servers {
            self.validate_host_port(server, "Signaling server")?;
        }

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Validate host:port format
    fn validate_host_port(&self, addr: &str, name: &str) -> anyhow::Result<()> {
        let parts: Vec<&str> = addr.rsplitn(2, ':').collect();
        if parts.len() != 2 {
            anyhow::bail!(
                "{} '{}' missing port (expected format: host:port)",
                name,
                addr
            );
        }

        let port_str = parts[0];
        let host = parts[1];

        let port: u16 = port_str
            .parse()
            .map_err(|_| anyhow::anyhow!("{} '{}' has invalid port: {}", name, addr, port_str))?;

        if port == 0 {
            anyhow::bail!("{} '{}' has invalid port: 0", name, addr);
        }

        if host.is_empty() {
            anyhow::bail!("{} '{}' has empty hostname", name, addr);
        }

        if host.contains("..") || host.contains('/') || host.contains('\\') {
            anyhow::bail!("{} '{}' contains invalid characters", name, addr);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_ip, "127.0.0.1");
        assert_eq!(config.punch.predictions, 2);
        assert_eq!(config.punch.window_ms, 6000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.node.node_id = "bad id".to_string();
        assert!(config.validate().is_err());
        config.node.node_id = "alice".to_string();

        config.network.nat_type = "weird".to_string();
        assert!(config.validate().is_err());
        config.network.nat_type = "full_cone".to_string();

        config.network.external_ip = Some("::1".to_string());
        assert!(config.validate().is_err());
        config.network.external_ip = None;

        config.punch.predictions = 0;
        assert!(config.validate().is_err());
        config.punch.predictions = 4;

        config.clock.ntp_servers = vec!["time.example.com".to_string()];
        assert!(config.validate().is_err());
        config.clock.ntp_servers = default_ntp_servers();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "debug".to_string();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_runtime_conversion() {
        let mut config = Config::default();
        config.punch.window_ms = 1500;
        config.network.nat_type = "restrict_port".to_string();
        config.network.delta_type = "dependent".to_string();
        config.network.delta_value = 4;

        let runtime = config.to_runtime();
        assert_eq!(runtime.punch.window, Duration::from_millis(1500));
        assert_eq!(runtime.punch.session_ttl, Duration::from_secs(300));
        assert_eq!(runtime.clock.samples, 50);

        let nat = config.nat().unwrap();
        assert_eq!(nat.nat_type, NatType::RestrictPort);
        assert_eq!(nat.delta, Delta::new(DeltaType::Dependent, 4));
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [node]
            node_id = "bob"

            [punch]
            window_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.node.node_id, "bob");
        assert_eq!(config.punch.window_ms, 2500);
        assert_eq!(config.punch.predictions, 2);
        assert_eq!(config.network.bind_ip, "127.0.0.1");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.node.node_id = "carol".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.node.node_id, "carol");
        assert_eq!(loaded.clock.ntp_servers, config.clock.ntp_servers);
    }
}
