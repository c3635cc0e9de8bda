//! Client configuration types.
//!
//! `ClientConfig` is built in code with the builder methods or loaded from
//! a TOML file. Every key is optional:
//!
//! ```toml
//! host = "broker.local"
//! port = 8883
//! client_id = "sensor-7"
//! protocol_version = 5
//! clean_session = false
//! retry_delay_ms = 5000
//!
//! [tls]
//! enabled = true
//! ca_cert = "/etc/mqlink/ca.pem"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use mqlink_core::properties::ConnectProperties;
use mqlink_core::{ProtocolVersion, Will};
use serde::Deserialize;

use crate::error::{ClientError, Result};

/// Default broker port (plain TCP).
pub const DEFAULT_PORT: u16 = 1883;

/// Default keep-alive in seconds.
pub const DEFAULT_KEEP_ALIVE: u16 = 60;

/// Default number of messages the in-flight queue holds.
pub const DEFAULT_INFLIGHT_QUEUE_CAPACITY: usize = 100;

/// Default wait for an acknowledgment before resending.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 10_000;

/// Default number of sends per message before giving up.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Default wait for CONNACK.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client identifier. Empty asks the broker to assign one.
    pub client_id: String,
    /// Username for authentication.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<String>,
    /// Protocol level: 3 = 3.1, 4 = 3.1.1, 5 = 5.0.
    pub protocol_version: u8,
    /// Clean session flag (clean start on 5.0).
    pub clean_session: bool,
    /// Keep-alive interval in seconds (0 = disabled).
    pub keep_alive: u16,
    /// Maximum number of queued and in-flight messages.
    pub inflight_queue_capacity: usize,
    /// Wait for an acknowledgment before resending, in milliseconds.
    pub retry_delay_ms: u64,
    /// Sends per message before it is reported as failed.
    pub max_retry_attempts: u32,
    /// Wait for CONNACK, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Cap on outbound packet size. A 5.0 broker may lower it in CONNACK.
    pub maximum_packet_size: Option<u32>,
    /// TLS configuration.
    pub tls: TlsConfig,
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Connect over TLS.
    pub enabled: bool,
    /// PEM file with the CA certificates to trust. Falls back to the
    /// bundled web PKI roots.
    pub ca_cert: Option<PathBuf>,
    /// PEM client certificate chain for mutual TLS.
    pub client_cert: Option<PathBuf>,
    /// PEM private key matching `client_cert`.
    pub client_key: Option<PathBuf>,
    /// Name to verify the server certificate against (defaults to `host`).
    pub server_name: Option<String>,
    /// Skip certificate verification. Testing only.
    pub accept_invalid_certs: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            client_id: String::new(),
            username: None,
            password: None,
            protocol_version: 4, // MQTT 3.1.1
            clean_session: true,
            keep_alive: DEFAULT_KEEP_ALIVE,
            inflight_queue_capacity: DEFAULT_INFLIGHT_QUEUE_CAPACITY,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            maximum_packet_size: None,
            tls: TlsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a new config for the given broker.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Load a configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| ClientError::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(ClientError::Config("port must be non-zero".into()));
        }

        // Surfaces the protocol version range check
        self.version()?;

        if self.inflight_queue_capacity == 0 {
            return Err(ClientError::Config(
                "inflight_queue_capacity must be at least 1".into(),
            ));
        }

        if self.max_retry_attempts == 0 {
            return Err(ClientError::Config(
                "max_retry_attempts must be at least 1".into(),
            ));
        }

        if self.tls.client_cert.is_some() != self.tls.client_key.is_some() {
            return Err(ClientError::Config(
                "tls.client_cert and tls.client_key must be set together".into(),
            ));
        }

        Ok(())
    }

    /// The configured protocol version.
    pub fn version(&self) -> Result<ProtocolVersion> {
        ProtocolVersion::try_from(self.protocol_version).map_err(|_| {
            ClientError::Config(format!(
                "protocol_version must be 3, 4 or 5, got {}",
                self.protocol_version
            ))
        })
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Set the client ID.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Set username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set keep-alive interval in seconds.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set clean session flag.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Select the protocol version.
    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version.level();
        self
    }

    /// Use MQTT 5.0 protocol.
    pub fn mqtt5(self) -> Self {
        self.protocol_version(ProtocolVersion::V5)
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the retry delay and the number of sends per message.
    pub fn retry(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self.max_retry_attempts = max_attempts;
        self
    }

    /// Set the in-flight queue capacity.
    pub fn inflight_queue_capacity(mut self, capacity: usize) -> Self {
        self.inflight_queue_capacity = capacity;
        self
    }

    /// Cap outbound packet size.
    pub fn maximum_packet_size(mut self, max: u32) -> Self {
        self.maximum_packet_size = Some(max);
        self
    }

    /// Enable TLS with the given settings.
    pub fn tls(mut self, mut tls: TlsConfig) -> Self {
        tls.enabled = true;
        self.tls = tls;
        self
    }
}

/// Per-connect settings. Unset fields fall back to the `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Override client_id.
    pub client_id: Option<String>,
    /// Override username.
    pub username: Option<String>,
    /// Override password.
    pub password: Option<Vec<u8>>,
    /// Last will published by the broker if the connection drops.
    pub will: Option<Will>,
    /// Override clean_session.
    pub clean_session: Option<bool>,
    /// Override keep_alive.
    pub keep_alive: Option<u16>,
    /// MQTT v5 CONNECT properties.
    pub properties: ConnectProperties,
}

impl ConnectOptions {
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = Some(clean);
        self
    }

    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = Some(seconds);
        self
    }

    pub fn properties(mut self, properties: ConnectProperties) -> Self {
        self.properties = properties;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.version().unwrap(), ProtocolVersion::V3_1_1);
        assert_eq!(config.retry_delay(), Duration::from_secs(10));
        assert_eq!(config.connect_timeout_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = ClientConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.protocol_version = 6;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.inflight_queue_capacity = 0;
        assert!(config.validate().is_err());

        let config = ClientConfig::default().retry(Duration::from_secs(1), 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
host = "broker.local"
port = 8883
client_id = "sensor-7"
username = "device"
password = "secret"
protocol_version = 5
clean_session = false
keep_alive = 30
inflight_queue_capacity = 10
retry_delay_ms = 2500
max_retry_attempts = 5
maximum_packet_size = 4096

[tls]
enabled = true
ca_cert = "/etc/mqlink/ca.pem"
server_name = "mqtt.example"
"#;
        let config = ClientConfig::parse(toml).unwrap();
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 8883);
        assert_eq!(config.client_id, "sensor-7");
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.version().unwrap(), ProtocolVersion::V5);
        assert!(!config.clean_session);
        assert_eq!(config.keep_alive, 30);
        assert_eq!(config.inflight_queue_capacity, 10);
        assert_eq!(config.retry_delay(), Duration::from_millis(2500));
        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.maximum_packet_size, Some(4096));
        assert!(config.tls.enabled);
        assert_eq!(config.tls.ca_cert, Some(PathBuf::from("/etc/mqlink/ca.pem")));
        assert!(!config.tls.accept_invalid_certs);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = ClientConfig::parse("port = 1884\n").unwrap();
        assert_eq!(config.port, 1884);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.keep_alive, DEFAULT_KEEP_ALIVE);
        assert_eq!(config.max_retry_attempts, DEFAULT_MAX_RETRY_ATTEMPTS);
        assert!(config.clean_session);
        assert!(!config.tls.enabled);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(matches!(
            ClientConfig::parse("protocol_version = 2\n"),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::parse("port = \"nope\"\n"),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"host = \"10.0.0.5\"\nkeep_alive = 0\n").unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.keep_alive, 0);

        assert!(matches!(
            ClientConfig::load("/nonexistent/mqlink.toml"),
            Err(ClientError::Io(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("127.0.0.1", 1885)
            .client_id("builder")
            .credentials("user", "pass")
            .mqtt5()
            .clean_session(false)
            .retry(Duration::from_millis(200), 2)
            .maximum_packet_size(1024);
        assert_eq!(config.protocol_version, 5);
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.retry_delay_ms, 200);
        assert!(config.validate().is_ok());
    }
}
