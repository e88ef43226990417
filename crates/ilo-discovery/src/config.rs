//! Configuration management
//!
//! Settings load from a TOML file (path from `--config` or the
//! `ILO_DISCOVERY_CONFIG` environment variable). Validation runs at boot and
//! an invalid network section is fatal; everything else carries a default.

use crate::client::IloCredentials;
use crate::defaults;
use crate::error::{Error, Result};
use crate::subnet::SubnetRange;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "ILO_DISCOVERY_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,

    pub ilo: IloConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

/// Process-wide switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SystemConfig {
    /// Mask the iLO password at rest.
    #[serde(default = "default_true")]
    pub obfuscate_secrets: bool,

    /// Optional allowlist for the admin surface (not used by the core).
    #[serde(default)]
    pub allowed_ip: Option<String>,
}

/// iLO endpoint access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct IloConfig {
    /// Default account for the authenticated handshake.
    pub username: String,
    pub password: String,

    /// Probe connect deadline in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub client_timeout_connect_ms: u64,

    /// Probe read deadline in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub client_timeout_read_ms: u64,

    pub network: NetworkConfig,
}

/// The subnet to discover.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct NetworkConfig {
    pub base_ip: String,
    pub subnet_mask: String,
}

/// Client liveness tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClientConfig {
    /// Maximum tolerated milliseconds since the last successful update
    /// before a host is reported unresponsive.
    #[serde(default = "default_responsiveness_threshold_ms")]
    pub responsiveness_threshold_ms: u64,
}

/// Queue producer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct QueueConfig {
    /// Gzip-frame outgoing payloads. Consumers accept both forms either way.
    #[serde(default)]
    pub gzip_frame: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            obfuscate_secrets: true,
            allowed_ip: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            responsiveness_threshold_ms: default_responsiveness_threshold_ms(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { gzip_frame: false }
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    defaults::CONNECT_TIMEOUT_MS
}

fn default_read_timeout_ms() -> u64 {
    defaults::READ_TIMEOUT_MS
}

fn default_responsiveness_threshold_ms() -> u64 {
    defaults::RESPONSIVENESS_THRESHOLD_MS
}

impl Config {
    /// Load and validate configuration from a file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("cannot read '{path}': {e}")))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Boot-time validation. An unusable network section is fatal.
    pub fn validate(&self) -> Result<()> {
        // Surfaces InvalidNetworkConfig for a bad base or mask.
        self.subnet_range()?;

        if self.ilo.username.trim().is_empty() {
            return Err(Error::Config("ilo.username must not be empty".into()));
        }
        if self.ilo.client_timeout_connect_ms == 0 || self.ilo.client_timeout_read_ms == 0 {
            return Err(Error::Config("ilo client timeouts must be positive".into()));
        }
        if self.client.responsiveness_threshold_ms == 0 {
            return Err(Error::Config(
                "client.responsiveness-threshold-ms must be positive".into(),
            ));
        }

        Ok(())
    }

    pub fn subnet_range(&self) -> Result<SubnetRange> {
        SubnetRange::new(&self.ilo.network.base_ip, &self.ilo.network.subnet_mask)
    }

    pub fn credentials(&self) -> IloCredentials {
        IloCredentials::new(
            &self.ilo.username,
            &self.ilo.password,
            self.system.obfuscate_secrets,
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ilo.client_timeout_connect_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.ilo.client_timeout_read_ms)
    }

    pub fn responsiveness_threshold(&self) -> Duration {
        Duration::from_millis(self.client.responsiveness_threshold_ms)
    }

    /// Annotated example configuration.
    pub fn example_toml() -> String {
        r#"[system]
obfuscate-secrets = true
# allowed-ip = "10.0.0.50"

[ilo]
username = "Administrator"
password = "change-me"
client-timeout-connect-ms = 2000
client-timeout-read-ms = 1000

[ilo.network]
base-ip = "10.1.0.0"
subnet-mask = "255.255.255.0"

[client]
responsiveness-threshold-ms = 300000

[queue]
gzip-frame = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn base_config() -> Config {
        toml::from_str(&Config::example_toml()).unwrap()
    }

    #[test]
    fn test_example_config_parses_and_validates() {
        let config = base_config();
        assert!(config.validate().is_ok());
        assert!(config.system.obfuscate_secrets);
        assert_eq!(config.ilo.username, "Administrator");
        assert_eq!(config.client.responsiveness_threshold_ms, 300_000);
        assert!(!config.queue.gzip_frame);
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let config: Config = toml::from_str(
            r#"[ilo]
username = "admin"
password = "pw"

[ilo.network]
base-ip = "10.0.0.0"
subnet-mask = "255.255.255.252"
"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.ilo.client_timeout_connect_ms, 2000);
        assert_eq!(config.ilo.client_timeout_read_ms, 1000);
        assert_eq!(config.client.responsiveness_threshold_ms, 300_000);
        assert!(config.system.obfuscate_secrets);
    }

    #[test]
    fn test_invalid_network_is_fatal() {
        let mut config = base_config();
        config.ilo.network.subnet_mask = "255.0.255.0".into();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidNetworkConfig(_))
        ));

        config.ilo.network.subnet_mask = "garbage".into();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidNetworkConfig(_))
        ));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = base_config();
        config.ilo.client_timeout_read_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"[ilo]
username = "admin"
password = "pw"
surprise = true

[ilo.network]
base-ip = "10.0.0.0"
subnet-mask = "255.255.255.0"
"#,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(Config::example_toml().as_bytes()).unwrap();

        let config = Config::load(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(config.ilo.network.base_ip, "10.1.0.0");
    }

    #[tokio::test]
    async fn test_load_missing_file_errors() {
        let result = Config::load("/definitely/not/here.toml").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_credentials_respect_obfuscation_flag() {
        let mut config = base_config();
        config.system.obfuscate_secrets = true;
        assert!(config.credentials().is_obfuscated());

        config.system.obfuscate_secrets = false;
        assert!(!config.credentials().is_obfuscated());
    }
}
