//! Configuration management for the identity service.
//!
//! Settings are read from a TOML file, then `IOTID_*` environment variables are
//! applied on top. Every field has a default, so an empty file (or no file at
//! all) yields a working in-memory deployment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// Prefix shared by all environment overrides.
pub const ENV_PREFIX: &str = "IOTID_";

pub const DEFAULT_PORT: u16 = 8030;
pub const DEFAULT_MQTT_URL: &str = "mqtt.example.com";
pub const DEFAULT_MQTT_PORT: &str = "8883";
pub const DEFAULT_CERTS_DIR: &str = "certs";

/// Datastore backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Driver {
    /// Process-local store, lost on restart
    #[default]
    Memory,
    /// SQLite database at `datasource`
    Sqlite,
}

/// How organization certificates are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IssuanceMode {
    /// Every organization gets a fresh self-signed root
    #[default]
    SelfSigned,
    /// Organization certificates are signed by the CA found in `certs_dir`
    ExternalRoot,
}

/// Key algorithm for newly generated organization and device keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    /// RSA with a 2048-bit modulus, signed with SHA-256
    #[default]
    Rsa2048,
    /// ECDSA on NIST P-256, signed with SHA-256
    EcdsaP256,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// An authority allowed to sign device assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedKey {
    /// Value expected in the assertion's `authority-id` header
    pub authority_id: String,
    /// Hex-encoded Ed25519 public key (32 bytes)
    pub public_key_hex: String,
}

/// Application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub driver: Driver,
    /// SQLite path; empty means an in-memory SQLite database
    pub datasource: String,
    pub mqtt_url: String,
    pub mqtt_port: String,
    /// Directory holding `ca.crt` and `ca.key` for external-root issuance
    pub certs_dir: PathBuf,
    pub issuance: IssuanceMode,
    pub key_algorithm: KeyAlgorithm,
    pub log_level: String,
    pub log_format: LogFormat,
    pub trusted_keys: Vec<TrustedKey>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            driver: Driver::default(),
            datasource: String::new(),
            mqtt_url: DEFAULT_MQTT_URL.to_string(),
            mqtt_port: DEFAULT_MQTT_PORT.to_string(),
            certs_dir: PathBuf::from(DEFAULT_CERTS_DIR),
            issuance: IssuanceMode::default(),
            key_algorithm: KeyAlgorithm::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            trusted_keys: Vec::new(),
        }
    }
}

impl Settings {
    /// Parse settings from a TOML document.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Read settings from a TOML file.
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load settings from an optional file, apply environment overrides and validate.
    #[cfg(feature = "toml")]
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `IOTID_*` overrides using the supplied variable lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(port) = var("PORT") {
            self.port = port
                .parse()
                .map_err(|_| CoreError::Config(format!("invalid {ENV_PREFIX}PORT: {port}")))?;
        }
        if let Some(driver) = var("DRIVER") {
            self.driver = driver.parse()?;
        }
        if let Some(datasource) = var("DATASOURCE") {
            self.datasource = datasource;
        }
        if let Some(url) = var("MQTT_URL") {
            self.mqtt_url = url;
        }
        if let Some(port) = var("MQTT_PORT") {
            self.mqtt_port = port;
        }
        if let Some(dir) = var("CERTS_DIR") {
            self.certs_dir = PathBuf::from(dir);
        }
        if let Some(mode) = var("ISSUANCE") {
            self.issuance = mode.parse()?;
        }
        if let Some(algorithm) = var("KEY_ALGORITHM") {
            self.key_algorithm = algorithm.parse()?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.log_format = format.parse()?;
        }
        Ok(())
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.port == 0 {
            return Err(CoreError::Config("port must be non-zero".to_string()));
        }
        if self.mqtt_url.trim().is_empty() {
            return Err(CoreError::Config("mqtt_url must not be empty".to_string()));
        }
        if self.mqtt_port.parse::<u16>().is_err() {
            return Err(CoreError::Config(format!(
                "mqtt_port must be a port number, got '{}'",
                self.mqtt_port
            )));
        }
        for key in &self.trusted_keys {
            if key.authority_id.trim().is_empty() {
                return Err(CoreError::Config(
                    "trusted key authority_id must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn unknown_value(field: &str, value: &str, allowed: &[&str]) -> CoreError {
    CoreError::Config(format!(
        "{field} must be one of: {} (got '{value}')",
        allowed.join(", ")
    ))
}

impl FromStr for Driver {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Driver::Memory),
            "sqlite" => Ok(Driver::Sqlite),
            other => Err(unknown_value("driver", other, &["memory", "sqlite"])),
        }
    }
}

impl FromStr for IssuanceMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self-signed" => Ok(IssuanceMode::SelfSigned),
            "external-root" => Ok(IssuanceMode::ExternalRoot),
            other => Err(unknown_value(
                "issuance",
                other,
                &["self-signed", "external-root"],
            )),
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsa2048" => Ok(KeyAlgorithm::Rsa2048),
            "ecdsa-p256" => Ok(KeyAlgorithm::EcdsaP256),
            other => Err(unknown_value(
                "key_algorithm",
                other,
                &["rsa2048", "ecdsa-p256"],
            )),
        }
    }
}

impl FromStr for LogFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(unknown_value("log_format", other, &["pretty", "json"])),
        }
    }
}
