//! Configuration management for ClassPulse.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ClassPulseError, Result};
use crate::provider::ProviderConfig;

/// Top-level ClassPulse configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassPulseConfig {
    /// LLM provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Session settings.
    #[serde(default)]
    pub session: SessionSettings,

    /// Escalation settings.
    #[serde(default)]
    pub escalation: EscalationSettings,

    /// API server settings.
    #[serde(default)]
    pub server: ServerSettings,
}

/// Session-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Time-to-live for stored sessions, in days.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u64,
}

fn default_ttl_days() -> u64 {
    7
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
        }
    }
}

/// Escalation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationSettings {
    /// Dissatisfaction signals before a support ticket is filed.
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Directory where ticket transcripts are written.
    #[serde(default = "default_ticket_dir")]
    pub ticket_dir: String,
}

fn default_threshold() -> u32 {
    3
}

fn default_ticket_dir() -> String {
    "support_tickets".to_string()
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            ticket_dir: default_ticket_dir(),
        }
    }
}

/// API server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Requests allowed per caller per minute.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: usize,
    /// API key required on every request. Unset means open access.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_rate_limit() -> usize {
    60
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rate_limit_per_minute: default_rate_limit(),
            api_key: None,
        }
    }
}

impl ClassPulseConfig {
    /// Load config from a TOML file. Missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClassPulseError::Config(format!("Failed to read config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| ClassPulseError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ClassPulseError::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("classpulse")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClassPulseConfig::default();
        assert_eq!(config.session.ttl_days, 7);
        assert_eq!(config.escalation.threshold, 3);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.rate_limit_per_minute, 60);
        assert!(config.server.api_key.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ClassPulseConfig =
            toml::from_str("[escalation]\nthreshold = 5\n").unwrap();
        assert_eq!(config.escalation.threshold, 5);
        assert_eq!(config.escalation.ticket_dir, "support_tickets");
        assert_eq!(config.session.ttl_days, 7);
    }
}
