//! Service settings.
//!
//! Layered with the `config` crate: an optional TOML file (path from
//! `GOVERNANCE_CONFIG`, default `governance.toml`), then `GOVERNANCE__*`
//! environment variables, then `PORT`.

use config::{Config, ConfigError, Environment, File, FileFormat};
use llm_governance_core::{EnforcementConfig, PolicyRule};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "governance.toml";

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_audit_db_path() -> String {
    "governance-audit.db".to_string()
}

fn default_token_ttl() -> i64 {
    300
}

fn default_evaluation_timeout_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// SQLite audit database; `:memory:` keeps the trail in memory.
    #[serde(default = "default_audit_db_path")]
    pub audit_db_path: String,
    /// Shared secret for operator tokens. Admin and audit routes are refused without it.
    #[serde(default)]
    pub operator_secret: Option<String>,
    #[serde(default = "default_token_ttl")]
    pub operator_token_ttl_seconds: i64,
    #[serde(default = "default_evaluation_timeout_ms")]
    pub evaluation_timeout_ms: u64,
    /// Initial enforcement configuration.
    #[serde(default)]
    pub enforcement: EnforcementConfig,
    /// Declarative rule policies.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            audit_db_path: default_audit_db_path(),
            operator_secret: None,
            operator_token_ttl_seconds: default_token_ttl(),
            evaluation_timeout_ms: default_evaluation_timeout_ms(),
            enforcement: EnforcementConfig::default(),
            rules: Vec::new(),
        }
    }
}

impl ServiceSettings {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("GOVERNANCE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut settings = Self::from_sources(
            Config::builder()
                .add_source(File::with_name(&path).format(FileFormat::Toml).required(false))
                .add_source(Environment::with_prefix("GOVERNANCE").separator("__")),
        )?;

        // Respect PORT for container platforms.
        if let Ok(port) = std::env::var("PORT") {
            settings.bind_address = format!("0.0.0.0:{}", port);
        }
        Ok(settings)
    }

    /// Parse a TOML document.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        Self::from_sources(Config::builder().add_source(File::from_str(document, FileFormat::Toml)))
    }

    fn from_sources(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let settings: Self = builder.build()?.try_deserialize()?;
        if let Some(secret) = &settings.operator_secret {
            if secret.trim().is_empty() {
                return Err(ConfigError::Message("operator_secret must not be empty".to_string()));
            }
        }
        Ok(settings)
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_governance_core::{EnforcementMode, PolicyAction};

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = ServiceSettings::from_toml("").unwrap();
        assert_eq!(settings.bind_address, "0.0.0.0:8080");
        assert_eq!(settings.operator_token_ttl_seconds, 300);
        assert_eq!(settings.evaluation_timeout(), Duration::from_millis(50));
        assert_eq!(settings.enforcement, EnforcementConfig::default());
        assert!(settings.rules.is_empty());
    }

    #[test]
    fn test_full_document() {
        let settings = ServiceSettings::from_toml(
            r#"
            bind_address = "127.0.0.1:9000"
            audit_db_path = ":memory:"
            operator_secret = "s3cret"

            [enforcement]
            mode = "enforce"
            enabled = true
            consent_accepted = true

            [enforcement.policies.bedtime]
            action = "block"

            [[enforcement.allowlist.devices]]
            ip = "192.168.1.10"
            name = "dad-laptop"

            [[rules]]
            name = "bedtime"
            action = "block"
            hours = { start = 21, end = 7 }
            "#,
        )
        .unwrap();

        assert_eq!(settings.bind_address, "127.0.0.1:9000");
        assert_eq!(settings.operator_secret.as_deref(), Some("s3cret"));
        assert_eq!(settings.enforcement.mode, EnforcementMode::Enforce);
        assert_eq!(settings.enforcement.policy_action("bedtime"), PolicyAction::Block);
        assert_eq!(settings.enforcement.allowlist.devices.len(), 1);
        assert_eq!(settings.rules[0].name, "bedtime");
        assert!(settings.rules[0].compile().is_ok());
    }

    #[test]
    fn test_blank_secret_rejected() {
        assert!(ServiceSettings::from_toml("operator_secret = \"  \"").is_err());
    }
}
