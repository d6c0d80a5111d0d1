// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery configuration.
//!
//! Supports both programmatic and file-based configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for one [`DiscoveryService`](crate::DiscoveryService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Maximum number of probes in flight per discovery request.
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: usize,

    /// LDAP port for IP literals and host fallback candidates.
    #[serde(default = "default_ldap_port")]
    pub ldap_port: u16,

    /// TCP and TLS connect timeout (milliseconds).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Read/write timeout once connected (milliseconds).
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Overall MS-CLDAP ping timeout (milliseconds).
    #[serde(default = "default_cldap_timeout_ms")]
    pub cldap_timeout_ms: u64,

    /// MS-CLDAP datagram retransmit interval (milliseconds).
    #[serde(default = "default_cldap_retry_ms")]
    pub cldap_retry_ms: u64,

    /// Run the IPA certificate probe.
    #[serde(default = "default_true")]
    pub ipa_enabled: bool,

    /// HTTPS port of the IPA certificate probe.
    #[serde(default = "default_ipa_https_port")]
    pub ipa_https_port: u16,

    /// Cap on the HTTP response read by the IPA probe (bytes).
    #[serde(default = "default_ipa_max_response")]
    pub ipa_max_response: usize,

    /// Resolve `_kerberos._udp` KDC targets after a successful discovery.
    #[serde(default = "default_true")]
    pub kdc_lookup: bool,

    /// Size of the default worker pool.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_max_outstanding() -> usize {
    3
}

fn default_ldap_port() -> u16 {
    389
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_io_timeout_ms() -> u64 {
    30_000
}

fn default_cldap_timeout_ms() -> u64 {
    5_000
}

fn default_cldap_retry_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_ipa_https_port() -> u16 {
    443
}

fn default_ipa_max_response() -> usize {
    100 * 1024
}

fn default_worker_threads() -> usize {
    crate::task::DEFAULT_MAX_THREADS
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_outstanding: default_max_outstanding(),
            ldap_port: default_ldap_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            cldap_timeout_ms: default_cldap_timeout_ms(),
            cldap_retry_ms: default_cldap_retry_ms(),
            ipa_enabled: true,
            ipa_https_port: default_ipa_https_port(),
            ipa_max_response: default_ipa_max_response(),
            kdc_lookup: true,
            worker_threads: default_worker_threads(),
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `REALM_DISCO_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(n) = lookup("REALM_DISCO_MAX_OUTSTANDING").and_then(|s| s.parse().ok()) {
            self.max_outstanding = n;
        }
        if let Some(ms) = lookup("REALM_DISCO_CONNECT_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            self.connect_timeout_ms = ms;
        }
        if let Some(flag) = lookup("REALM_DISCO_IPA") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "0" | "false" | "no" | "off" => self.ipa_enabled = false,
                "1" | "true" | "yes" | "on" => self.ipa_enabled = true,
                _ => {}
            }
        }
        self
    }

    /// Set the fan-out bound.
    pub fn with_max_outstanding(mut self, n: usize) -> Self {
        self.max_outstanding = n;
        self
    }

    /// Set the LDAP port used for IP literals and host fallback.
    pub fn with_ldap_port(mut self, port: u16) -> Self {
        self.ldap_port = port;
        self
    }

    /// Enable or disable the IPA certificate probe.
    pub fn with_ipa(mut self, enabled: bool) -> Self {
        self.ipa_enabled = enabled;
        self
    }

    /// Enable or disable the KDC lookup after success.
    pub fn with_kdc_lookup(mut self, enabled: bool) -> Self {
        self.kdc_lookup = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_outstanding == 0 {
            return Err(ConfigError::Invalid("max_outstanding must be at least 1".into()));
        }
        if self.ldap_port == 0 || self.ipa_https_port == 0 {
            return Err(ConfigError::Invalid("ports must be non-zero".into()));
        }
        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("io_timeout_ms", self.io_timeout_ms),
            ("cldap_timeout_ms", self.cldap_timeout_ms),
            ("cldap_retry_ms", self.cldap_retry_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        if self.cldap_retry_ms > self.cldap_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "cldap_retry_ms ({}) exceeds cldap_timeout_ms ({})",
                self.cldap_retry_ms, self.cldap_timeout_ms
            )));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("worker_threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn cldap_timeout(&self) -> Duration {
        Duration::from_millis(self.cldap_timeout_ms)
    }

    pub fn cldap_retry(&self) -> Duration {
        Duration::from_millis(self.cldap_retry_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.max_outstanding, 3);
        assert_eq!(config.ldap_port, 389);
        assert_eq!(config.ipa_https_port, 443);
        assert_eq!(config.ipa_max_response, 102_400);
        assert_eq!(config.io_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = DiscoveryConfig::from_toml_str(
            r#"
            max_outstanding = 5
            ipa_enabled = false
            "#,
        )
        .expect("parse");
        assert_eq!(config.max_outstanding, 5);
        assert!(!config.ipa_enabled);
        assert_eq!(config.cldap_retry_ms, 1_000);
        assert!(config.kdc_lookup);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "ldap_port = 3389\nconnect_timeout_ms = 250").expect("write");

        let config = DiscoveryConfig::from_file(file.path()).expect("load");
        assert_eq!(config.ldap_port, 3389);
        assert_eq!(config.connect_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file() {
        let err = DiscoveryConfig::from_file("/nonexistent/realm-disco.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_validate_rejects() {
        let bad = [
            DiscoveryConfig::default().with_max_outstanding(0),
            DiscoveryConfig::default().with_ldap_port(0),
            DiscoveryConfig {
                cldap_retry_ms: 6_000,
                ..Default::default()
            },
            DiscoveryConfig {
                io_timeout_ms: 0,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "{config:?} should be rejected"
            );
        }
        assert!(matches!(
            DiscoveryConfig::from_toml_str("max_outstanding = \"three\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REALM_DISCO_MAX_OUTSTANDING", "7"),
            ("REALM_DISCO_CONNECT_TIMEOUT_MS", "not-a-number"),
            ("REALM_DISCO_IPA", "off"),
        ]
        .into_iter()
        .collect();
        let config = DiscoveryConfig::default()
            .with_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.max_outstanding, 7);
        assert_eq!(config.connect_timeout_ms, 5_000);
        assert!(!config.ipa_enabled);
    }
}
