// src/settings.rs
//! Runtime settings.
//!
//! Layered with the `config` crate: an optional `claim.toml` in the working
//! directory, then `CLAIM_*` environment variables (a `.env` file is loaded
//! into the environment by `main` first).

use crate::services::credential_issuer::IssuancePolicy;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// JSON-RPC endpoint of the chain hosting the issuer registries.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Operator key that signs issuance transactions. Read-only without it.
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Public base of this service, used in agent credential proposals.
    #[serde(default = "default_verification_url")]
    pub verification_url: String,
    /// Base of the offer-stage URL a handoff is forwarded to.
    #[serde(default = "default_offer_base_url")]
    pub offer_base_url: String,
    #[serde(default = "default_registry_timeout_ms")]
    pub registry_timeout_ms: u64,
    #[serde(default = "default_issuance_timeout_ms")]
    pub issuance_timeout_ms: u64,
    #[serde(default = "default_reconcile_attempts")]
    pub reconcile_attempts: u32,
    #[serde(default = "default_reconcile_backoff_ms")]
    pub reconcile_backoff_ms: u64,
}

fn default_rpc_url() -> String {
    "https://rpc-amoy.polygon.technology".to_string()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_verification_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_offer_base_url() -> String {
    "http://127.0.0.1:3000/offer".to_string()
}

fn default_registry_timeout_ms() -> u64 {
    10_000
}

fn default_issuance_timeout_ms() -> u64 {
    120_000
}

fn default_reconcile_attempts() -> u32 {
    5
}

fn default_reconcile_backoff_ms() -> u64 {
    2_000
}

impl Settings {
    /// Loads `claim.toml` (if present) overlaid with `CLAIM_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("claim").required(false))
            .add_source(Environment::with_prefix("CLAIM").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Parses settings from TOML text alone.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn issuance_policy(&self) -> IssuancePolicy {
        IssuancePolicy {
            registry_timeout: Duration::from_millis(self.registry_timeout_ms),
            issuance_timeout: Duration::from_millis(self.issuance_timeout_ms),
            reconcile_attempts: self.reconcile_attempts.max(1),
            reconcile_backoff: Duration::from_millis(self.reconcile_backoff_ms),
        }
    }

    /// The private key with surrounding whitespace removed, if any is set.
    pub fn operator_key(&self) -> Option<&str> {
        self.private_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}
