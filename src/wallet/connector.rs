// src/wallet/connector.rs
//! Wallet collaborator used by the issuance flow.
//!
//! Connecting a wallet happens outside this service (a browser extension or a
//! wallet-connect session). The orchestrator only consumes the resulting
//! address through the [`WalletConnector`] capability, which is handed to each
//! claim session instead of living in a process-wide singleton.

use async_trait::async_trait;
use ethers_core::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Failures reported by the wallet collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("user rejected the wallet connection")]
    UserRejected,
    #[error("no wallet provider available")]
    NoProvider,
    #[error("invalid wallet address `{0}`")]
    InvalidAddress(String),
}

/// Address of the claiming wallet.
///
/// Normalized to lowercase with a `0x` prefix so that comparisons against a
/// proof signal are case-insensitive, as hex addresses are. The numeric
/// value is kept alongside: it is what a proof signal binds to, so
/// `0x0abc` and `0xabc` name the same wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress {
    text: String,
    value: U256,
}

impl WalletAddress {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The address as the `uint256` signal a proof commits to.
    pub fn value(&self) -> U256 {
        self.value
    }
}

impl PartialEq for WalletAddress {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for WalletAddress {}

impl Hash for WalletAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl FromStr for WalletAddress {
    type Err = WalletError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_ascii_lowercase();
        let digits = lowered
            .strip_prefix("0x")
            .ok_or_else(|| WalletError::InvalidAddress(raw.to_string()))?;
        if digits.is_empty() || digits.len() > 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WalletError::InvalidAddress(raw.to_string()));
        }
        let value = U256::from_str_radix(digits, 16).map_err(|_| WalletError::InvalidAddress(raw.to_string()))?;
        Ok(WalletAddress { text: lowered, value })
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = WalletError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WalletAddress> for String {
    fn from(address: WalletAddress) -> Self {
        address.text
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Capability that yields the claiming wallet's address.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    async fn connect(&self) -> Result<WalletAddress, WalletError>;
}

/// Connector fed by the HTTP surface: the browser connects its wallet and
/// reports the outcome, which later `connect` calls replay.
#[derive(Debug, Default)]
pub struct SessionWallet {
    outcome: Mutex<Option<Result<WalletAddress, WalletError>>>,
}

impl SessionWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the address the user connected.
    pub fn bind(&self, address: WalletAddress) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(Ok(address));
    }

    /// Records that the user declined the connection prompt.
    pub fn reject(&self) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(Err(WalletError::UserRejected));
    }
}

#[async_trait]
impl WalletConnector for SessionWallet {
    async fn connect(&self) -> Result<WalletAddress, WalletError> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(Err(WalletError::NoProvider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalization() {
        let address: WalletAddress = " 0xABCdef ".parse().unwrap();
        assert_eq!(address.as_str(), "0xabcdef");
        assert_eq!(address.value(), U256::from(0xabcdef));
    }

    #[test]
    fn test_leading_zeros_name_the_same_wallet() {
        let padded: WalletAddress = "0x0abc".parse().unwrap();
        let bare: WalletAddress = "0xabc".parse().unwrap();
        assert_eq!(padded, bare);
        assert_eq!(padded.as_str(), "0x0abc");
        assert_ne!(bare, "0xabd".parse::<WalletAddress>().unwrap());
    }

    #[test]
    fn test_invalid_addresses() {
        for raw in ["", "0x", "abc", "0xzz", "0x11111111111111111111111111111111111111111"] {
            assert!(raw.parse::<WalletAddress>().is_err(), "accepted `{}`", raw);
        }
    }

    #[tokio::test]
    async fn test_session_wallet_outcomes() {
        let wallet = SessionWallet::new();
        assert_eq!(wallet.connect().await, Err(WalletError::NoProvider));

        wallet.reject();
        assert_eq!(wallet.connect().await, Err(WalletError::UserRejected));

        wallet.bind("0xabc".parse().unwrap());
        assert_eq!(wallet.connect().await.unwrap().as_str(), "0xabc");
    }
}
