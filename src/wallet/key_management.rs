// src/wallet/key_management.rs
//! Operator key handling.
//!
//! The service submits issuance transactions from an operator account. Its
//! secp256k1 key is read from configuration as hex and turned into an
//! `ethers` wallet for the signing middleware.

use crate::blockchain::eth_client::ClientError;
use ethers::signers::{LocalWallet, Signer};
use ethers_core::types::Address;
use ethers_core::utils::hex;
use k256::ecdsa::SigningKey;
use std::fmt;

/// secp256k1 key of the account that submits issuance transactions.
///
/// The secret is never printed; `Debug` shows only the derived address.
pub struct OperatorKey {
    signing_key: SigningKey,
}

impl OperatorKey {
    /// Parses a hex-encoded private key, with or without `0x` prefix.
    ///
    /// # Errors
    /// [`ClientError::InvalidKey`] if the input is not hex or not a valid
    /// scalar for the curve.
    pub fn from_hex(private_key: &str) -> Result<Self, ClientError> {
        let trimmed = private_key.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|e| ClientError::InvalidKey(e.to_string()))?;
        let signing_key = SigningKey::from_slice(&bytes).map_err(|e| ClientError::InvalidKey(e.to_string()))?;
        Ok(OperatorKey { signing_key })
    }

    pub fn address(&self) -> Address {
        LocalWallet::from(self.signing_key.clone()).address()
    }

    pub fn into_wallet(self) -> LocalWallet {
        LocalWallet::from(self.signing_key)
    }
}

impl fmt::Debug for OperatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorKey").field("address", &self.address()).finish()
    }
}
