// src/models/did.rs
//! Decentralized Identifier (DID) parsing and identity derivation.
//!
//! A claim session starts from two DID strings (the subject and the issuer).
//! They are parsed once into [`Did`] values, from which the fixed-size
//! [`IdentityId`] and the [`BlockchainAddress`] of the issuer's registry
//! contract are derived. All derivations are pure and deterministic.
//!
//! # DID Format
//! ```text
//! did:<method>:<network>[:<network>...]:<identity>
//! ```
//! For example `did:iden3:polygon:amoy:x6x5sor7zpxpkZP8J8ZL5uuFm4hXdM76EDvKpu6fj`.

use crate::utils::crypto::{hash_data, to_prefixed_hex};
use ethers_core::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reasons a DID string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("malformed DID `{input}`: {reason}")]
    MalformedDid { input: String, reason: &'static str },
}

impl IdentityError {
    fn malformed(input: &str, reason: &'static str) -> Self {
        IdentityError::MalformedDid {
            input: input.to_string(),
            reason,
        }
    }
}

/// A parsed decentralized identifier.
///
/// Immutable once parsed. Issuers and subjects use the same type; there is
/// no role-specific handling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did {
    method: String,
    /// One or more network segments joined by `:` (e.g. `polygon:amoy`).
    network: String,
    id: String,
}

impl Did {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// The method-specific identity string (last segment).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Derives the fixed-size identity id for this DID.
    ///
    /// Keccak-256 over the canonical string form, so two DIDs share an id iff
    /// they are equal.
    pub fn identity_id(&self) -> IdentityId {
        IdentityId(hash_data(self.to_string().as_bytes()))
    }
}

fn is_method_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '%')
}

impl FromStr for Did {
    type Err = IdentityError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let rest = raw
            .strip_prefix("did:")
            .ok_or_else(|| IdentityError::malformed(raw, "missing `did:` scheme"))?;

        let segments: Vec<&str> = rest.split(':').collect();
        if segments.len() < 3 {
            return Err(IdentityError::malformed(
                raw,
                "expected method, network and identity segments",
            ));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(IdentityError::malformed(raw, "empty segment"));
        }

        let method = segments[0];
        if !method.chars().all(is_method_char) {
            return Err(IdentityError::malformed(raw, "invalid method name"));
        }

        let network = &segments[1..segments.len() - 1];
        let id = segments[segments.len() - 1];
        if !network.iter().chain(std::iter::once(&id)).all(|s| s.chars().all(is_segment_char)) {
            return Err(IdentityError::malformed(raw, "invalid character in identifier"));
        }

        Ok(Did {
            method: method.to_string(),
            network: network.join(":"),
            id: id.to_string(),
        })
    }
}

impl TryFrom<String> for Did {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.to_string()
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "did:{}:{}:{}", self.method, self.network, self.id)
    }
}

/// Fixed-size identity derived from a [`Did`]. Equality is byte equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityId([u8; 32]);

impl IdentityId {
    /// The address bound to this identity: the trailing 20 bytes of the id.
    pub fn address(&self) -> BlockchainAddress {
        BlockchainAddress(Address::from_slice(&self.0[12..]))
    }

    /// Big-endian `uint256` form used as the `userId` argument of the
    /// issuer contract.
    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityId({})", to_prefixed_hex(&self.0))
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_prefixed_hex(&self.0))
    }
}

/// A 20-byte chain address, rendered as `0x` plus 40 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct BlockchainAddress(Address);

impl BlockchainAddress {
    pub fn as_address(&self) -> Address {
        self.0
    }
}

impl From<Address> for BlockchainAddress {
    fn from(address: Address) -> Self {
        BlockchainAddress(address)
    }
}

impl fmt::Display for BlockchainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_prefixed_hex(self.0.as_bytes()))
    }
}

impl From<BlockchainAddress> for String {
    fn from(address: BlockchainAddress) -> Self {
        address.to_string()
    }
}

impl TryFrom<String> for BlockchainAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::from_str(&value)
            .map(BlockchainAddress)
            .map_err(|e| format!("invalid address `{}`: {}", value, e))
    }
}

/// Issuer side of a claim session, resolved once at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerContext {
    pub did: Did,
    pub identity_id: IdentityId,
    /// Address of the issuer's registry contract.
    pub address: BlockchainAddress,
}

impl IssuerContext {
    pub fn resolve(did: Did) -> Self {
        let identity_id = did.identity_id();
        let address = identity_id.address();
        IssuerContext {
            did,
            identity_id,
            address,
        }
    }
}

/// Subject side of a claim session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub did: Did,
    pub identity_id: IdentityId,
}

impl UserContext {
    pub fn resolve(did: Did) -> Self {
        let identity_id = did.identity_id();
        UserContext { did, identity_id }
    }
}
