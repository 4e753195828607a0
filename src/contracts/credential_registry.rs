// src/contracts/credential_registry.rs
//! Issuer registry contract interface.
//!
//! Each issuer identity has an on-chain issuer contract whose address is
//! derived from the issuer's DID. The contract keeps, per subject, an
//! append-only list of issued credential ids and mints new credentials when
//! given an admitted Anon Aadhaar proof.
//!
//! Two capabilities are exposed so the claim flow can be exercised against
//! doubles:
//! - [`CredentialRegistry`]: read-only queries
//! - [`IssuanceChain`]: the state-changing issuance call
//!
//! [`OnchainIssuer`] implements both on top of [`ChainClient`]. Neither
//! capability retries; a failure is reported once, as it happened.

use crate::blockchain::eth_client::{ChainClient, ClientError};
use crate::models::credential::{CredentialId, OnchainCredential};
use crate::models::did::{BlockchainAddress, IdentityId};
use crate::zkp::proof_gate::Admitted;
use async_trait::async_trait;
use ethers_core::abi::{parse_abi, Abi};
use ethers_core::types::{H256, U256};
use once_cell::sync::Lazy;
use std::sync::Arc;
use thiserror::Error;

/// Human-readable ABI of the parts of the issuer contract this service uses.
static ISSUER_ABI: Lazy<Abi> = Lazy::new(|| {
    parse_abi(&[
        "function getUserCredentialIds(uint256 userId) view returns (uint256[])",
        "function getCredential(uint256 userId, uint256 credentialId) view returns (uint256, string, string, uint64, uint64)",
        "function issueCredential(uint256 userId, uint256 nullifierSeed, uint256 nullifier, uint256 timestamp, uint256 signal, uint256[4] revealArray, uint256[8] groth16Proof)",
    ])
    .expect("issuer ABI literal should parse")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("credential registry unavailable: {0}")]
    Unavailable(String),
    #[error("credential {0} not found")]
    NotFound(CredentialId),
    #[error("`{0}` is not a registry credential id")]
    InvalidCredentialId(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The contract refused the issuance; carries its reason verbatim.
    #[error("issuance rejected: {0}")]
    IssuanceRejected(String),
    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),
}

/// Acknowledgment of a mined issuance transaction.
///
/// Deliberately carries no credential id: the new id is read back from the
/// registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

/// Read-only view of an issuer's credential registry.
#[async_trait]
pub trait CredentialRegistry: Send + Sync {
    /// Credential ids issued by `issuer` to `subject`, oldest first.
    ///
    /// An empty list means the subject holds no credentials.
    async fn list_credential_ids(
        &self,
        issuer: &BlockchainAddress,
        subject: &IdentityId,
    ) -> Result<Vec<CredentialId>, RegistryError>;

    async fn get_credential(
        &self,
        issuer: &BlockchainAddress,
        subject: &IdentityId,
        credential_id: &CredentialId,
    ) -> Result<OnchainCredential, RegistryError>;
}

/// The state-changing issuance call.
#[async_trait]
pub trait IssuanceChain: Send + Sync {
    /// Mints a credential for `subject`, consuming the proof admission.
    async fn issue_credential(
        &self,
        issuer: &BlockchainAddress,
        subject: &IdentityId,
        admitted: Admitted,
    ) -> Result<IssuanceReceipt, ChainError>;
}

fn parse_credential_id(id: &CredentialId) -> Result<U256, RegistryError> {
    U256::from_dec_str(id.as_str()).map_err(|_| RegistryError::InvalidCredentialId(id.to_string()))
}

fn uint(field: &str, value: &str) -> Result<U256, ChainError> {
    U256::from_dec_str(value.trim())
        .map_err(|_| ChainError::IssuanceRejected(format!("proof field `{}` is not a uint256: `{}`", field, value)))
}

/// Arguments of `issueCredential`, in contract order.
type IssueArgs = (U256, U256, U256, U256, U256, [U256; 4], [U256; 8]);

/// Encodes the admitted proof into call arguments.
///
/// Runs before anything is sent, so a malformed field never reaches the chain.
fn issue_args(subject: &IdentityId, admitted: &Admitted) -> Result<IssueArgs, ChainError> {
    let proof = admitted.proof();
    let signal = admitted.wallet().value();

    let mut reveal = [U256::zero(); 4];
    for (slot, value) in reveal.iter_mut().zip(proof.revealed.as_reveal_array()) {
        *slot = uint("revealed", value)?;
    }
    let mut groth16 = [U256::zero(); 8];
    for (slot, value) in groth16.iter_mut().zip(proof.groth16.iter()) {
        *slot = uint("groth16", value)?;
    }

    Ok((
        subject.to_u256(),
        uint("nullifierSeed", &proof.nullifier_seed)?,
        uint("nullifier", &proof.nullifier)?,
        uint("timestamp", &proof.timestamp)?,
        signal,
        reveal,
        groth16,
    ))
}

/// Issuer contract accessed over JSON-RPC.
#[derive(Clone)]
pub struct OnchainIssuer {
    client: Arc<ChainClient>,
}

impl OnchainIssuer {
    pub fn new(client: Arc<ChainClient>) -> Self {
        OnchainIssuer { client }
    }
}

#[async_trait]
impl CredentialRegistry for OnchainIssuer {
    async fn list_credential_ids(
        &self,
        issuer: &BlockchainAddress,
        subject: &IdentityId,
    ) -> Result<Vec<CredentialId>, RegistryError> {
        let ids: Vec<U256> = self
            .client
            .query_contract(issuer.as_address(), &ISSUER_ABI, "getUserCredentialIds", subject.to_u256())
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        log::debug!("registry {} lists {} credentials for {}", issuer, ids.len(), subject);
        Ok(ids.into_iter().map(|id| CredentialId::new(id.to_string())).collect())
    }

    async fn get_credential(
        &self,
        issuer: &BlockchainAddress,
        subject: &IdentityId,
        credential_id: &CredentialId,
    ) -> Result<OnchainCredential, RegistryError> {
        let raw_id = parse_credential_id(credential_id)?;
        let (id, context, credential_type, issuance_date, expiration_date): (U256, String, String, u64, u64) = self
            .client
            .query_contract(
                issuer.as_address(),
                &ISSUER_ABI,
                "getCredential",
                (subject.to_u256(), raw_id),
            )
            .await
            .map_err(|e| match e {
                ClientError::Reverted(_) => RegistryError::NotFound(credential_id.clone()),
                other => RegistryError::Unavailable(other.to_string()),
            })?;

        Ok(OnchainCredential {
            id: CredentialId::new(id.to_string()),
            context,
            credential_type,
            issuance_date,
            expiration_date,
        })
    }
}

#[async_trait]
impl IssuanceChain for OnchainIssuer {
    async fn issue_credential(
        &self,
        issuer: &BlockchainAddress,
        subject: &IdentityId,
        admitted: Admitted,
    ) -> Result<IssuanceReceipt, ChainError> {
        let args = issue_args(subject, &admitted)?;
        let receipt = self
            .client
            .send_transaction(issuer.as_address(), &ISSUER_ABI, "issueCredential", args)
            .await
            .map_err(|e| match e {
                ClientError::Reverted(reason) => ChainError::IssuanceRejected(reason),
                other => ChainError::ChainUnavailable(other.to_string()),
            })?;

        Ok(IssuanceReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }
}
