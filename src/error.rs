// src/error.rs
//! Claim-level error taxonomy.
//!
//! Component errors (identity, wallet, proof gate, registry, chain) are
//! returned by their components and flattened here into the single type the
//! orchestrator and the HTTP surface report.

use crate::contracts::credential_registry::{ChainError, RegistryError};
use crate::models::credential::CredentialId;
use crate::models::did::IdentityError;
use crate::services::session::ClaimState;
use crate::wallet::connector::WalletError;
use crate::zkp::proof_gate::ProofError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    /// Bootstrap input was not a DID; no session exists.
    #[error(transparent)]
    MalformedDid(#[from] IdentityError),

    /// The wallet is not connected yet. The session waits in wallet binding.
    #[error("wallet not connected: {0}")]
    WalletNotConnected(WalletError),

    #[error("a valid proof must be generated before creating a credential")]
    ProofMissing,

    #[error("proof is bound to `{signal}`, not to the connected wallet `{wallet}`")]
    ProofSignalMismatch { signal: String, wallet: String },

    #[error("credential registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("credential {0} not found")]
    CredentialNotFound(CredentialId),

    #[error("`{0}` is not a registry credential id")]
    InvalidCredentialId(String),

    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    /// Carries the contract's reason verbatim.
    #[error("issuance rejected: {0}")]
    IssuanceRejected(String),

    #[error("issued credential not visible in the registry after {attempts} reads")]
    CredentialNotReconciled { attempts: u32 },

    #[error("an issuance attempt is already in flight for this session")]
    Busy,

    #[error("session is {0}; start a new session")]
    SessionClosed(ClaimState),

    #[error("session was cancelled")]
    Cancelled,

    #[error("session parties cannot change: {0}")]
    ContextMismatch(String),
}

impl ClaimError {
    /// Whether the same session can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ClaimError::WalletNotConnected(_) | ClaimError::Busy)
    }
}

impl From<ProofError> for ClaimError {
    fn from(err: ProofError) -> Self {
        match err {
            ProofError::ProofMissing => ClaimError::ProofMissing,
            ProofError::ProofSignalMismatch { signal, wallet } => ClaimError::ProofSignalMismatch { signal, wallet },
        }
    }
}

impl From<RegistryError> for ClaimError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unavailable(reason) => ClaimError::RegistryUnavailable(reason),
            RegistryError::NotFound(id) => ClaimError::CredentialNotFound(id),
            RegistryError::InvalidCredentialId(raw) => ClaimError::InvalidCredentialId(raw),
        }
    }
}

impl From<ChainError> for ClaimError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::IssuanceRejected(reason) => ClaimError::IssuanceRejected(reason),
            ChainError::ChainUnavailable(reason) => ClaimError::ChainUnavailable(reason),
        }
    }
}
