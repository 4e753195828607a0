// src/zkp/proof_gate.rs
//! # Proof Gate
//!
//! Decides whether an attribute proof may be used for an issuance attempt.
//!
//! The gate checks two things only:
//! - a proof object is present and carries its Groth16 elements and nullifier
//! - the proof's signal is the wallet that is claiming
//!
//! It does not verify the proof mathematically. That belongs to the prover
//! library and to the issuer contract, which re-verifies on-chain. What the
//! gate enforces is the binding: a proof generated for one wallet cannot be
//! replayed to mint a credential for another.

use crate::models::proof::AttributeProof;
use crate::wallet::connector::WalletAddress;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("a valid proof must be generated before creating a credential")]
    ProofMissing,
    #[error("proof is bound to `{signal}`, not to the connected wallet `{wallet}`")]
    ProofSignalMismatch { signal: String, wallet: String },
}

/// Marker that a proof passed the gate for one wallet.
///
/// Neither `Clone` nor `Copy`: the issuance call takes it by value, so an
/// admission is spent on exactly one attempt.
#[derive(Debug)]
pub struct Admitted {
    proof: AttributeProof,
    wallet: WalletAddress,
}

impl Admitted {
    pub fn proof(&self) -> &AttributeProof {
        &self.proof
    }

    pub fn wallet(&self) -> &WalletAddress {
        &self.wallet
    }
}

/// Admits `proof` for an issuance bound to `expected_signal`.
///
/// # Errors
/// - [`ProofError::ProofMissing`] when no proof is supplied or its Groth16
///   elements or nullifier are empty
/// - [`ProofError::ProofSignalMismatch`] when the proof's signal is not the
///   expected wallet address
pub fn admit(
    proof: Option<AttributeProof>,
    expected_signal: &WalletAddress,
) -> Result<Admitted, ProofError> {
    let proof = proof.ok_or(ProofError::ProofMissing)?;

    let incomplete = proof.groth16.iter().any(|e| e.trim().is_empty()) || proof.nullifier.trim().is_empty();
    if incomplete {
        return Err(ProofError::ProofMissing);
    }

    let bound_to_wallet = proof
        .signal
        .parse::<WalletAddress>()
        .map(|signal| signal.value() == expected_signal.value())
        .unwrap_or(false);
    if !bound_to_wallet {
        return Err(ProofError::ProofSignalMismatch {
            signal: proof.signal.clone(),
            wallet: expected_signal.to_string(),
        });
    }

    Ok(Admitted {
        proof,
        wallet: expected_signal.clone(),
    })
}
