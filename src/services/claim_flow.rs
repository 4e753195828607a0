// src/services/claim_flow.rs
//! Claim flow controller.
//!
//! Top-level policy of a claim: the user either picks one of the credentials
//! the issuer already holds for them (fetch path) or asks for a new one
//! (issue path). Both produce the same [`Handoff`].

use crate::contracts::credential_registry::CredentialRegistry;
use crate::error::ClaimError;
use crate::models::credential::{CredentialId, Handoff, OnchainCredential};
use crate::models::did::{Did, IssuerContext, UserContext};
use crate::services::credential_issuer::{with_deadline, IssuanceOrchestrator};
use crate::services::session::ClaimSession;
use crate::wallet::connector::WalletConnector;
use serde::Serialize;
use std::sync::Arc;

/// Resolves both parties of a claim from their DID strings.
///
/// Runs before any session exists; a malformed DID aborts the bootstrap.
pub fn bootstrap(user_id: &str, issuer_id: &str) -> Result<(IssuerContext, UserContext), ClaimError> {
    let user: Did = user_id.parse()?;
    let issuer: Did = issuer_id.parse()?;
    Ok((IssuerContext::resolve(issuer), UserContext::resolve(user)))
}

/// What a claim request led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// Ready for the offer stage.
    Handoff(Handoff),
    /// Neither a selection nor a proof is present; nothing was done.
    AwaitingChoice,
}

#[derive(Clone)]
pub struct ClaimFlow {
    registry: Arc<dyn CredentialRegistry>,
    orchestrator: IssuanceOrchestrator,
}

impl ClaimFlow {
    pub fn new(registry: Arc<dyn CredentialRegistry>, orchestrator: IssuanceOrchestrator) -> Self {
        Self { registry, orchestrator }
    }

    /// Bootstraps a new session for `user_id` claiming from `issuer_id`.
    pub fn start_session(
        &self,
        user_id: &str,
        issuer_id: &str,
        wallet: Arc<dyn WalletConnector>,
    ) -> Result<ClaimSession, ClaimError> {
        let (issuer, user) = bootstrap(user_id, issuer_id)?;
        let session = ClaimSession::new(issuer, user, wallet);
        log::info!(
            "session {} started: {} claiming from {}",
            session.id(),
            session.user().did,
            session.issuer().did
        );
        Ok(session)
    }

    /// Credentials the issuer already holds for the user, newest first.
    pub async fn existing_credentials(
        &self,
        issuer: &IssuerContext,
        user: &UserContext,
    ) -> Result<Vec<CredentialId>, ClaimError> {
        let mut ids = with_deadline(
            self.orchestrator.policy().registry_timeout,
            async {
                self.registry
                    .list_credential_ids(&issuer.address, &user.identity_id)
                    .await
                    .map_err(ClaimError::from)
            },
            || ClaimError::RegistryUnavailable("registry read timed out".to_string()),
        )
        .await?;
        ids.reverse();
        Ok(ids)
    }

    /// Reads one credential from the issuer's registry.
    pub async fn fetch_credential(
        &self,
        issuer: &IssuerContext,
        user: &UserContext,
        credential_id: &CredentialId,
    ) -> Result<OnchainCredential, ClaimError> {
        with_deadline(
            self.orchestrator.policy().registry_timeout,
            async {
                self.registry
                    .get_credential(&issuer.address, &user.identity_id, credential_id)
                    .await
                    .map_err(ClaimError::from)
            },
            || ClaimError::RegistryUnavailable("registry read timed out".to_string()),
        )
        .await
    }

    /// Runs the path the user chose.
    ///
    /// - a selected credential goes straight to the handoff; nothing is
    ///   written on-chain
    /// - otherwise an attached proof starts an issuance
    /// - with neither, nothing happens
    ///
    /// A cancelled or finished session yields no handoff on either path.
    pub async fn claim(&self, session: &ClaimSession) -> Result<ClaimOutcome, ClaimError> {
        session.ensure_open()?;
        if let Some(selected) = session.selected() {
            log::info!("session {}: fetching existing credential {}", session.id(), selected);
            return Ok(ClaimOutcome::Handoff(session.handoff_for(selected)));
        }
        if !session.has_proof() {
            return Ok(ClaimOutcome::AwaitingChoice);
        }
        self.orchestrator.issue(session).await.map(ClaimOutcome::Handoff)
    }
}
