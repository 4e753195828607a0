// src/services/credential_issuer.rs
//! Credential Issuance Orchestrator
//!
//! Drives one [`ClaimSession`] through the issuance state machine:
//!
//! ```text
//! Idle -> WalletBinding -> ProofGating -> Issuing -> Reconciling -> Issued
//!               |               |            |            |
//!               +-- (wait)      +------------+------------+--> Failed
//! ```
//!
//! - **WalletBinding** asks the session's wallet connector for an address.
//!   Without one the session stays here and the caller gets
//!   `WalletNotConnected`.
//! - **ProofGating** admits the attached proof for that address and takes a
//!   baseline snapshot of the subject's credential list.
//! - **Issuing** submits the issuance transaction exactly once. It is never
//!   retried here.
//! - **Reconciling** re-reads the registry and takes the newest id. Any id the
//!   chain call might report is ignored.
//!
//! Every network call runs under the configured deadline; a timeout counts as
//! the call's own failure.

use crate::contracts::credential_registry::{CredentialRegistry, IssuanceChain};
use crate::error::ClaimError;
use crate::models::credential::{CredentialId, Handoff};
use crate::services::session::{ClaimSession, ClaimState};
use crate::zkp::proof_gate::admit;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Deadlines and read-retry settings for the issuance flow.
#[derive(Debug, Clone)]
pub struct IssuancePolicy {
    /// Deadline for each registry read.
    pub registry_timeout: Duration,
    /// Deadline for the issuance transaction, including mining.
    pub issuance_timeout: Duration,
    /// Registry reads allowed while waiting for a new credential to appear.
    pub reconcile_attempts: u32,
    /// Pause between those reads.
    pub reconcile_backoff: Duration,
}

impl Default for IssuancePolicy {
    fn default() -> Self {
        Self {
            registry_timeout: Duration::from_secs(10),
            issuance_timeout: Duration::from_secs(120),
            reconcile_attempts: 5,
            reconcile_backoff: Duration::from_secs(2),
        }
    }
}

/// Awaits `fut` for at most `limit`, mapping a timeout through `on_timeout`.
pub(crate) async fn with_deadline<T, F>(
    limit: Duration,
    fut: F,
    on_timeout: impl FnOnce() -> ClaimError,
) -> Result<T, ClaimError>
where
    F: Future<Output = Result<T, ClaimError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

/// Service that issues credentials for claim sessions.
///
/// Holds the shared, read-only chain capabilities. Per-session state lives in
/// the [`ClaimSession`] passed to [`IssuanceOrchestrator::issue`], so
/// independent sessions run in parallel without sharing anything mutable.
#[derive(Clone)]
pub struct IssuanceOrchestrator {
    registry: Arc<dyn CredentialRegistry>,
    chain: Arc<dyn IssuanceChain>,
    policy: IssuancePolicy,
}

impl IssuanceOrchestrator {
    /// Creates a new orchestrator.
    ///
    /// # Arguments
    /// * `registry` - Read access to issuer registries
    /// * `chain` - The issuance transaction capability
    /// * `policy` - Deadlines and reconciliation settings
    pub fn new(
        registry: Arc<dyn CredentialRegistry>,
        chain: Arc<dyn IssuanceChain>,
        policy: IssuancePolicy,
    ) -> Self {
        Self { registry, chain, policy }
    }

    pub fn policy(&self) -> &IssuancePolicy {
        &self.policy
    }

    /// Runs one issuance attempt for `session`.
    ///
    /// # Returns
    /// The handoff payload for the newly issued credential.
    ///
    /// # Errors
    /// - `Busy` if another attempt is running on this session
    /// - `WalletNotConnected` while no wallet is available (session waits)
    /// - `Cancelled` / `SessionClosed` for abandoned or finished sessions
    /// - any other variant after moving the session to `Failed`
    pub async fn issue(&self, session: &ClaimSession) -> Result<Handoff, ClaimError> {
        let _flight = session.begin_flight()?;
        session.advance(ClaimState::WalletBinding)?;

        let wallet = match session.wallet_connector().connect().await {
            Ok(wallet) => wallet,
            Err(reason) => {
                let err = ClaimError::WalletNotConnected(reason);
                log::warn!("session {}: {}", session.id(), err);
                session.note(&err);
                return Err(err);
            }
        };

        session.advance(ClaimState::ProofGating)?;
        let proof = session.bind_wallet(wallet.clone());
        let admitted = admit(proof, &wallet).map_err(|e| session.fail(e.into()))?;

        let baseline = self.list_ids(session).await.map_err(|e| session.fail(e))?;

        // Last point at which cancellation is honoured.
        session.advance(ClaimState::Issuing)?;
        let issuer = session.issuer().address;
        let subject = session.user().identity_id;
        let receipt = with_deadline(
            self.policy.issuance_timeout,
            async {
                self.chain
                    .issue_credential(&issuer, &subject, admitted)
                    .await
                    .map_err(ClaimError::from)
            },
            || ClaimError::ChainUnavailable("issuance transaction timed out".to_string()),
        )
        .await
        .map_err(|e| {
            log::error!("session {}: issuance failed: {}", session.id(), e);
            session.fail(e)
        })?;
        log::info!("session {}: issuance mined in {:?}", session.id(), receipt.tx_hash);

        session.advance(ClaimState::Reconciling)?;
        let claim_id = self
            .reconcile(session, baseline.len())
            .await
            .map_err(|e| session.fail(e))?;

        let handoff = session.handoff_for(claim_id);
        session.complete(handoff.clone());
        Ok(handoff)
    }

    async fn list_ids(&self, session: &ClaimSession) -> Result<Vec<CredentialId>, ClaimError> {
        let issuer = session.issuer().address;
        let subject = session.user().identity_id;
        with_deadline(
            self.policy.registry_timeout,
            async {
                self.registry
                    .list_credential_ids(&issuer, &subject)
                    .await
                    .map_err(ClaimError::from)
            },
            || ClaimError::RegistryUnavailable("registry read timed out".to_string()),
        )
        .await
    }

    /// Reads the registry until it lists more credentials than `baseline`,
    /// then returns the newest one.
    ///
    /// Reads are the only calls retried in the flow; they have no side
    /// effects.
    async fn reconcile(&self, session: &ClaimSession, baseline: usize) -> Result<CredentialId, ClaimError> {
        let attempts = self.policy.reconcile_attempts.max(1);
        let mut last_failure = None;

        for attempt in 1..=attempts {
            match self.list_ids(session).await {
                Ok(ids) if ids.len() > baseline => {
                    if let Some(newest) = ids.last() {
                        return Ok(newest.clone());
                    }
                }
                Ok(ids) => {
                    log::debug!(
                        "session {}: registry still lists {} credentials (attempt {}/{})",
                        session.id(),
                        ids.len(),
                        attempt,
                        attempts
                    );
                    last_failure = None;
                }
                Err(e) => {
                    log::warn!("session {}: reconciliation read failed: {}", session.id(), e);
                    last_failure = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.reconcile_backoff).await;
            }
        }

        Err(last_failure.unwrap_or(ClaimError::CredentialNotReconciled { attempts }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::credential_registry::ChainError;
    use crate::contracts::mock::MemoryLedger;
    use crate::models::proof::fixtures::proof_bound_to;
    use crate::services::session::fixtures::{session, ISSUER, USER};
    use crate::services::session::CancelOutcome;
    use crate::wallet::connector::WalletError;
    use tokio_test::{assert_err, assert_ok};

    fn fast_policy() -> IssuancePolicy {
        IssuancePolicy {
            registry_timeout: Duration::from_millis(200),
            issuance_timeout: Duration::from_millis(200),
            reconcile_attempts: 3,
            reconcile_backoff: Duration::from_millis(5),
        }
    }

    fn orchestrator(ledger: &Arc<MemoryLedger>) -> IssuanceOrchestrator {
        IssuanceOrchestrator::new(ledger.clone(), ledger.clone(), fast_policy())
    }

    #[tokio::test]
    async fn test_end_to_end_issuance() {
        let ledger = MemoryLedger::new();
        let (session, _) = session(Some("0xabc"));
        session.attach_proof(proof_bound_to("0xabc")).unwrap();

        let handoff = orchestrator(&ledger).issue(&session).await.unwrap();

        assert_eq!(
            session.snapshot().history,
            vec![
                ClaimState::Idle,
                ClaimState::WalletBinding,
                ClaimState::ProofGating,
                ClaimState::Issuing,
                ClaimState::Reconciling,
                ClaimState::Issued,
            ]
        );
        assert_eq!(handoff.issuer.to_string(), ISSUER);
        assert_eq!(handoff.subject.to_string(), USER);
        assert_eq!(
            handoff.contract_address,
            ISSUER.parse::<crate::models::did::Did>().unwrap().identity_id().address()
        );
        assert_eq!(ledger.issue_count(), 1);
        assert!(!session.is_in_flight());
    }

    #[tokio::test]
    async fn test_claim_id_is_last_listed_after_issuance() {
        let ledger = MemoryLedger::new();
        let (session, _) = session(Some("0xabc"));
        ledger.seed(session.issuer().address, session.user().identity_id, &["c1", "c2"]);
        session.attach_proof(proof_bound_to("0xabc")).unwrap();

        let handoff = orchestrator(&ledger).issue(&session).await.unwrap();

        let listed = ledger
            .list_credential_ids(&session.issuer().address, &session.user().identity_id)
            .await
            .unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(&handoff.claim_id, listed.last().unwrap());
        assert_ne!(handoff.claim_id, CredentialId::new("c2"));
    }

    #[tokio::test]
    async fn test_proof_for_other_wallet_never_reaches_chain() {
        let ledger = MemoryLedger::new();
        let (session, _) = session(Some("0xaaa"));
        session.attach_proof(proof_bound_to("0xbbb")).unwrap();

        let err = orchestrator(&ledger).issue(&session).await.unwrap_err();

        assert!(matches!(err, ClaimError::ProofSignalMismatch { .. }));
        assert_eq!(session.state(), ClaimState::Failed);
        assert_eq!(ledger.issue_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_proof_fails_session() {
        let ledger = MemoryLedger::new();
        let (session, _) = session(Some("0xabc"));

        let err = orchestrator(&ledger).issue(&session).await.unwrap_err();

        assert_eq!(err, ClaimError::ProofMissing);
        assert_eq!(session.state(), ClaimState::Failed);
        assert!(session.snapshot().last_error.is_some());
        assert_eq!(ledger.issue_count(), 0);

        // A failed session is not resumed, even with a fresh proof.
        assert_err!(session.attach_proof(proof_bound_to("0xabc")));
        assert_eq!(
            orchestrator(&ledger).issue(&session).await.unwrap_err(),
            ClaimError::SessionClosed(ClaimState::Failed)
        );
    }

    #[tokio::test]
    async fn test_wallet_not_connected_waits_then_resumes() {
        let ledger = MemoryLedger::new();
        let (session, wallet) = session(None);
        session.attach_proof(proof_bound_to("0xabc")).unwrap();
        let orchestrator = orchestrator(&ledger);

        let err = orchestrator.issue(&session).await.unwrap_err();
        assert_eq!(err, ClaimError::WalletNotConnected(WalletError::NoProvider));
        assert_eq!(session.state(), ClaimState::WalletBinding);
        assert!(session.has_proof());

        wallet.bind("0xabc".parse().unwrap());
        assert_ok!(orchestrator.issue(&session).await);
        assert_eq!(session.state(), ClaimState::Issued);
        assert_eq!(
            session.snapshot().history.iter().filter(|s| **s == ClaimState::WalletBinding).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_second_attempt_while_issuing_is_busy() {
        let ledger = MemoryLedger::new();
        let hold = ledger.hold_issuance();
        let (session, _) = session(Some("0xabc"));
        session.attach_proof(proof_bound_to("0xabc")).unwrap();
        let session = Arc::new(session);
        let orchestrator = orchestrator(&ledger);

        let first = {
            let orchestrator = orchestrator.clone();
            let session = session.clone();
            tokio::spawn(async move { orchestrator.issue(&session).await })
        };
        hold.entered.notified().await;
        assert_eq!(session.state(), ClaimState::Issuing);

        assert_eq!(orchestrator.issue(&session).await.unwrap_err(), ClaimError::Busy);
        assert_eq!(session.cancel(), CancelOutcome::InFlight);

        hold.release.notify_one();
        assert_ok!(first.await.unwrap());
        assert_eq!(ledger.issue_count(), 1);
    }

    #[tokio::test]
    async fn test_rejection_reason_surfaces_verbatim() {
        let ledger = MemoryLedger::new();
        ledger.fail_issuance_with(ChainError::IssuanceRejected("Nullifier already used".to_string()));
        let (session, _) = session(Some("0xabc"));
        session.attach_proof(proof_bound_to("0xabc")).unwrap();

        let err = orchestrator(&ledger).issue(&session).await.unwrap_err();

        assert_eq!(err, ClaimError::IssuanceRejected("Nullifier already used".to_string()));
        assert_eq!(session.state(), ClaimState::Failed);
        assert!(session.snapshot().last_error.unwrap().contains("Nullifier already used"));
        assert_eq!(ledger.issue_count(), 1);
    }

    #[tokio::test]
    async fn test_hanging_chain_times_out_without_retry() {
        let ledger = MemoryLedger::new();
        ledger.set_chain_hangs(true);
        let (session, _) = session(Some("0xabc"));
        session.attach_proof(proof_bound_to("0xabc")).unwrap();

        let err = orchestrator(&ledger).issue(&session).await.unwrap_err();

        assert!(matches!(err, ClaimError::ChainUnavailable(_)));
        assert_eq!(session.state(), ClaimState::Failed);
        assert_eq!(ledger.issue_count(), 1);
    }

    #[tokio::test]
    async fn test_registry_down_before_issuance_prevents_write() {
        let ledger = MemoryLedger::new();
        ledger.set_registry_down(true);
        let (session, _) = session(Some("0xabc"));
        session.attach_proof(proof_bound_to("0xabc")).unwrap();

        let err = orchestrator(&ledger).issue(&session).await.unwrap_err();

        assert!(matches!(err, ClaimError::RegistryUnavailable(_)));
        assert_eq!(session.state(), ClaimState::Failed);
        assert_eq!(ledger.issue_count(), 0);
    }

    #[tokio::test]
    async fn test_hanging_registry_times_out() {
        let ledger = MemoryLedger::new();
        ledger.set_registry_hangs(true);
        let (session, _) = session(Some("0xabc"));
        session.attach_proof(proof_bound_to("0xabc")).unwrap();

        let err = orchestrator(&ledger).issue(&session).await.unwrap_err();
        assert_eq!(err, ClaimError::RegistryUnavailable("registry read timed out".to_string()));
    }

    #[tokio::test]
    async fn test_reconciliation_waits_for_registry_to_catch_up() {
        let ledger = MemoryLedger::new();
        let (session, _) = session(Some("0xabc"));
        ledger.seed(session.issuer().address, session.user().identity_id, &["1"]);
        session.attach_proof(proof_bound_to("0xabc")).unwrap();
        // Baseline read plus one stale read after issuance.
        ledger.delay_visibility(2);

        let handoff = orchestrator(&ledger).issue(&session).await.unwrap();

        assert_eq!(handoff.claim_id, CredentialId::new("100"));
        assert_eq!(ledger.list_calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unreconciled_issuance_fails() {
        let ledger = MemoryLedger::new();
        let (session, _) = session(Some("0xabc"));
        session.attach_proof(proof_bound_to("0xabc")).unwrap();
        ledger.delay_visibility(10);

        let err = orchestrator(&ledger).issue(&session).await.unwrap_err();

        assert_eq!(err, ClaimError::CredentialNotReconciled { attempts: 3 });
        assert_eq!(session.state(), ClaimState::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_session_makes_no_calls() {
        let ledger = MemoryLedger::new();
        let (session, _) = session(Some("0xabc"));
        session.attach_proof(proof_bound_to("0xabc")).unwrap();
        assert_eq!(session.cancel(), CancelOutcome::Abandoned);

        let err = orchestrator(&ledger).issue(&session).await.unwrap_err();

        assert_eq!(err, ClaimError::Cancelled);
        assert_eq!(ledger.issue_count(), 0);
        assert_eq!(ledger.list_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
