// src/services/session.rs
//! Claim session state.
//!
//! A [`ClaimSession`] is created when a claim flow starts and holds everything
//! that changes while the user works through it: the selected credential, the
//! attached proof, the bound wallet, the current [`ClaimState`] and the last
//! error. Issuer and subject contexts are fixed at creation.
//!
//! The state lock is a plain mutex that is never held across an `.await`;
//! the orchestrator takes it only to move between states, which is also
//! where cancellation is observed.

use crate::error::ClaimError;
use crate::models::credential::{CredentialId, Handoff};
use crate::models::did::{Did, IssuerContext, UserContext};
use crate::models::proof::AttributeProof;
use crate::wallet::connector::{WalletAddress, WalletConnector};
use chrono::{DateTime, Utc};
use ethers_core::utils::hex;
use rand::RngCore;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    Idle,
    WalletBinding,
    ProofGating,
    Issuing,
    Reconciling,
    Issued,
    Failed,
    /// Cancelled before any chain write.
    Abandoned,
}

impl ClaimState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ClaimState::Issued | ClaimState::Failed | ClaimState::Abandoned)
    }

    /// States during which the chain call is in flight or has happened.
    fn is_committed(self) -> bool {
        matches!(self, ClaimState::Issuing | ClaimState::Reconciling)
    }
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClaimState::Idle => "idle",
            ClaimState::WalletBinding => "wallet_binding",
            ClaimState::ProofGating => "proof_gating",
            ClaimState::Issuing => "issuing",
            ClaimState::Reconciling => "reconciling",
            ClaimState::Issued => "issued",
            ClaimState::Failed => "failed",
            ClaimState::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The session was discarded with no side effects.
    Abandoned,
    /// The chain call is in flight; it will run to completion.
    InFlight,
    /// The session had already reached a terminal state.
    AlreadyClosed,
}

#[derive(Debug)]
struct SessionState {
    state: ClaimState,
    history: Vec<ClaimState>,
    selected: Option<CredentialId>,
    proof: Option<AttributeProof>,
    wallet: Option<WalletAddress>,
    last_error: Option<String>,
    handoff: Option<Handoff>,
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub state: ClaimState,
    pub history: Vec<ClaimState>,
    pub issuer: Did,
    pub subject: Did,
    pub contract_address: String,
    pub selected: Option<CredentialId>,
    pub proof_attached: bool,
    pub wallet: Option<WalletAddress>,
    pub last_error: Option<String>,
    pub in_flight: bool,
    pub handoff: Option<Handoff>,
    pub created_at: DateTime<Utc>,
}

/// Clears the in-flight flag when an attempt ends, however it ends.
pub struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct ClaimSession {
    id: String,
    issuer: IssuerContext,
    user: UserContext,
    wallet: Arc<dyn WalletConnector>,
    in_flight: AtomicBool,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionState>,
}

fn session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl ClaimSession {
    pub fn new(issuer: IssuerContext, user: UserContext, wallet: Arc<dyn WalletConnector>) -> Self {
        ClaimSession {
            id: session_id(),
            issuer,
            user,
            wallet,
            in_flight: AtomicBool::new(false),
            created_at: Utc::now(),
            inner: Mutex::new(SessionState {
                state: ClaimState::Idle,
                history: vec![ClaimState::Idle],
                selected: None,
                proof: None,
                wallet: None,
                last_error: None,
                handoff: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn issuer(&self) -> &IssuerContext {
        &self.issuer
    }

    pub fn user(&self) -> &UserContext {
        &self.user
    }

    pub fn wallet_connector(&self) -> &Arc<dyn WalletConnector> {
        &self.wallet
    }

    pub fn state(&self) -> ClaimState {
        self.lock().state
    }

    pub fn selected(&self) -> Option<CredentialId> {
        self.lock().selected.clone()
    }

    pub fn has_proof(&self) -> bool {
        self.lock().proof.is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Checks that a request still names the parties this session was
    /// created for. Contexts are never re-derived from different input.
    pub fn ensure_parties(&self, user_id: &str, issuer_id: &str) -> Result<(), ClaimError> {
        let user: Did = user_id.parse()?;
        let issuer: Did = issuer_id.parse()?;
        if user != self.user.did {
            return Err(ClaimError::ContextMismatch(format!(
                "session subject is {}, request names {}",
                self.user.did, user
            )));
        }
        if issuer != self.issuer.did {
            return Err(ClaimError::ContextMismatch(format!(
                "session issuer is {}, request names {}",
                self.issuer.did, issuer
            )));
        }
        Ok(())
    }

    fn open(state: &SessionState) -> Result<(), ClaimError> {
        match state.state {
            ClaimState::Abandoned => Err(ClaimError::Cancelled),
            current if current.is_terminal() => Err(ClaimError::SessionClosed(current)),
            _ => Ok(()),
        }
    }

    /// Fails once the session was cancelled or reached a terminal state.
    pub(crate) fn ensure_open(&self) -> Result<(), ClaimError> {
        Self::open(&self.lock())
    }

    /// Rejects user input once an attempt is running or the session closed.
    fn editable(&self, state: &SessionState) -> Result<(), ClaimError> {
        Self::open(state)?;
        if self.is_in_flight() {
            return Err(ClaimError::Busy);
        }
        Ok(())
    }

    /// Picks an existing credential for the fetch path.
    pub fn select(&self, credential_id: CredentialId) -> Result<(), ClaimError> {
        let mut state = self.lock();
        self.editable(&state)?;
        state.selected = Some(credential_id);
        Ok(())
    }

    pub fn clear_selection(&self) -> Result<(), ClaimError> {
        let mut state = self.lock();
        self.editable(&state)?;
        state.selected = None;
        Ok(())
    }

    /// Attaches the proof for the next issuance attempt, replacing any
    /// earlier one.
    pub fn attach_proof(&self, proof: AttributeProof) -> Result<(), ClaimError> {
        let mut state = self.lock();
        self.editable(&state)?;
        state.proof = Some(proof);
        Ok(())
    }

    /// Marks an issuance attempt as running.
    ///
    /// # Errors
    /// [`ClaimError::Busy`] while another attempt holds the session.
    pub(crate) fn begin_flight(&self) -> Result<FlightGuard<'_>, ClaimError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ClaimError::Busy)?;
        Ok(FlightGuard { flag: &self.in_flight })
    }

    /// Moves to `next`, observing cancellation and terminal states.
    pub(crate) fn advance(&self, next: ClaimState) -> Result<(), ClaimError> {
        let mut state = self.lock();
        match state.state {
            ClaimState::Abandoned => return Err(ClaimError::Cancelled),
            current if current.is_terminal() => return Err(ClaimError::SessionClosed(current)),
            current if current == next => return Ok(()),
            _ => {}
        }
        log::info!("session {}: {} -> {}", self.id, state.state, next);
        state.state = next;
        state.history.push(next);
        Ok(())
    }

    /// Binds the connected wallet and hands out the attached proof.
    ///
    /// The proof leaves the session here: one proof admits one attempt.
    pub(crate) fn bind_wallet(&self, wallet: WalletAddress) -> Option<AttributeProof> {
        let mut state = self.lock();
        state.wallet = Some(wallet);
        state.last_error = None;
        state.proof.take()
    }

    /// Records a recoverable problem without changing state.
    pub(crate) fn note(&self, error: &ClaimError) {
        self.lock().last_error = Some(error.to_string());
    }

    /// Moves to `Failed` and returns the error for propagation.
    pub(crate) fn fail(&self, error: ClaimError) -> ClaimError {
        let mut state = self.lock();
        if !state.state.is_terminal() {
            log::warn!("session {}: {} -> failed: {}", self.id, state.state, error);
            state.state = ClaimState::Failed;
            state.history.push(ClaimState::Failed);
        }
        state.last_error = Some(error.to_string());
        error
    }

    pub(crate) fn complete(&self, handoff: Handoff) {
        let mut state = self.lock();
        log::info!("session {}: {} -> issued ({})", self.id, state.state, handoff.claim_id);
        state.state = ClaimState::Issued;
        state.history.push(ClaimState::Issued);
        state.handoff = Some(handoff);
    }

    /// Builds the handoff for `claim_id` from this session's fixed contexts.
    pub fn handoff_for(&self, claim_id: CredentialId) -> Handoff {
        Handoff {
            claim_id,
            issuer: self.issuer.did.clone(),
            subject: self.user.did.clone(),
            contract_address: self.issuer.address,
        }
    }

    /// Requests cancellation.
    ///
    /// Honoured only before the chain call starts; once it is in flight the
    /// call is left to complete or fail on its own.
    pub fn cancel(&self) -> CancelOutcome {
        let mut state = self.lock();
        if state.state.is_committed() {
            return CancelOutcome::InFlight;
        }
        if state.state.is_terminal() {
            return CancelOutcome::AlreadyClosed;
        }
        log::info!("session {}: {} -> abandoned", self.id, state.state);
        state.state = ClaimState::Abandoned;
        state.history.push(ClaimState::Abandoned);
        state.proof = None;
        CancelOutcome::Abandoned
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            id: self.id.clone(),
            state: state.state,
            history: state.history.clone(),
            issuer: self.issuer.did.clone(),
            subject: self.user.did.clone(),
            contract_address: self.issuer.address.to_string(),
            selected: state.selected.clone(),
            proof_attached: state.proof.is_some(),
            wallet: state.wallet.clone(),
            last_error: state.last_error.clone(),
            in_flight: self.is_in_flight(),
            handoff: state.handoff.clone(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::wallet::connector::SessionWallet;

    pub const ISSUER: &str = "did:method:net:ISS";
    pub const USER: &str = "did:method:net:USR";

    pub fn contexts() -> (IssuerContext, UserContext) {
        (
            IssuerContext::resolve(ISSUER.parse().unwrap()),
            UserContext::resolve(USER.parse().unwrap()),
        )
    }

    /// Session whose wallet reports `wallet` (or nothing).
    pub fn session(wallet: Option<&str>) -> (ClaimSession, Arc<SessionWallet>) {
        let connector = Arc::new(SessionWallet::new());
        if let Some(address) = wallet {
            connector.bind(address.parse().unwrap());
        }
        let (issuer, user) = contexts();
        (ClaimSession::new(issuer, user, connector.clone()), connector)
    }
}
