// src/contracts/mock.rs
//! In-memory issuer ledger used by tests.
//!
//! Implements both [`CredentialRegistry`] and [`IssuanceChain`] over one
//! shared map so that an issuance is visible to later registry reads, the way
//! it is on-chain. Knobs simulate outages, hangs, delayed visibility and a
//! transaction held in flight.

use super::credential_registry::{
    ChainError, CredentialRegistry, IssuanceChain, IssuanceReceipt, RegistryError,
};
use crate::models::credential::{CredentialId, OnchainCredential};
use crate::models::did::{BlockchainAddress, IdentityId};
use crate::zkp::proof_gate::Admitted;
use async_trait::async_trait;
use ethers_core::types::H256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

type Key = (BlockchainAddress, IdentityId);

/// Pause point inside `issue_credential`.
#[derive(Clone, Default)]
pub struct IssuanceHold {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
pub struct MemoryLedger {
    published: Mutex<HashMap<Key, Vec<CredentialId>>>,
    pending: Mutex<Vec<(Key, CredentialId)>>,
    next_id: AtomicU64,
    stale_reads: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub issue_calls: AtomicUsize,
    registry_down: AtomicBool,
    registry_hangs: AtomicBool,
    chain_hangs: AtomicBool,
    chain_failure: Mutex<Option<ChainError>>,
    hold: Mutex<Option<IssuanceHold>>,
}

impl MemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryLedger {
            next_id: AtomicU64::new(100),
            ..Default::default()
        })
    }

    pub fn seed(&self, issuer: BlockchainAddress, subject: IdentityId, ids: &[&str]) {
        self.published
            .lock()
            .unwrap()
            .entry((issuer, subject))
            .or_default()
            .extend(ids.iter().map(|id| CredentialId::new(*id)));
    }

    pub fn set_registry_down(&self, down: bool) {
        self.registry_down.store(down, Ordering::SeqCst);
    }

    pub fn set_registry_hangs(&self, hangs: bool) {
        self.registry_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn set_chain_hangs(&self, hangs: bool) {
        self.chain_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn fail_issuance_with(&self, error: ChainError) {
        *self.chain_failure.lock().unwrap() = Some(error);
    }

    /// The next `reads` registry reads do not see freshly issued credentials.
    pub fn delay_visibility(&self, reads: usize) {
        self.stale_reads.store(reads, Ordering::SeqCst);
    }

    pub fn hold_issuance(&self) -> IssuanceHold {
        let hold = IssuanceHold::default();
        *self.hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    pub fn issue_count(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst)
    }

    fn publish_pending(&self) {
        let mut pending = self.pending.lock().unwrap();
        let mut published = self.published.lock().unwrap();
        for (key, id) in pending.drain(..) {
            published.entry(key).or_default().push(id);
        }
    }
}

#[async_trait]
impl CredentialRegistry for MemoryLedger {
    async fn list_credential_ids(
        &self,
        issuer: &BlockchainAddress,
        subject: &IdentityId,
    ) -> Result<Vec<CredentialId>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.registry_hangs.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.registry_down.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("connection refused".to_string()));
        }

        let stale = self
            .stale_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !stale {
            self.publish_pending();
        }

        Ok(self
            .published
            .lock()
            .unwrap()
            .get(&(*issuer, *subject))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_credential(
        &self,
        issuer: &BlockchainAddress,
        subject: &IdentityId,
        credential_id: &CredentialId,
    ) -> Result<OnchainCredential, RegistryError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.registry_down.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("connection refused".to_string()));
        }
        let known = self
            .published
            .lock()
            .unwrap()
            .get(&(*issuer, *subject))
            .map(|ids| ids.contains(credential_id))
            .unwrap_or(false);
        if !known {
            return Err(RegistryError::NotFound(credential_id.clone()));
        }
        Ok(OnchainCredential {
            id: credential_id.clone(),
            context: "https://example.org/anon-aadhaar.jsonld".to_string(),
            credential_type: "AnonAadhaarCredential".to_string(),
            issuance_date: 1_718_000_000,
            expiration_date: 0,
        })
    }
}

#[async_trait]
impl IssuanceChain for MemoryLedger {
    async fn issue_credential(
        &self,
        issuer: &BlockchainAddress,
        subject: &IdentityId,
        _admitted: Admitted,
    ) -> Result<IssuanceReceipt, ChainError> {
        self.issue_calls.fetch_add(1, Ordering::SeqCst);

        let hold = self.hold.lock().unwrap().clone();
        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
        if self.chain_hangs.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(error) = self.chain_failure.lock().unwrap().clone() {
            return Err(error);
        }

        let id = CredentialId::new(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        self.pending.lock().unwrap().push(((*issuer, *subject), id));
        Ok(IssuanceReceipt {
            tx_hash: H256::from_low_u64_be(self.issue_count() as u64),
            block_number: Some(1),
        })
    }
}
