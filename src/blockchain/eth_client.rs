// src/blockchain/eth_client.rs
//! EVM JSON-RPC client.
//!
//! Wraps an `ethers` HTTP provider for read-only contract queries and, when an
//! operator key is configured, a signing middleware for state-changing calls.
//! The client knows nothing about credentials; contract wrappers in
//! `crate::contracts` build on top of it.

use crate::wallet::key_management::OperatorKey;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers_contract::{BaseContract, Contract, ContractError};
use ethers_core::abi::{Abi, Detokenize, Tokenize};
use ethers_core::types::{Address, TransactionReceipt, H256, U256, U64};
use std::sync::Arc;
use thiserror::Error;

/// Gas limit attached to every state-changing call.
const GAS_LIMIT: u64 = 3_000_000;

type Signing = SignerMiddleware<Arc<Provider<Http>>, LocalWallet>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid rpc url `{0}`")]
    InvalidUrl(String),
    #[error("invalid operator key: {0}")]
    InvalidKey(String),
    #[error("no operator key configured, client is read-only")]
    ReadOnly,
    #[error("abi error: {0}")]
    Abi(String),
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("transaction was dropped before it was mined")]
    Dropped,
    #[error("rpc request failed: {0}")]
    Rpc(String),
}

/// Splits contract failures into reverts (the contract said no) and
/// everything else (the node could not be reached or answered garbage).
fn classify<M: Middleware>(err: ContractError<M>) -> ClientError {
    if let Some(reason) = err.decode_revert::<String>() {
        return ClientError::Reverted(reason);
    }
    if err.is_revert() {
        return ClientError::Reverted("no reason given".to_string());
    }
    ClientError::Rpc(err.to_string())
}

/// Client for one EVM chain.
#[derive(Clone)]
pub struct ChainClient {
    provider: Arc<Provider<Http>>,
    signer: Option<Arc<Signing>>,
}

impl ChainClient {
    /// Creates a client that can only run `eth_call` queries.
    ///
    /// Performs no network I/O.
    pub fn read_only(rpc_url: &str) -> Result<Self, ClientError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|_| ClientError::InvalidUrl(rpc_url.to_string()))?;
        Ok(Self {
            provider: Arc::new(provider),
            signer: None,
        })
    }

    /// Creates a client that signs transactions with the operator key.
    ///
    /// Fetches the chain id from the node so signatures carry EIP-155
    /// replay protection.
    pub async fn with_operator(rpc_url: &str, key: OperatorKey) -> Result<Self, ClientError> {
        let mut client = Self::read_only(rpc_url)?;
        let chain_id = client
            .provider
            .get_chainid()
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))?
            .as_u64();
        let wallet = key.into_wallet().with_chain_id(chain_id);
        log::info!("operator {:?} signing on chain {}", wallet.address(), chain_id);
        client.signer = Some(Arc::new(SignerMiddleware::new(client.provider.clone(), wallet)));
        Ok(client)
    }

    /// Address transactions are sent from, if the client can sign.
    pub fn operator_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    /// Sends a transaction to a contract and waits for it to be mined.
    ///
    /// # Errors
    /// - [`ClientError::ReadOnly`] without an operator key
    /// - [`ClientError::Reverted`] when the call reverts or the receipt
    ///   reports failure
    /// - [`ClientError::Rpc`] / [`ClientError::Dropped`] for transport problems
    pub async fn send_transaction(
        &self,
        contract_address: Address,
        abi: &Abi,
        method: &str,
        params: impl Tokenize,
    ) -> Result<TransactionReceipt, ClientError> {
        let signer = self.signer.as_ref().ok_or(ClientError::ReadOnly)?;
        let contract = Contract::new(contract_address, BaseContract::from(abi.clone()), signer.clone());

        let call = contract
            .method::<_, H256>(method, params)
            .map_err(|e| ClientError::Abi(e.to_string()))?
            .gas(U256::from(GAS_LIMIT));
        let pending = call.send().await.map_err(classify)?;
        let tx_hash = pending.tx_hash();
        log::debug!("{} submitted as {:?}", method, tx_hash);

        let receipt = pending
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))?
            .ok_or(ClientError::Dropped)?;
        if receipt.status == Some(U64::zero()) {
            return Err(ClientError::Reverted(format!("transaction {:?} failed", tx_hash)));
        }
        Ok(receipt)
    }

    /// Runs a read-only contract call.
    pub async fn query_contract<R: Detokenize>(
        &self,
        contract_address: Address,
        abi: &Abi,
        method: &str,
        params: impl Tokenize,
    ) -> Result<R, ClientError> {
        let contract = Contract::new(contract_address, BaseContract::from(abi.clone()), self.provider.clone());

        contract
            .method::<_, R>(method, params)
            .map_err(|e| ClientError::Abi(e.to_string()))?
            .call()
            .await
            .map_err(classify)
    }
}
