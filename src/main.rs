// src/main.rs

//! # On-chain Credential Claim Service - Main Entry Point
//!
//! Wires the claim components together and starts the API server.
//!
//! ## Architecture Overview
//! 1. **Blockchain Layer**: `ChainClient` for `eth_call` reads and operator-signed transactions
//! 2. **Contracts Layer**: `OnchainIssuer`, the issuer registry and issuance capability
//! 3. **Services Layer**: issuance orchestration, claim flow control and HTTP endpoints
//! 4. **Identity / Wallet / ZKP**: DID resolution, wallet binding and the proof gate
//!
//! ## Configuration
//! Read from `claim.toml` and `CLAIM_*` environment variables (see [`settings::Settings`]).
//! Without `CLAIM_PRIVATE_KEY` the service runs read-only and every issuance
//! fails with `ChainUnavailable`.

use crate::blockchain::eth_client::ChainClient;
use crate::settings::Settings;
use crate::contracts::credential_registry::OnchainIssuer;
use crate::services::api_server::ApiServer;
use crate::services::claim_flow::ClaimFlow;
use crate::services::credential_issuer::IssuanceOrchestrator;
use crate::wallet::key_management::OperatorKey;
use anyhow::Context;
use dotenv::dotenv;
use std::sync::Arc;

// Module declarations (organized by functional domain)
mod blockchain; // Chain RPC access
mod settings; // Layered settings
mod contracts; // Issuer registry bindings
mod error; // Claim error taxonomy
mod models; // DIDs, credentials, proofs
mod services; // Orchestration, flow and API
mod utils; // Hashing helpers
mod wallet; // User wallet and operator key
mod zkp; // Proof gate

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load environment and settings
/// 2. Connect to the chain (signing if an operator key is configured)
/// 3. Build the issuance orchestrator and claim flow
/// 4. Start the API server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let settings = Settings::load().context("failed to load settings")?;

    let client = match settings.operator_key() {
        Some(private_key) => {
            let key = OperatorKey::from_hex(private_key).context("invalid CLAIM_PRIVATE_KEY")?;
            ChainClient::with_operator(&settings.rpc_url, key)
                .await
                .context("failed to connect operator to chain")?
        }
        None => {
            log::warn!("no operator key configured; credential issuance is disabled");
            ChainClient::read_only(&settings.rpc_url).context("invalid CLAIM_RPC_URL")?
        }
    };
    log::info!(
        "chain client on {} (operator: {:?})",
        settings.rpc_url,
        client.operator_address()
    );

    let issuer = Arc::new(OnchainIssuer::new(Arc::new(client)));
    let orchestrator = IssuanceOrchestrator::new(issuer.clone(), issuer.clone(), settings.issuance_policy());
    let flow = ClaimFlow::new(issuer, orchestrator);

    let api_server = ApiServer::new(
        flow,
        settings.verification_url.clone(),
        settings.offer_base_url.clone(),
    );
    api_server.run(settings.listen_addr).await
}
