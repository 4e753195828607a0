// src/services/api_server.rs
//! HTTP API for the claim flow.
//!
//! Exposes the claim page's interactions as JSON endpoints:
//! - `POST /agent` answers an agent message with a credential proposal
//! - `POST /claim/sessions` bootstraps a session and lists existing credentials
//! - `GET|DELETE /claim/sessions/:id` reads or cancels a session
//! - `POST /claim/sessions/:id/{select,wallet,proof,claim}` drive the flow
//! - `GET /credentials/:issuer/:user/:claim_id` reads one credential

use crate::error::ClaimError;
use crate::models::credential::CredentialId;
use crate::models::proof::AttributeProof;
use crate::services::claim_flow::{bootstrap, ClaimFlow, ClaimOutcome};
use crate::services::session::{CancelOutcome, ClaimSession};
use crate::wallet::connector::{SessionWallet, WalletAddress};
use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tower_http::cors::{Any, CorsLayer};

const PLAIN_MESSAGE_MEDIA_TYPE: &str = "application/iden3comm-plain-json";
const CREDENTIAL_PROPOSAL_TYPE: &str = "https://iden3-communication.io/credentials/0.1/proposal";
const CREDENTIAL_CONTEXT: &str =
    "https://raw.githubusercontent.com/anon-aadhaar/privado-contracts/main/assets/anon-aadhaar.jsonld";
const CREDENTIAL_TYPE: &str = "AnonAadhaarCredential";

/// Plain agent message. Only the routing fields are read.
#[derive(Serialize, Deserialize)]
struct BasicMessage {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct StartSessionRequest {
    #[serde(rename = "userID")]
    user_id: String,
    #[serde(rename = "issuerID")]
    issuer_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionResponse {
    session_id: String,
    contract_address: String,
    /// Newest first.
    credentials: Vec<CredentialId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectRequest {
    /// `None` clears the selection.
    claim_id: Option<CredentialId>,
}

#[derive(Deserialize)]
struct WalletRequest {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    rejected: bool,
}

/// Optional body of the claim call; when present it must name the session's
/// own parties.
#[derive(Deserialize)]
struct PartiesRequest {
    #[serde(rename = "userID")]
    user_id: String,
    #[serde(rename = "issuerID")]
    issuer_id: String,
}

#[derive(Deserialize)]
struct CredentialPath {
    issuer: String,
    user: String,
    claim_id: String,
}

/// A live session and the connector its wallet endpoint feeds.
struct SessionEntry {
    session: Arc<ClaimSession>,
    wallet: Arc<SessionWallet>,
}

/// API server state
pub struct ApiServer {
    flow: Arc<ClaimFlow>,
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    /// Public base URL of this service, for agent proposals.
    verification_url: String,
    /// Offer page a handoff is forwarded to.
    offer_base_url: String,
}

/// Maps a claim error to its HTTP status.
fn status_for(err: &ClaimError) -> StatusCode {
    match err {
        ClaimError::MalformedDid(_) | ClaimError::InvalidCredentialId(_) => StatusCode::BAD_REQUEST,
        ClaimError::WalletNotConnected(_) => StatusCode::PRECONDITION_REQUIRED,
        ClaimError::ProofMissing
        | ClaimError::ProofSignalMismatch { .. }
        | ClaimError::IssuanceRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ClaimError::RegistryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ClaimError::CredentialNotFound(_) => StatusCode::NOT_FOUND,
        ClaimError::ChainUnavailable(_) => StatusCode::BAD_GATEWAY,
        ClaimError::CredentialNotReconciled { .. } => StatusCode::GATEWAY_TIMEOUT,
        ClaimError::Busy | ClaimError::ContextMismatch(_) => StatusCode::CONFLICT,
        ClaimError::SessionClosed(_) | ClaimError::Cancelled => StatusCode::GONE,
    }
}

fn failure(err: &ClaimError) -> (StatusCode, Json<Value>) {
    (
        status_for(err),
        Json(json!({ "error": err.to_string(), "recoverable": err.is_recoverable() })),
    )
}

fn unknown_session(id: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown session {}", id) })),
    )
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `flow` - Claim flow controller shared by all sessions
    /// * `verification_url` - Public base URL used in credential proposals
    /// * `offer_base_url` - Offer page handoffs are forwarded to
    pub fn new(flow: ClaimFlow, verification_url: String, offer_base_url: String) -> Self {
        ApiServer {
            flow: Arc::new(flow),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            verification_url: verification_url.trim_end_matches('/').to_string(),
            offer_base_url,
        }
    }

    /// Builds the router with all claim routes and a permissive CORS layer.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]);

        Router::new()
            .route("/agent", post(Self::agent_handler))
            .route("/claim/sessions", post(Self::start_session_handler))
            .route(
                "/claim/sessions/:id",
                get(Self::session_handler).delete(Self::cancel_handler),
            )
            .route("/claim/sessions/:id/select", post(Self::select_handler))
            .route("/claim/sessions/:id/wallet", post(Self::wallet_handler))
            .route("/claim/sessions/:id/proof", post(Self::proof_handler))
            .route("/claim/sessions/:id/claim", post(Self::claim_handler))
            .route(
                "/credentials/:issuer/:user/:claim_id",
                get(Self::credential_handler),
            )
            .with_state(Arc::new(self.clone()))
            .layer(cors)
    }

    /// Starts the API server and serves until the listener fails.
    pub async fn run(&self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("claim API listening on http://{}", addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    fn entry(&self, id: &str) -> Option<(Arc<ClaimSession>, Arc<SessionWallet>)> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|entry| (entry.session.clone(), entry.wallet.clone()))
    }

    fn session(&self, id: &str) -> Option<Arc<ClaimSession>> {
        self.entry(id).map(|(session, _)| session)
    }

    /// Drops a session from the store once it has reached a terminal state.
    fn retire_if_closed(&self, session: &ClaimSession) {
        let state = session.state();
        if !state.is_terminal() {
            return;
        }
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session.id());
        if removed.is_some() {
            log::debug!("session {} closed as {}", session.id(), state);
        }
    }

    // =====================
    // Agent
    // =====================

    /// Answers an agent message with an `AnonAadhaarCredential` proposal.
    ///
    /// # Endpoint
    /// POST /agent
    ///
    /// The proposal URL points the sender at this service's claim page with
    /// the sender as user and the recipient as issuer.
    async fn agent_handler(
        State(state): State<Arc<ApiServer>>,
        Json(message): Json<BasicMessage>,
    ) -> impl IntoResponse {
        let claim_page = format!("{}/claim", state.verification_url);
        let url = match url::Url::parse_with_params(
            &claim_page,
            &[("userID", message.from.as_str()), ("issuerID", message.to.as_str())],
        ) {
            Ok(url) => url,
            Err(e) => {
                log::error!("invalid verification url {}: {}", claim_page, e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "failed to build proposal url" })),
                );
            }
        };

        let proposal = json!({
            "proposals": [{
                "credentials": [{ "context": CREDENTIAL_CONTEXT, "type": CREDENTIAL_TYPE }],
                "type": "anon-aadhaar",
                "url": url.as_str(),
                "description": "anon aadhaar credential",
            }]
        });
        let response = BasicMessage {
            id: message.id,
            typ: Some(PLAIN_MESSAGE_MEDIA_TYPE.to_string()),
            message_type: Some(CREDENTIAL_PROPOSAL_TYPE.to_string()),
            thid: message.thid,
            body: Some(proposal),
            from: message.to,
            to: message.from,
        };
        match serde_json::to_value(&response) {
            Ok(value) => (StatusCode::OK, Json(value)),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("failed to encode proposal: {}", e) })),
            ),
        }
    }

    // =====================
    // Claim sessions
    // =====================

    /// Bootstraps a claim session.
    ///
    /// # Endpoint
    /// POST /claim/sessions
    ///
    /// # Responses
    /// - 201 Created: session id and the subject's existing credentials
    /// - 400 Bad Request: either id is not a DID
    /// - 503 Service Unavailable: the issuer's registry could not be read
    async fn start_session_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<StartSessionRequest>,
    ) -> impl IntoResponse {
        let wallet = Arc::new(SessionWallet::new());
        let session = match state.flow.start_session(&payload.user_id, &payload.issuer_id, wallet.clone()) {
            Ok(session) => session,
            Err(e) => {
                log::warn!("rejected claim bootstrap: {}", e);
                return failure(&e);
            }
        };

        let credentials = match state.flow.existing_credentials(session.issuer(), session.user()).await {
            Ok(ids) => ids,
            Err(e) => {
                log::error!("session {}: listing credentials failed: {}", session.id(), e);
                return failure(&e);
            }
        };

        let response = StartSessionResponse {
            session_id: session.id().to_string(),
            contract_address: session.issuer().address.to_string(),
            credentials,
        };
        state
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                response.session_id.clone(),
                SessionEntry { session: Arc::new(session), wallet },
            );
        (StatusCode::CREATED, Json(json!(response)))
    }

    /// GET /claim/sessions/:id
    async fn session_handler(
        Path(id): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> impl IntoResponse {
        match state.session(&id) {
            Some(session) => (StatusCode::OK, Json(json!(session.snapshot()))),
            None => unknown_session(&id),
        }
    }

    /// Cancels a session.
    ///
    /// # Endpoint
    /// DELETE /claim/sessions/:id
    ///
    /// # Responses
    /// - 200 OK: abandoned, or already closed; the session is dropped
    /// - 409 Conflict: the issuance transaction is in flight and will complete
    async fn cancel_handler(
        Path(id): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> impl IntoResponse {
        let Some(session) = state.session(&id) else {
            return unknown_session(&id);
        };
        let outcome = session.cancel();
        state.retire_if_closed(&session);
        let status = match outcome {
            CancelOutcome::InFlight => StatusCode::CONFLICT,
            CancelOutcome::Abandoned | CancelOutcome::AlreadyClosed => StatusCode::OK,
        };
        (status, Json(json!({ "outcome": outcome, "state": session.state() })))
    }

    /// POST /claim/sessions/:id/select
    async fn select_handler(
        Path(id): Path<String>,
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<SelectRequest>,
    ) -> impl IntoResponse {
        let Some(session) = state.session(&id) else {
            return unknown_session(&id);
        };
        let result = match payload.claim_id {
            Some(claim_id) => session.select(claim_id),
            None => session.clear_selection(),
        };
        match result {
            Ok(()) => (StatusCode::OK, Json(json!(session.snapshot()))),
            Err(e) => failure(&e),
        }
    }

    /// Records the browser wallet's connection outcome.
    ///
    /// # Endpoint
    /// POST /claim/sessions/:id/wallet
    ///
    /// # Request Body
    /// `{"address": "0x..."}` or `{"rejected": true}`
    async fn wallet_handler(
        Path(id): Path<String>,
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<WalletRequest>,
    ) -> impl IntoResponse {
        let Some((session, wallet)) = state.entry(&id) else {
            return unknown_session(&id);
        };
        if payload.rejected {
            log::warn!("session {}: wallet connection rejected by user", id);
            wallet.reject();
            return (StatusCode::OK, Json(json!(session.snapshot())));
        }

        let address = payload.address.unwrap_or_default();
        match address.parse::<WalletAddress>() {
            Ok(address) => {
                wallet.bind(address);
                (StatusCode::OK, Json(json!(session.snapshot())))
            }
            Err(e) => {
                log::warn!("session {}: {}", id, e);
                (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
            }
        }
    }

    /// POST /claim/sessions/:id/proof
    async fn proof_handler(
        Path(id): Path<String>,
        State(state): State<Arc<ApiServer>>,
        Json(proof): Json<AttributeProof>,
    ) -> impl IntoResponse {
        let Some(session) = state.session(&id) else {
            return unknown_session(&id);
        };
        match session.attach_proof(proof) {
            Ok(()) => (StatusCode::OK, Json(json!(session.snapshot()))),
            Err(e) => failure(&e),
        }
    }

    /// Runs the claim.
    ///
    /// # Endpoint
    /// POST /claim/sessions/:id/claim
    ///
    /// # Request Body
    /// Optional `{"userID", "issuerID"}`; must match the session's parties.
    ///
    /// # Responses
    /// - 200 OK: the handoff and its offer URL, or `awaiting_choice`
    /// - 4xx/5xx: the claim error and the session's state
    ///
    /// A session that ends issued or failed is dropped; the response is the
    /// last place its outcome is reported.
    async fn claim_handler(
        Path(id): Path<String>,
        State(state): State<Arc<ApiServer>>,
        body: Bytes,
    ) -> impl IntoResponse {
        let Some(session) = state.session(&id) else {
            return unknown_session(&id);
        };

        if !body.is_empty() {
            let parties: PartiesRequest = match serde_json::from_slice(&body) {
                Ok(parties) => parties,
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "error": format!("invalid claim body: {}", e) })),
                    )
                }
            };
            if let Err(e) = session.ensure_parties(&parties.user_id, &parties.issuer_id) {
                log::warn!("session {}: {}", id, e);
                return failure(&e);
            }
        }

        let response = match state.flow.claim(&session).await {
            Ok(ClaimOutcome::Handoff(handoff)) => match handoff.offer_url(&state.offer_base_url) {
                Ok(offer_url) => (
                    StatusCode::OK,
                    Json(json!({
                        "outcome": "handoff",
                        "handoff": handoff,
                        "offerUrl": offer_url.as_str(),
                        "state": session.state(),
                    })),
                ),
                Err(e) => {
                    log::error!("invalid offer base url {}: {}", state.offer_base_url, e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "error": "failed to build offer url", "handoff": handoff })),
                    )
                }
            },
            Ok(ClaimOutcome::AwaitingChoice) => (
                StatusCode::OK,
                Json(json!({ "outcome": "awaiting_choice", "state": session.state() })),
            ),
            Err(e) => {
                let (status, Json(mut body)) = failure(&e);
                body["state"] = json!(session.state());
                (status, Json(body))
            }
        };
        state.retire_if_closed(&session);
        response
    }

    // =====================
    // Registry reads
    // =====================

    /// GET /credentials/:issuer/:user/:claim_id
    async fn credential_handler(
        Path(path): Path<CredentialPath>,
        State(state): State<Arc<ApiServer>>,
    ) -> impl IntoResponse {
        let (issuer, user) = match bootstrap(&path.user, &path.issuer) {
            Ok(contexts) => contexts,
            Err(e) => return failure(&e),
        };
        let claim_id = CredentialId::new(path.claim_id);
        match state.flow.fetch_credential(&issuer, &user, &claim_id).await {
            Ok(credential) => (StatusCode::OK, Json(json!(credential))),
            Err(e) => {
                log::debug!("credential {} for {}: {}", claim_id, user.did, e);
                failure(&e)
            }
        }
    }
}

// Implement Clone for ApiServer to use with Axum's State
impl Clone for ApiServer {
    fn clone(&self) -> Self {
        ApiServer {
            flow: Arc::clone(&self.flow),
            sessions: Arc::clone(&self.sessions),
            verification_url: self.verification_url.clone(),
            offer_base_url: self.offer_base_url.clone(),
        }
    }
}
