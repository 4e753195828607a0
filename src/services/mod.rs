//! Claim services: session state, issuance, flow control and the HTTP API.

pub mod api_server;
pub mod claim_flow;
pub mod credential_issuer;
pub mod session;
