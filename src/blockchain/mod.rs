//! Chain access.

pub mod eth_client;
