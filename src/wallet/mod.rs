//! Wallet capabilities: the claiming user's wallet and the operator key.

pub mod connector;
pub mod key_management;
