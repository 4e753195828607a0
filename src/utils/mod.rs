//! Helper functions.

pub mod crypto;
