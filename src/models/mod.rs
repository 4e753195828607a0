//! Data structures shared across the claim flow.

pub mod credential;
pub mod did;
pub mod proof;
