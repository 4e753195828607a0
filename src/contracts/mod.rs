//! Smart contract interfaces.

pub mod credential_registry;
#[cfg(test)]
pub mod mock;
