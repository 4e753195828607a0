// src/utils/crypto.rs
//! Hashing helpers shared by the identity derivations.
//!
//! Uses Keccak-256 so that derived identifiers line up with what the issuer
//! contracts compute on-chain.

use ethers::utils::keccak256;

/// Computes a Keccak-256 hash of the input data.
///
/// # Arguments
/// * `data` - Binary data to hash
///
/// # Returns
/// Fixed-size 32-byte digest.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    keccak256(data)
}

/// Encodes bytes as a lowercase `0x`-prefixed hex string.
pub fn to_prefixed_hex(bytes: &[u8]) -> String {
    format!("0x{}", ethers::utils::hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_data(b"did:iden3:polygon:amoy:x"), hash_data(b"did:iden3:polygon:amoy:x"));
        assert_ne!(hash_data(b"a"), hash_data(b"b"));
    }

    #[test]
    fn test_prefixed_hex() {
        assert_eq!(to_prefixed_hex(&[0xab, 0x01]), "0xab01");
    }
}
