// src/models/proof.rs
//! Attribute proof produced by the Anon Aadhaar prover.
//!
//! The proof is generated outside this service. This model only fixes its
//! shape: every field is required, so a payload missing one fails at the
//! deserialization boundary instead of travelling further as an empty value.
//! Apart from `groth16` (checked for presence) and `signal` (checked against
//! the claiming wallet), the fields are passed through to the issuance call
//! untouched.

use serde::{Deserialize, Serialize};

/// Attributes disclosed by the proof. Each value is the decimal field element
/// the circuit reveals (`0` when the attribute was not requested).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealedAttributes {
    pub age_above18: String,
    pub gender: String,
    pub pincode: String,
    pub state: String,
}

impl RevealedAttributes {
    /// Order expected by the issuer contract's `revealArray`.
    pub fn as_reveal_array(&self) -> [&str; 4] {
        [&self.age_above18, &self.gender, &self.pincode, &self.state]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeProof {
    /// Packed Groth16 proof: `a[0..2]`, `b[0..2][0..2]`, `c[0..2]`.
    pub groth16: [String; 8],
    /// Value the proof is bound to; must equal the claiming wallet address.
    pub signal: String,
    pub nullifier: String,
    pub nullifier_seed: String,
    pub timestamp: String,
    pub revealed: RevealedAttributes,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn proof_bound_to(signal: &str) -> AttributeProof {
        AttributeProof {
            groth16: std::array::from_fn(|i| (i + 1).to_string()),
            signal: signal.to_string(),
            nullifier: "9123".to_string(),
            nullifier_seed: "1234".to_string(),
            timestamp: "1718000000".to_string(),
            revealed: RevealedAttributes {
                age_above18: "1".to_string(),
                gender: "77".to_string(),
                pincode: "110051".to_string(),
                state: "0".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_field_fails_deserialization() {
        let payload = json!({
            "groth16": ["1", "2", "3", "4", "5", "6", "7", "8"],
            "signal": "0xabc",
            "nullifierSeed": "1",
            "timestamp": "2",
            "revealed": { "ageAbove18": "1", "gender": "0", "pincode": "0", "state": "0" }
        });
        assert!(serde_json::from_value::<AttributeProof>(payload).is_err());
    }

    #[test]
    fn test_groth16_length_is_enforced() {
        let payload = json!({
            "groth16": ["1", "2", "3"],
            "signal": "0xabc",
            "nullifier": "5",
            "nullifierSeed": "1",
            "timestamp": "2",
            "revealed": { "ageAbove18": "1", "gender": "0", "pincode": "0", "state": "0" }
        });
        assert!(serde_json::from_value::<AttributeProof>(payload).is_err());
    }

    #[test]
    fn test_reveal_array_order() {
        let proof = fixtures::proof_bound_to("0xabc");
        assert_eq!(proof.revealed.as_reveal_array(), ["1", "77", "110051", "0"]);
    }
}
