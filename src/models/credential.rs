// src/models/credential.rs
//! Credential identifiers, on-chain credential records and the handoff
//! payload passed to the credential-offer stage.

use crate::models::did::{BlockchainAddress, Did};
use url::Url;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, issuer-scoped reference to one issued credential.
///
/// The registry contract keys credentials by `uint256`; ids are carried as
/// their decimal string form. For one subject the registry returns them in
/// issuance order (oldest first).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(String);

impl CredentialId {
    pub fn new(id: impl Into<String>) -> Self {
        CredentialId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A credential as stored by the issuer's registry contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainCredential {
    pub id: CredentialId,
    /// JSON-LD context URL of the credential schema.
    pub context: String,
    /// Credential type, e.g. `AnonAadhaarCredential`.
    #[serde(rename = "type")]
    pub credential_type: String,
    /// Unix timestamp (seconds).
    pub issuance_date: u64,
    /// Unix timestamp (seconds); zero when the credential does not expire.
    pub expiration_date: u64,
}

/// Payload handed to the credential-offer stage.
///
/// Identical for the fetch and issue paths, so downstream consumers cannot
/// tell which path produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handoff {
    pub claim_id: CredentialId,
    pub issuer: Did,
    pub subject: Did,
    pub contract_address: BlockchainAddress,
}

impl Handoff {
    /// Renders the offer link for this handoff.
    ///
    /// `base` is the offer page, e.g. `https://verifier.example/offer`.
    /// Every parameter is URL-encoded.
    pub fn offer_url(&self, base: &str) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            base,
            &[
                ("claimId", self.claim_id.to_string()),
                ("issuer", self.issuer.to_string()),
                ("subject", self.subject.to_string()),
                ("contractAddress", self.contract_address.to_string()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handoff() -> Handoff {
        let issuer: Did = "did:iden3:polygon:amoy:ISS".parse().unwrap();
        let subject: Did = "did:iden3:privado:main:USR".parse().unwrap();
        Handoff {
            claim_id: CredentialId::new("7"),
            contract_address: issuer.identity_id().address(),
            issuer,
            subject,
        }
    }

    #[test]
    fn test_handoff_json_field_names() {
        let value = serde_json::to_value(handoff()).unwrap();
        assert_eq!(value["claimId"], "7");
        assert_eq!(value["issuer"], "did:iden3:polygon:amoy:ISS");
        assert_eq!(value["subject"], "did:iden3:privado:main:USR");
        assert!(value["contractAddress"].as_str().unwrap().starts_with("0x"));
    }

    #[test]
    fn test_offer_url_encodes_parameters() {
        let handoff = handoff();
        let url = handoff.offer_url("https://verifier.example/offer").unwrap();
        assert!(url.as_str().contains("issuer=did%3Aiden3%3Apolygon%3Aamoy%3AISS"));

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs[0], ("claimId".to_string(), "7".to_string()));
        assert_eq!(pairs[2].1, "did:iden3:privado:main:USR");
        assert_eq!(pairs[3].1, handoff.contract_address.to_string());
    }
}
