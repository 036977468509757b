//! Unsigned and signed zome call invocations.
//!
//! The signature covers the SHA-512 digest of the unsigned call encoded as
//! named-field MessagePack, so the conductor can rebuild the exact bytes
//! from the fields it receives.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::crypto::{verify_signature, CapSecret, Nonce256Bit, Signature, SigningKeyPair};
use crate::error::Result;
use crate::hash::{AgentPubKey, CellId};

/// A zome call before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZomeCallUnsigned {
    /// Identity the call is made as.
    pub provenance: AgentPubKey,
    /// Target cell.
    pub cell_id: CellId,
    /// Target zome.
    pub zome_name: String,
    /// Target function.
    pub fn_name: String,
    /// Secret for the capability grant being exercised.
    pub cap_secret: Option<CapSecret>,
    /// MessagePack-encoded function argument.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// Single-use nonce.
    pub nonce: Nonce256Bit,
    /// Expiry in microseconds since the Unix epoch.
    pub expires_at: i64,
}

impl ZomeCallUnsigned {
    /// Bytes the signature is computed over.
    pub fn data_to_sign(&self) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec_named(self)?;
        Ok(Sha512::digest(&encoded).to_vec())
    }

    /// Sign this call.
    pub fn sign(self, key_pair: &SigningKeyPair) -> Result<ZomeCallSigned> {
        let signature = key_pair.sign(&self.data_to_sign()?);
        Ok(ZomeCallSigned {
            provenance: self.provenance,
            cell_id: self.cell_id,
            zome_name: self.zome_name,
            fn_name: self.fn_name,
            cap_secret: self.cap_secret,
            payload: self.payload,
            nonce: self.nonce,
            expires_at: self.expires_at,
            signature,
        })
    }
}

/// A zome call ready to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZomeCallSigned {
    /// Identity the call is made as; the signature verifies under it.
    pub provenance: AgentPubKey,
    /// Target cell.
    pub cell_id: CellId,
    /// Target zome.
    pub zome_name: String,
    /// Target function.
    pub fn_name: String,
    /// Secret for the capability grant being exercised.
    pub cap_secret: Option<CapSecret>,
    /// MessagePack-encoded function argument.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// Single-use nonce.
    pub nonce: Nonce256Bit,
    /// Expiry in microseconds since the Unix epoch.
    pub expires_at: i64,
    /// Ed25519 signature over [`ZomeCallUnsigned::data_to_sign`].
    pub signature: Signature,
}

impl ZomeCallSigned {
    /// The unsigned call this signature covers.
    pub fn unsigned(&self) -> ZomeCallUnsigned {
        ZomeCallUnsigned {
            provenance: self.provenance,
            cell_id: self.cell_id,
            zome_name: self.zome_name.clone(),
            fn_name: self.fn_name.clone(),
            cap_secret: self.cap_secret,
            payload: self.payload.clone(),
            nonce: self.nonce,
            expires_at: self.expires_at,
        }
    }

    /// Check the signature against a public key.
    pub fn verify(&self, key: &VerifyingKey) -> Result<()> {
        verify_signature(key, &self.unsigned().data_to_sign()?, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{random_cap_secret, random_nonce};
    use crate::error::ProtocolError;
    use crate::hash::DnaHash;

    fn unsigned(key_pair: &SigningKeyPair) -> ZomeCallUnsigned {
        let agent = key_pair.agent_pub_key();
        ZomeCallUnsigned {
            provenance: agent,
            cell_id: CellId::new(DnaHash::from_core([4u8; 32]), agent),
            zome_name: "posts".to_string(),
            fn_name: "create_post".to_string(),
            cap_secret: Some(random_cap_secret().unwrap()),
            payload: rmp_serde::to_vec("hello").unwrap(),
            nonce: random_nonce().unwrap(),
            expires_at: 1_700_000_000_000_000,
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let key_pair = SigningKeyPair::from_secret_key_bytes(&[8u8; 32]);
        let signed = unsigned(&key_pair).sign(&key_pair).unwrap();
        assert!(signed.verify(key_pair.verifying_key()).is_ok());
    }

    #[test]
    fn test_tampered_call_fails_verification() {
        let key_pair = SigningKeyPair::from_secret_key_bytes(&[8u8; 32]);
        let mut signed = unsigned(&key_pair).sign(&key_pair).unwrap();
        signed.fn_name = "delete_post".to_string();

        let result = signed.verify(key_pair.verifying_key());
        assert!(matches!(result, Err(ProtocolError::InvalidSignature(_))));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let key_pair = SigningKeyPair::from_secret_key_bytes(&[8u8; 32]);
        let other = SigningKeyPair::from_secret_key_bytes(&[9u8; 32]);
        let signed = unsigned(&key_pair).sign(&key_pair).unwrap();
        assert!(signed.verify(other.verifying_key()).is_err());
    }

    #[test]
    fn test_data_to_sign_is_sha512() {
        let key_pair = SigningKeyPair::from_secret_key_bytes(&[8u8; 32]);
        let call = unsigned(&key_pair);
        let digest = call.data_to_sign().unwrap();
        assert_eq!(digest.len(), 64);

        let expected = Sha512::digest(rmp_serde::to_vec_named(&call).unwrap());
        assert_eq!(digest, expected.to_vec());
    }

    #[test]
    fn test_signed_call_uses_named_fields() {
        #[derive(Deserialize)]
        struct Loose {
            zome_name: String,
            fn_name: String,
            expires_at: i64,
        }

        let key_pair = SigningKeyPair::from_secret_key_bytes(&[8u8; 32]);
        let signed = unsigned(&key_pair).sign(&key_pair).unwrap();
        let bytes = rmp_serde::to_vec_named(&signed).unwrap();

        let loose: Loose = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(loose.zome_name, "posts");
        assert_eq!(loose.fn_name, "create_post");
        assert_eq!(loose.expires_at, 1_700_000_000_000_000);

        let decoded: ZomeCallSigned = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, signed);
    }
}
