//! Local private-key attester signer.

use std::str::FromStr;

use alloy_primitives::{Address, Bytes, FixedBytes};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::error::{BridgeError, Result};
use crate::traits::AttesterSigner;

/// Attester signer backed by an in-memory secp256k1 key.
///
/// For operators who co-host attester keys with the attestation service.
///
/// # Examples
///
/// ```rust
/// use attestation_bridge::providers::LocalKeySigner;
///
/// let signer = LocalKeySigner::random();
/// let signature = signer.sign_sync([7u8; 32].into()).unwrap();
/// assert_eq!(signature.len(), 65);
/// ```
#[derive(Debug, Clone)]
pub struct LocalKeySigner {
    signer: PrivateKeySigner,
}

impl LocalKeySigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    pub fn random() -> Self {
        Self::new(PrivateKeySigner::random())
    }

    /// Parses a hex private key, with or without `0x`.
    pub fn from_hex(key: &str) -> Result<Self> {
        PrivateKeySigner::from_str(key.trim())
            .map(Self::new)
            .map_err(|e| BridgeError::InvalidConfig(format!("invalid attester key: {e}")))
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// The wrapped key, e.g. to build a transaction wallet from it
    pub fn into_inner(self) -> PrivateKeySigner {
        self.signer
    }

    /// Signs the raw 32-byte hash without any message prefix
    pub fn sign_sync(&self, message_hash: FixedBytes<32>) -> Result<Bytes> {
        let signature = self
            .signer
            .sign_hash_sync(&message_hash)
            .map_err(|e| BridgeError::InvalidSignature(e.to_string()))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }
}

#[async_trait]
impl AttesterSigner for LocalKeySigner {
    fn identity(&self) -> Address {
        self.signer.address()
    }

    #[instrument(skip(self), fields(attester = %self.signer.address()))]
    async fn sign(&self, message_hash: FixedBytes<32>) -> Result<Bytes> {
        trace!(message_hash = %message_hash, "Signing message hash");
        self.sign_sync(message_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::recover_attester;

    #[tokio::test]
    async fn test_signature_recovers_to_identity() {
        let signer = LocalKeySigner::random();
        let hash = FixedBytes::from([0x42; 32]);
        let signature = signer.sign(hash).await.unwrap();
        assert_eq!(recover_attester(hash, &signature).unwrap(), signer.identity());
    }

    #[test]
    fn test_from_hex() {
        let key = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
        let signer = LocalKeySigner::from_hex(key).unwrap();
        let without_prefix = LocalKeySigner::from_hex(&key[2..]).unwrap();
        assert_eq!(signer.address(), without_prefix.address());

        assert!(LocalKeySigner::from_hex("not a key").is_err());
    }
}
