//! Attester signatures over message hashes
//!
//! Attesters sign the raw 32-byte message hash with secp256k1 (no EIP-191
//! prefix). Identity is the address recovered from the 65-byte `r || s || v`
//! signature, so a signature carries its own claimed signer.

use alloy_primitives::{Address, Bytes, FixedBytes, Signature};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Length of an encoded attester signature
pub const SIGNATURE_LEN: usize = 65;

/// A signature paired with the attester identity it recovers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttesterSignature {
    pub attester: Address,
    pub signature: Bytes,
}

/// Recovers the attester identity behind `signature` for `message_hash`.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidSignature`] when the signature is not 65
/// bytes or does not recover to a public key.
pub fn recover_attester(message_hash: FixedBytes<32>, signature: &[u8]) -> Result<Address> {
    if signature.len() != SIGNATURE_LEN {
        return Err(BridgeError::InvalidSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }

    let signature = Signature::try_from(signature)
        .map_err(|e| BridgeError::InvalidSignature(e.to_string()))?;

    signature
        .recover_address_from_prehash(&message_hash)
        .map_err(|e| BridgeError::InvalidSignature(e.to_string()))
}

/// Recovers the signer and packages it with the signature bytes.
pub fn verify_signature(message_hash: FixedBytes<32>, signature: Bytes) -> Result<AttesterSignature> {
    let attester = recover_attester(message_hash, &signature)?;
    Ok(AttesterSignature {
        attester,
        signature,
    })
}
