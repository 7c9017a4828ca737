use std::collections::HashMap;
use std::fmt;

use alloy_primitives::{Address, Bytes, FixedBytes};
use serde::{Deserialize, Serialize};

use super::{AttesterSignature, Domain, Message};

/// Lifecycle of one attestation inside the attestation service.
///
/// `Pending` moves to `Ready` when the signature quorum is reached, and `Ready`
/// moves to `Relayed` once the destination chain reports the message received.
/// `Expired` is entered from `Pending` when the quorum window elapses.
/// `Relayed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationStatus {
    Pending,
    Ready,
    Relayed,
    Expired,
}

impl AttestationStatus {
    pub const ALL: [AttestationStatus; 4] = [
        AttestationStatus::Pending,
        AttestationStatus::Ready,
        AttestationStatus::Relayed,
        AttestationStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Relayed => "relayed",
            Self::Expired => "expired",
        }
    }

    /// Whether the attestation may still be picked up by a relayer
    pub fn is_relayable(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for AttestationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated attestation for one message
///
/// `threshold` and `attester_set_version` are frozen when the message is first
/// observed; later registry changes never apply to an existing attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub message_hash: FixedBytes<32>,
    pub message: Message,
    /// At most one signature per attester, in arrival order
    pub signatures: Vec<AttesterSignature>,
    pub status: AttestationStatus,
    pub threshold: u32,
    pub attester_set_version: u64,
}

impl Attestation {
    pub fn new(message: Message, threshold: u32, attester_set_version: u64) -> Self {
        Self {
            message_hash: message.hash(),
            message,
            signatures: Vec::new(),
            status: AttestationStatus::Pending,
            threshold,
            attester_set_version,
        }
    }

    pub fn source_domain(&self) -> Domain {
        self.message.source_domain
    }

    pub fn destination_domain(&self) -> Domain {
        self.message.destination_domain
    }

    pub fn nonce(&self) -> u64 {
        self.message.nonce
    }

    pub fn has_signed(&self, attester: &Address) -> bool {
        self.signatures.iter().any(|s| &s.attester == attester)
    }

    pub fn signature_count(&self) -> u32 {
        self.signatures.len() as u32
    }

    /// A zero threshold means the destination was never configured and can
    /// never be met.
    pub fn is_quorum_met(&self) -> bool {
        self.threshold > 0 && self.signature_count() >= self.threshold
    }

    /// Signature bytes in the shape `receiveMessage` expects
    pub fn signature_bytes(&self) -> Vec<Bytes> {
        self.signatures.iter().map(|s| s.signature.clone()).collect()
    }
}

/// Result of offering one signature to a pending attestation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum SignatureOutcome {
    /// Counted toward the quorum
    #[serde(rename_all = "camelCase")]
    Accepted {
        attester: Address,
        signatures: u32,
        threshold: u32,
        status: AttestationStatus,
    },
    /// The attester had already signed this message
    Duplicate { attester: Address },
    /// Did not validate against the frozen attester set
    Rejected { reason: String },
    /// The attestation is no longer collecting signatures
    NotPending { status: AttestationStatus },
}

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Seconds since the service started
    pub uptime: u64,
}

/// Body of `GET /attestations/ready`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyAttestations {
    pub count: usize,
    pub attestations: Vec<Attestation>,
}

impl From<Vec<Attestation>> for ReadyAttestations {
    fn from(attestations: Vec<Attestation>) -> Self {
        Self {
            count: attestations.len(),
            attestations,
        }
    }
}

/// Body of `GET /stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    /// Attestation count per status name
    pub attestations: HashMap<String, u64>,
    pub total: u64,
    pub messages_observed: u64,
    pub signatures_accepted: u64,
    pub signatures_rejected: u64,
    pub attestations_relayed: u64,
    pub attestations_expired: u64,
    pub source_poll_failures: u64,
    /// Events skipped because they can never be attested
    #[serde(default)]
    pub messages_unobservable: u64,
    pub reconcile_failures: u64,
    pub last_error: Option<String>,
    pub uptime: u64,
}
