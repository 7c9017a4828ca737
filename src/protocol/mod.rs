//! Bridge protocol types
//!
//! Domain identifiers, the canonical message format, attester signatures and
//! the attestation records served by the attestation service.

mod attestation;
mod domain;
mod message;
mod signature;

pub use attestation::{
    Attestation, AttestationStatus, HealthResponse, ReadyAttestations, ServiceStats,
    SignatureOutcome,
};
pub use domain::Domain;
pub use message::{Message, MessageReceived, MessageSent, MAX_ADDRESS_LEN, MESSAGE_VERSION};
pub use signature::{recover_attester, verify_signature, AttesterSignature, SIGNATURE_LEN};
