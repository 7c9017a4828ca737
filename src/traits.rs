//! Core trait abstractions for the bridge's off-chain processes.
//!
//! The attestation service and the relayer only ever see chains, attesters
//! and each other through these traits. Production implementations live in
//! [`crate::providers`] and [`crate::LocalChain`]; [`crate::testing`] has
//! fakes that can simulate failures, slow endpoints and concurrent relayers.
//!
//! # Example: Implementing a Test Fake
//!
//! ```rust,ignore
//! use attestation_bridge::{DestinationChain, Domain, Message, Result};
//!
//! struct AlwaysReceived;
//!
//! #[async_trait::async_trait]
//! impl DestinationChain for AlwaysReceived {
//!     fn domain(&self) -> Domain {
//!         Domain::new(1)
//!     }
//!
//!     async fn is_message_received(&self, _hash: FixedBytes<32>) -> Result<bool> {
//!         Ok(true)
//!     }
//!
//!     async fn receive_message(&self, message: &Message, _signatures: &[Bytes])
//!         -> Result<SubmissionReceipt> {
//!         unreachable!("already received")
//!     }
//! }
//! ```

use alloy_primitives::{Address, Bytes, FixedBytes, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::contracts::AttesterSet;
use crate::error::Result;
use crate::protocol::{Attestation, Domain, Message, MessageSent};

/// Read access to a source chain's `MessageSent` events.
///
/// # Test Scenarios
///
/// Implementing this trait with fakes enables testing:
/// - RPC failures while polling
/// - Events arriving in bursts
/// - The same event delivered twice
#[async_trait]
pub trait SourceChain: Send + Sync {
    /// Domain whose TokenMessenger this chain hosts
    fn domain(&self) -> Domain;

    /// Returns `MessageSent` events at or after `cursor` and the cursor to
    /// pass on the next call.
    ///
    /// Cursors are opaque to callers. Delivery is at-least-once: a caller
    /// that loses its cursor may see the same event again.
    async fn poll_message_sent(&self, cursor: u64) -> Result<(Vec<MessageSent>, u64)>;

    /// Cursor to poll from when no earlier position is known
    fn start_cursor(&self) -> u64 {
        0
    }
}

/// Where a receipt transaction landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub message_hash: FixedBytes<32>,
    /// Transaction hash, when the chain has one
    pub transaction: Option<TxHash>,
}

/// Read and write access to a destination chain's MessageTransmitter.
///
/// # Test Scenarios
///
/// Implementing this trait with fakes enables testing:
/// - Unresponsive endpoints (timeouts)
/// - Transient submission failures
/// - Concurrent submissions racing to `AlreadyProcessed`
#[async_trait]
pub trait DestinationChain: Send + Sync {
    /// Domain whose MessageTransmitter this chain hosts
    fn domain(&self) -> Domain;

    /// Pure read of the receipt bookkeeping.
    async fn is_message_received(&self, message_hash: FixedBytes<32>) -> Result<bool>;

    /// Submits `receiveMessage`.
    ///
    /// # Errors
    ///
    /// Contract rejections map onto [`BridgeError`](crate::BridgeError)
    /// variants; in particular a nonce consumed by someone else surfaces as
    /// `AlreadyProcessed`.
    async fn receive_message(
        &self,
        message: &Message,
        signatures: &[Bytes],
    ) -> Result<SubmissionReceipt>;
}

/// Source of the attester set and threshold for a destination domain.
///
/// The attestation service snapshots the result when it first observes a
/// message; later changes only apply to messages observed afterwards.
#[async_trait]
pub trait AttesterSetProvider: Send + Sync {
    async fn attester_set(&self, domain: Domain) -> Result<AttesterSet>;
}

/// The relayer's view of the attestation service.
#[async_trait]
pub trait AttestationSource: Send + Sync {
    /// Attestations that reached their quorum and are not known to be relayed
    async fn ready_attestations(&self) -> Result<Vec<Attestation>>;
}

/// An attester signing capability.
///
/// Key storage is up to the implementation; the bridge only needs the
/// identity and a signature over the 32-byte message hash.
#[async_trait]
pub trait AttesterSigner: Send + Sync {
    fn identity(&self) -> Address;

    /// Produces a 65-byte `r || s || v` signature over `message_hash`
    async fn sign(&self, message_hash: FixedBytes<32>) -> Result<Bytes>;
}

/// Trait for time-based operations.
///
/// This trait abstracts sleep and time queries, enabling fast-forward testing
/// where tests can instantly advance through polling loops, backoff and
/// expiry windows without actually waiting.
///
/// # Test Scenarios
///
/// Implementing this trait with fakes enables testing:
/// - Attestation expiry without waiting
/// - Relayer backoff schedules
/// - Polling interval correctness
#[async_trait]
pub trait Clock: Send + Sync {
    /// Asynchronously sleeps for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Returns the current instant in time.
    fn now(&self) -> Instant;
}
