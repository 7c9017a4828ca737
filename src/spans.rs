//! OpenTelemetry span helpers for bridge operations
//!
//! Span names are static (`attestation_bridge.*`) and carry structured
//! attributes only, so dashboards can group by operation regardless of the
//! message involved. Error fields start empty and are filled in by
//! [`record_error`] or [`record_error_with_context`].
//!
//! # Example
//!
//! ```rust
//! use attestation_bridge::{spans, Domain};
//! use alloy_primitives::FixedBytes;
//! use tracing::Instrument;
//!
//! # async fn example() {
//! let message_hash = FixedBytes::from([0u8; 32]);
//! let span = spans::relay_attestation(&message_hash, Domain::new(0), Domain::new(3), 1);
//! async {
//!     // submit the message here
//! }
//! .instrument(span)
//! .await;
//! # }
//! ```

use alloy_primitives::{hex, FixedBytes};
use tracing::Span;

use crate::protocol::Domain;

/// Span for one poll of a source chain's `MessageSent` events.
///
/// Parent: the service's source subscription loop
/// Children: RPC calls
#[inline]
pub fn poll_source(domain: Domain, cursor: u64) -> Span {
    tracing::debug_span!(
        "attestation_bridge.poll_source",
        domain = %domain,
        cursor = cursor,
        error.type = tracing::field::Empty,
        error.message = tracing::field::Empty,
        error.context = tracing::field::Empty,
        otel.status_code = "OK",
    )
}

/// Span for turning an observed `MessageSent` event into a pending attestation.
///
/// Parent: attestation_bridge.poll_source
/// Children: attester set lookup, local signing
#[inline]
pub fn observe_message(
    message_hash: &FixedBytes<32>,
    source_domain: Domain,
    destination_domain: Domain,
    nonce: u64,
) -> Span {
    tracing::info_span!(
        "attestation_bridge.observe_message",
        message_hash = %hex::encode(message_hash),
        source_domain = %source_domain,
        destination_domain = %destination_domain,
        nonce = nonce,
        error.type = tracing::field::Empty,
        error.message = tracing::field::Empty,
        error.context = tracing::field::Empty,
        otel.status_code = "OK",
    )
}

/// Span for accepting one attester signature.
///
/// Parent: HTTP request or local signing
/// Children: None
#[inline]
pub fn submit_signature(message_hash: &FixedBytes<32>) -> Span {
    tracing::debug_span!(
        "attestation_bridge.submit_signature",
        message_hash = %hex::encode(message_hash),
        attester = tracing::field::Empty,
    )
}

/// Span for one relay attempt of a ready attestation.
///
/// Parent: the relayer's poll cycle
/// Children: destination chain calls
#[inline]
pub fn relay_attestation(
    message_hash: &FixedBytes<32>,
    source_domain: Domain,
    destination_domain: Domain,
    attempt: u32,
) -> Span {
    tracing::info_span!(
        "attestation_bridge.relay_attestation",
        message_hash = %hex::encode(message_hash),
        source_domain = %source_domain,
        destination_domain = %destination_domain,
        attempt = attempt,
        error.type = tracing::field::Empty,
        error.message = tracing::field::Empty,
        error.context = tracing::field::Empty,
        otel.status_code = "OK",
    )
}

/// Span for one expiry and reconciliation sweep.
///
/// Parent: the service's maintenance loop
/// Children: destination `isMessageReceived` reads
#[inline]
pub fn reconcile(ready: usize) -> Span {
    tracing::debug_span!(
        "attestation_bridge.reconcile",
        ready = ready,
        error.type = tracing::field::Empty,
        error.message = tracing::field::Empty,
        otel.status_code = "OK",
    )
}

/// Record error attributes on the current span.
///
/// Follows OpenTelemetry semantic conventions for error tracking:
/// - error.type: The error variant
/// - error.message: Human-readable error message
///
/// # Example
///
/// ```rust
/// use attestation_bridge::{spans, BridgeError};
///
/// let span = tracing::info_span!("attestation_bridge.operation");
/// let _guard = span.enter();
/// spans::record_error(&BridgeError::Paused);
/// ```
pub fn record_error(error: &crate::BridgeError) {
    let current_span = Span::current();
    current_span.record("error.type", error.kind());
    current_span.record("error.message", error.to_string());
    current_span.record("otel.status_code", "ERROR");
}

/// Record error attributes with custom context on the current span.
pub fn record_error_with_context(
    error_type: &str,
    error_message: &str,
    additional_context: Option<&str>,
) {
    let current_span = Span::current();
    current_span.record("error.type", error_type);
    current_span.record("error.message", error_message);
    current_span.record("otel.status_code", "ERROR");

    if let Some(context) = additional_context {
        current_span.record("error.context", context);
    }
}
