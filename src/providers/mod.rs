//! Production implementations of the bridge trait abstractions.
//!
//! This module provides the "real" implementations of the traits defined in
//! [`crate::traits`]: adapters for deployed contracts over Alloy, an HTTP
//! client for the attestation service, a local-key attester signer and the
//! system clock.
//!
//! Tests typically use [`crate::LocalChain`] and the fakes in
//! [`crate::testing`] instead.

mod alloy;
mod http;
mod signer;
mod tokio_clock;

pub use self::alloy::{
    connect, AlloyAttesterRegistry, AlloyDestinationChain, AlloySourceChain,
    DEFAULT_MAX_BLOCK_RANGE,
};
pub use self::http::HttpAttestationClient;
pub use self::signer::LocalKeySigner;
pub use self::tokio_clock::TokioClock;
