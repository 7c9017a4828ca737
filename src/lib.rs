//! # attestation-bridge
//!
//! A quorum-attested burn-and-mint bridge between independent chains.
//!
//! A user burns funds on a source chain through the TokenMessenger, which
//! emits a `MessageSent` event carrying a per-domain nonce. The attestation
//! service observes the event and collects signatures from a quorum of
//! registered attesters. A relayer then submits the message and signatures
//! to the destination MessageTransmitter, which verifies the quorum, consumes
//! the nonce and mints the funds exactly once.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use attestation_bridge::relayer::Relayer;
//! use attestation_bridge::service::AttestationService;
//! use attestation_bridge::testing::AttesterKeys;
//! use attestation_bridge::{
//!     AttesterSetProvider, AttesterSigner, DestinationChain, DestinationConfig, Domain,
//!     LocalChain,
//! };
//! use alloy_primitives::{Address, U256};
//!
//! # async fn example() -> Result<(), attestation_bridge::BridgeError> {
//! let owner = Address::repeat_byte(0xee);
//! let (a, b) = (Domain::new(0), Domain::new(1));
//! let source = Arc::new(LocalChain::new(a, owner));
//! let destination = Arc::new(LocalChain::new(b, owner));
//! source.set_destination(owner, b, DestinationConfig::default()).await?;
//!
//! let keys = AttesterKeys::generate(3);
//! for identity in keys.identities() {
//!     destination.add_attester(owner, b, identity).await?;
//! }
//! destination.set_threshold(owner, b, 2).await?;
//!
//! let service = AttestationService::builder()
//!     .attester_sets(HashMap::from([(b, destination.clone() as Arc<dyn AttesterSetProvider>)]))
//!     .signers(vec![
//!         Arc::new(keys.signer(0)) as Arc<dyn AttesterSigner>,
//!         Arc::new(keys.signer(1)) as Arc<dyn AttesterSigner>,
//!     ])
//!     .build();
//!
//! let sender = Address::repeat_byte(1);
//! source.fund(sender.as_slice(), U256::from(100u64)).await?;
//! source.burn_and_send(sender, b, vec![2u8; 20], U256::from(100u64)).await?;
//! service.poll_source(source.as_ref()).await?;
//!
//! let relayer = Relayer::builder()
//!     .source(Arc::new(service.clone()))
//!     .destinations(HashMap::from([(b, destination.clone() as Arc<dyn DestinationChain>)]))
//!     .build();
//! relayer.relay_once().await?;
//!
//! assert_eq!(destination.balance_of(&[2u8; 20]).await, U256::from(100u64));
//! # Ok(())
//! # }
//! ```
//!
//! ## Public API
//!
//! - [`Domain`], [`Message`], [`Attestation`] - protocol types and the canonical message encoding
//! - [`DomainRegistry`] and [`DomainConfig`] - the set of chains the bridge connects
//! - [`AttesterRegistry`], [`TokenMessenger`], [`MessageTransmitter`] - contract semantics
//! - [`LocalChain`] - an in-process chain hosting the three contracts
//! - [`service::AttestationService`] - observation, aggregation and the HTTP API
//! - [`relayer::Relayer`] - idempotent submission to destination chains
//! - [`BridgeError`] and [`Result`] - Error types for error handling
//! - [`providers`] - Alloy RPC adapters, the HTTP client and the local signer

mod chain;
mod config;
mod contracts;
mod error;
mod protocol;
mod traits;

pub mod providers;
pub mod relayer;
pub mod service;
pub mod testing;

pub use chain::local::LocalChain;
pub use chain::{DomainConfig, DomainRegistry};
pub use config::{NodeConfig, RelayerConfig, ServiceConfig};
pub use contracts::abi::{IAttesterRegistry, IMessageTransmitter, ITokenMessenger};
pub use contracts::{
    AttesterRecord, AttesterRegistry, AttesterSet, DestinationConfig, Ledger, MessageTransmitter,
    NonceLedger, TokenMessenger,
};
pub use error::{BridgeError, Result};
pub use protocol::{
    recover_attester, verify_signature, Attestation, AttestationStatus, AttesterSignature,
    Domain, HealthResponse, Message, MessageReceived, MessageSent, ReadyAttestations,
    ServiceStats, SignatureOutcome, MAX_ADDRESS_LEN, MESSAGE_VERSION, SIGNATURE_LEN,
};
pub use traits::{
    AttestationSource, AttesterSetProvider, AttesterSigner, Clock, DestinationChain, SourceChain,
    SubmissionReceipt,
};

// Public module for advanced users who need custom instrumentation
pub mod spans;
