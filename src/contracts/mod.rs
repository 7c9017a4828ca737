//! Bridge contracts
//!
//! In-process implementations of the three contracts plus the asset ledger
//! they burn from and mint into. [`LocalChain`](crate::LocalChain) hosts them
//! behind a single transaction lock; [`abi`] carries the Solidity surface of
//! the deployed equivalents.
//!
//! ## Public API
//!
//! - [`AttesterRegistry`] with [`AttesterSet`] snapshots
//! - [`TokenMessenger`] with per-destination [`DestinationConfig`]
//! - [`MessageTransmitter`] with its [`NonceLedger`]
//! - [`Ledger`] balances

pub mod abi;
mod attester_registry;
mod ledger;
mod message_transmitter;
mod token_messenger;

pub use attester_registry::{AttesterRecord, AttesterRegistry, AttesterSet};
pub use ledger::Ledger;
pub use message_transmitter::{MessageTransmitter, NonceLedger};
pub use token_messenger::{DestinationConfig, TokenMessenger};
