use alloy_primitives::{Address, FixedBytes};
use thiserror::Error;

use crate::protocol::Domain;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Caller {caller} is not authorized for this operation")]
    Unauthorized { caller: Address },

    #[error("Invalid threshold {threshold} for domain {domain}: {reason}")]
    InvalidThreshold {
        domain: Domain,
        threshold: u32,
        reason: String,
    },

    #[error("Unknown domain: {0}")]
    UnknownDomain(Domain),

    #[error("Domain is disabled: {0}")]
    DomainDisabled(Domain),

    #[error("Transfer amount must be greater than zero")]
    ZeroAmount,

    #[error("Transfer amount {amount} exceeds per-transfer maximum {max}")]
    AmountExceedsMax { amount: String, max: String },

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: String, requested: String },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Message already processed: source domain {source_domain}, nonce {nonce}")]
    AlreadyProcessed { source_domain: Domain, nonce: u64 },

    #[error("Signature threshold not met: {valid} valid of {required} required")]
    ThresholdNotMet { valid: u32, required: u32 },

    #[error("Contract is paused")]
    Paused,

    #[error("Attester {attester} already registered for domain {domain}")]
    AttesterExists { domain: Domain, attester: Address },

    #[error("Attester {attester} not registered for domain {domain}")]
    AttesterNotFound { domain: Domain, attester: Address },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Attestation not found: {0}")]
    AttestationNotFound(FixedBytes<32>),

    #[error("Chain call timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Relay failed after {attempts} attempts: {reason}")]
    RelayFailed { attempts: u32, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Contract call failed: {0}")]
    ContractCall(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] alloy_json_rpc::RpcError<alloy_transport::TransportErrorKind>),

    #[error("ABI encoding/decoding error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hex conversion error: {0}")]
    Hex(#[from] alloy_primitives::hex::FromHexError),
}

impl BridgeError {
    /// Liveness failures that a caller should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Network(_)
                | Self::Provider(_)
                | Self::Rpc(_)
                | Self::ContractCall(_)
                | Self::Paused
        )
    }

    /// Short static name of the variant, used as the `error.type` span attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "Unauthorized",
            Self::InvalidThreshold { .. } => "InvalidThreshold",
            Self::UnknownDomain(_) => "UnknownDomain",
            Self::DomainDisabled(_) => "DomainDisabled",
            Self::ZeroAmount => "ZeroAmount",
            Self::AmountExceedsMax { .. } => "AmountExceedsMax",
            Self::InsufficientFunds { .. } => "InsufficientFunds",
            Self::MalformedMessage(_) => "MalformedMessage",
            Self::AlreadyProcessed { .. } => "AlreadyProcessed",
            Self::ThresholdNotMet { .. } => "ThresholdNotMet",
            Self::Paused => "Paused",
            Self::AttesterExists { .. } => "AttesterExists",
            Self::AttesterNotFound { .. } => "AttesterNotFound",
            Self::InvalidSignature(_) => "InvalidSignature",
            Self::AttestationNotFound(_) => "AttestationNotFound",
            Self::Timeout { .. } => "Timeout",
            Self::RelayFailed { .. } => "RelayFailed",
            Self::Network(_) => "Network",
            Self::Provider(_) => "Provider",
            Self::ContractCall(_) => "ContractCall",
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::InvalidUrl(_) => "InvalidUrl",
            Self::Storage(_) => "Storage",
            Self::Rpc(_) => "Rpc",
            Self::Abi(_) => "Abi",
            Self::Json(_) => "Json",
            Self::Hex(_) => "Hex",
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
