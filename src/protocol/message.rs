//! Canonical bridge message format
//!
//! One [`Message`] is one transfer intent. Its byte encoding is the only input
//! to [`Message::hash`], and that hash identifies the transfer everywhere in the
//! pipeline: in the attestation store, in signatures and in the destination
//! chain's receipt bookkeeping.

use alloy_primitives::{keccak256, Bytes, FixedBytes, U256};
use serde::{Deserialize, Serialize};

use super::Domain;
use crate::error::{BridgeError, Result};

/// Current canonical message format version
pub const MESSAGE_VERSION: u32 = 1;

/// Largest accepted sender or recipient address, in bytes
pub const MAX_ADDRESS_LEN: usize = 64;

/// Canonical cross-chain transfer message
///
/// # Format
///
/// All integers are big-endian.
///
/// - version: uint32 (4 bytes)
/// - sourceDomain: uint32 (4 bytes)
/// - destinationDomain: uint32 (4 bytes)
/// - nonce: uint64 (8 bytes)
/// - senderLength: uint32 (4 bytes), followed by the sender bytes
/// - recipientLength: uint32 (4 bytes), followed by the recipient bytes
/// - amount: uint256 (32 bytes)
///
/// Fixed overhead: 4 + 4 + 4 + 8 + 4 + 4 + 32 = 60 bytes plus both addresses.
/// Length prefixes keep the encoding injective for variable-length addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub source_domain: Domain,
    pub destination_domain: Domain,
    pub nonce: u64,
    /// Sender address in source-chain format
    pub sender: Bytes,
    /// Recipient address in destination-chain format
    pub recipient: Bytes,
    /// Amount in the asset's smallest unit
    pub amount: U256,
}

impl Message {
    /// Size of the encoding without the two address payloads
    pub const FIXED_SIZE: usize = 60;

    pub fn new(
        source_domain: Domain,
        destination_domain: Domain,
        nonce: u64,
        sender: impl Into<Bytes>,
        recipient: impl Into<Bytes>,
        amount: U256,
    ) -> Self {
        Self {
            source_domain,
            destination_domain,
            nonce,
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
        }
    }

    /// Encodes the message into its canonical byte form
    pub fn encode(&self) -> Bytes {
        let mut bytes =
            Vec::with_capacity(Self::FIXED_SIZE + self.sender.len() + self.recipient.len());

        bytes.extend_from_slice(&MESSAGE_VERSION.to_be_bytes());
        bytes.extend_from_slice(&self.source_domain.as_u32().to_be_bytes());
        bytes.extend_from_slice(&self.destination_domain.as_u32().to_be_bytes());
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        bytes.extend_from_slice(&(self.sender.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.sender);
        bytes.extend_from_slice(&(self.recipient.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.recipient);
        bytes.extend_from_slice(&self.amount.to_be_bytes::<32>());

        Bytes::from(bytes)
    }

    /// Decodes a message from its canonical byte form
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MalformedMessage`] if the input is truncated, has
    /// trailing bytes, carries an unknown version, or an address length is
    /// zero or above [`MAX_ADDRESS_LEN`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let version = reader.u32()?;
        if version != MESSAGE_VERSION {
            return Err(BridgeError::MalformedMessage(format!(
                "unsupported version {version}"
            )));
        }

        let source_domain = Domain::new(reader.u32()?);
        let destination_domain = Domain::new(reader.u32()?);
        let nonce = reader.u64()?;
        let sender = reader.address("sender")?;
        let recipient = reader.address("recipient")?;
        let amount = U256::from_be_slice(reader.take(32)?);

        if !reader.is_empty() {
            return Err(BridgeError::MalformedMessage(format!(
                "{} trailing bytes",
                reader.remaining()
            )));
        }

        Ok(Self {
            source_domain,
            destination_domain,
            nonce,
            sender,
            recipient,
            amount,
        })
    }

    /// keccak-256 of the canonical encoding
    pub fn hash(&self) -> FixedBytes<32> {
        keccak256(self.encode())
    }

    /// Checks the invariants every emitted or received message must satisfy
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("sender", &self.sender), ("recipient", &self.recipient)] {
            if value.is_empty() || value.len() > MAX_ADDRESS_LEN {
                return Err(BridgeError::MalformedMessage(format!(
                    "{field} length {} outside 1..={MAX_ADDRESS_LEN}",
                    value.len()
                )));
            }
        }
        Ok(())
    }
}

/// `MessageSent` event emitted by the source chain's TokenMessenger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSent {
    pub message: Message,
    /// Position of the event in the source chain, used as a polling cursor
    pub block_number: u64,
}

/// `MessageReceived` event emitted by the destination chain's MessageTransmitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceived {
    pub message_hash: FixedBytes<32>,
    pub source_domain: Domain,
    pub nonce: u64,
    pub recipient: Bytes,
    pub amount: U256,
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                BridgeError::MalformedMessage(format!(
                    "truncated: need {len} bytes at offset {}, have {}",
                    self.offset,
                    self.bytes.len()
                ))
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let slice = self.take(4)?;
        Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn address(&mut self, field: &str) -> Result<Bytes> {
        let len = self.u32()? as usize;
        if len == 0 || len > MAX_ADDRESS_LEN {
            return Err(BridgeError::MalformedMessage(format!(
                "{field} length {len} outside 1..={MAX_ADDRESS_LEN}"
            )));
        }
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
