//! Destination-chain receipt contract
//!
//! Verifies attester signatures against the [`AttesterRegistry`], consumes the
//! `(source domain, nonce)` pair and mints. `receive_message` takes `&mut self`,
//! so the replay check, the ledger write and the mint cannot interleave with
//! another receipt for the same nonce.

use std::collections::HashSet;

use alloy_primitives::{Address, Bytes, FixedBytes};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{AttesterRegistry, Ledger};
use crate::error::{BridgeError, Result};
use crate::protocol::{recover_attester, Domain, Message, MessageReceived};

/// Consumed `(source domain, nonce)` pairs; append-only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceLedger {
    used: HashSet<(Domain, u64)>,
}

impl NonceLedger {
    pub fn is_used(&self, source_domain: Domain, nonce: u64) -> bool {
        self.used.contains(&(source_domain, nonce))
    }

    /// Returns false if the pair was already consumed
    fn consume(&mut self, source_domain: Domain, nonce: u64) -> bool {
        self.used.insert((source_domain, nonce))
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MessageTransmitter {
    local_domain: Domain,
    owner: Address,
    paused: bool,
    registry: AttesterRegistry,
    nonces: NonceLedger,
    received: HashSet<FixedBytes<32>>,
    events: Vec<MessageReceived>,
}

impl MessageTransmitter {
    /// The registry owner also owns the transmitter
    pub fn new(local_domain: Domain, registry: AttesterRegistry) -> Self {
        Self {
            local_domain,
            owner: registry.owner(),
            paused: false,
            registry,
            nonces: NonceLedger::default(),
            received: HashSet::new(),
            events: Vec::new(),
        }
    }

    pub fn local_domain(&self) -> Domain {
        self.local_domain
    }

    pub fn registry(&self) -> &AttesterRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AttesterRegistry {
        &mut self.registry
    }

    pub fn nonce_ledger(&self) -> &NonceLedger {
        &self.nonces
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, caller: Address, paused: bool) -> Result<()> {
        if caller != self.owner {
            return Err(BridgeError::Unauthorized { caller });
        }
        self.paused = paused;
        info!(
            domain = %self.local_domain,
            paused = paused,
            event = "message_transmitter_pause_changed"
        );
        Ok(())
    }

    /// Pure read used by off-chain reconciliation
    pub fn is_message_received(&self, message_hash: FixedBytes<32>) -> bool {
        self.received.contains(&message_hash)
    }

    /// All `MessageReceived` events in order
    pub fn events(&self) -> &[MessageReceived] {
        &self.events
    }

    /// Verifies and applies one attested message.
    ///
    /// Signatures that are malformed, recover to a non-attester or repeat an
    /// already counted attester are skipped. Nothing is written unless the
    /// remaining distinct signers reach the destination domain's threshold.
    pub fn receive_message(
        &mut self,
        ledger: &mut Ledger,
        message_bytes: &[u8],
        signatures: &[Bytes],
    ) -> Result<MessageReceived> {
        if self.paused {
            return Err(BridgeError::Paused);
        }

        let message = Message::decode(message_bytes)?;
        message.validate()?;
        if message.destination_domain != self.local_domain {
            return Err(BridgeError::MalformedMessage(format!(
                "message targets domain {}, this is domain {}",
                message.destination_domain, self.local_domain
            )));
        }
        let message_hash = message.hash();

        if self.nonces.is_used(message.source_domain, message.nonce) {
            debug!(
                message_hash = %message_hash,
                source_domain = %message.source_domain,
                nonce = message.nonce,
                event = "message_already_processed"
            );
            return Err(BridgeError::AlreadyProcessed {
                source_domain: message.source_domain,
                nonce: message.nonce,
            });
        }

        let signers = self.valid_signers(&message, message_hash, signatures);
        let threshold = self.registry.get_threshold(message.destination_domain);
        if threshold == 0 {
            return Err(BridgeError::InvalidThreshold {
                domain: message.destination_domain,
                threshold,
                reason: "no threshold configured".to_string(),
            });
        }
        let valid = signers.len() as u32;
        if valid < threshold {
            warn!(
                message_hash = %message_hash,
                valid = valid,
                required = threshold,
                event = "threshold_not_met"
            );
            return Err(BridgeError::ThresholdNotMet {
                valid,
                required: threshold,
            });
        }

        ledger.mint(&message.recipient, message.amount)?;
        self.nonces.consume(message.source_domain, message.nonce);
        self.received.insert(message_hash);
        self.registry
            .record_signed(message.destination_domain, &signers);

        let received = MessageReceived {
            message_hash,
            source_domain: message.source_domain,
            nonce: message.nonce,
            recipient: message.recipient,
            amount: message.amount,
        };
        self.events.push(received.clone());

        info!(
            message_hash = %message_hash,
            source_domain = %received.source_domain,
            nonce = received.nonce,
            amount = %received.amount,
            signers = valid,
            event = "message_received"
        );

        Ok(received)
    }

    /// Distinct active attesters among the recoverable signatures
    fn valid_signers(
        &self,
        message: &Message,
        message_hash: FixedBytes<32>,
        signatures: &[Bytes],
    ) -> Vec<Address> {
        let mut seen = HashSet::new();
        let mut signers = Vec::new();
        for signature in signatures {
            let identity = match recover_attester(message_hash, signature) {
                Ok(identity) => identity,
                Err(e) => {
                    debug!(message_hash = %message_hash, error = %e, event = "signature_discarded");
                    continue;
                }
            };
            if !self
                .registry
                .is_attester(message.destination_domain, &identity)
            {
                debug!(
                    message_hash = %message_hash,
                    signer = %identity,
                    event = "non_attester_signature_discarded"
                );
                continue;
            }
            if seen.insert(identity) {
                signers.push(identity);
            }
        }
        signers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::AttesterKeys;
    use alloy_primitives::U256;

    const SOURCE: Domain = Domain::new(0);
    const LOCAL: Domain = Domain::new(1);

    fn owner() -> Address {
        Address::repeat_byte(0xee)
    }

    fn setup(keys: &AttesterKeys, threshold: u32) -> MessageTransmitter {
        let mut registry = AttesterRegistry::new(owner());
        for identity in keys.identities() {
            registry.add_attester(owner(), LOCAL, identity).unwrap();
        }
        registry.set_threshold(owner(), LOCAL, threshold).unwrap();
        MessageTransmitter::new(LOCAL, registry)
    }

    fn message(nonce: u64) -> Message {
        Message::new(
            SOURCE,
            LOCAL,
            nonce,
            vec![0x01; 20],
            vec![0x02; 20],
            U256::from(100u64),
        )
    }

    #[test]
    fn test_threshold_met_mints_once() {
        let keys = AttesterKeys::generate(5);
        let mut transmitter = setup(&keys, 3);
        let mut ledger = Ledger::new();
        let message = message(0);
        let signatures = keys.sign(message.hash(), &[0, 1, 2]);

        let received = transmitter
            .receive_message(&mut ledger, &message.encode(), &signatures)
            .unwrap();
        assert_eq!(received.message_hash, message.hash());
        assert_eq!(ledger.balance_of(&message.recipient), U256::from(100u64));
        assert!(transmitter.is_message_received(message.hash()));

        let err = transmitter
            .receive_message(&mut ledger, &message.encode(), &signatures)
            .unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyProcessed { nonce: 0, .. }));
        assert_eq!(ledger.balance_of(&message.recipient), U256::from(100u64));
        assert_eq!(transmitter.events().len(), 1);
    }

    #[test]
    fn test_duplicate_signatures_count_once() {
        let keys = AttesterKeys::generate(5);
        let mut transmitter = setup(&keys, 3);
        let mut ledger = Ledger::new();
        let message = message(0);
        let signatures = keys.sign(message.hash(), &[0, 0, 1]);

        let err = transmitter
            .receive_message(&mut ledger, &message.encode(), &signatures)
            .unwrap_err();
        assert!(matches!(err, BridgeError::ThresholdNotMet { valid: 2, required: 3 }));
        assert!(transmitter.nonce_ledger().is_empty());
        assert_eq!(ledger.total_supply(), U256::ZERO);
    }

    #[test]
    fn test_non_attester_and_garbage_signatures_are_discarded() {
        let keys = AttesterKeys::generate(3);
        let outsiders = AttesterKeys::generate(2);
        let mut transmitter = setup(&keys, 2);
        let mut ledger = Ledger::new();
        let message = message(4);

        let mut signatures = keys.sign(message.hash(), &[0]);
        signatures.extend(outsiders.sign(message.hash(), &[0, 1]));
        signatures.push(Bytes::from(vec![0u8; 65]));
        signatures.push(Bytes::from(vec![1u8; 10]));

        let err = transmitter
            .receive_message(&mut ledger, &message.encode(), &signatures)
            .unwrap_err();
        assert!(matches!(err, BridgeError::ThresholdNotMet { valid: 1, .. }));

        signatures.extend(keys.sign(message.hash(), &[2]));
        transmitter
            .receive_message(&mut ledger, &message.encode(), &signatures)
            .unwrap();
        let record = transmitter
            .registry()
            .attester(LOCAL, &keys.identity(2))
            .unwrap();
        assert_eq!(record.messages_signed, 1);
        let record = transmitter
            .registry()
            .attester(LOCAL, &keys.identity(1))
            .unwrap();
        assert_eq!(record.messages_signed, 0);
    }

    #[test]
    fn test_signatures_for_other_domain_do_not_count() {
        let keys = AttesterKeys::generate(2);
        let mut registry = AttesterRegistry::new(owner());
        registry.add_attester(owner(), LOCAL, keys.identity(0)).unwrap();
        registry
            .add_attester(owner(), Domain::new(7), keys.identity(1))
            .unwrap();
        registry.set_threshold(owner(), LOCAL, 1).unwrap();
        let mut transmitter = MessageTransmitter::new(LOCAL, registry);
        let mut ledger = Ledger::new();
        let message = message(0);

        let err = transmitter
            .receive_message(&mut ledger, &message.encode(), &keys.sign(message.hash(), &[1]))
            .unwrap_err();
        assert!(matches!(err, BridgeError::ThresholdNotMet { valid: 0, required: 1 }));
    }

    #[test]
    fn test_malformed_and_misrouted_messages() {
        let keys = AttesterKeys::generate(1);
        let mut transmitter = setup(&keys, 1);
        let mut ledger = Ledger::new();

        let err = transmitter
            .receive_message(&mut ledger, &[0u8; 12], &[])
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedMessage(_)));

        let mut misrouted = message(0);
        misrouted.destination_domain = Domain::new(9);
        let err = transmitter
            .receive_message(
                &mut ledger,
                &misrouted.encode(),
                &keys.sign(misrouted.hash(), &[0]),
            )
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedMessage(_)));
        assert!(transmitter.nonce_ledger().is_empty());
    }

    #[test]
    fn test_paused_rejects_without_effect() {
        let keys = AttesterKeys::generate(1);
        let mut transmitter = setup(&keys, 1);
        let mut ledger = Ledger::new();
        let message = message(0);
        transmitter.set_paused(owner(), true).unwrap();

        let err = transmitter
            .receive_message(&mut ledger, &message.encode(), &keys.sign(message.hash(), &[0]))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Paused));
        assert!(!transmitter.is_message_received(message.hash()));
    }
}
