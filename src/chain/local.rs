//! In-process chain hosting the bridge contracts.
//!
//! One [`LocalChain`] is one domain. All contract calls go through a single
//! async lock, which plays the role of the chain's transaction ordering: two
//! calls never observe each other half-applied. Wrap it in an `Arc` and hand
//! it to the attestation service and relayers as a [`SourceChain`],
//! [`DestinationChain`] or [`AttesterSetProvider`].

use alloy_primitives::{Address, Bytes, FixedBytes, U256};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::contracts::{
    AttesterRecord, AttesterRegistry, AttesterSet, DestinationConfig, Ledger, MessageTransmitter,
    TokenMessenger,
};
use crate::error::{BridgeError, Result};
use crate::protocol::{Domain, Message, MessageReceived, MessageSent};
use crate::traits::{AttesterSetProvider, DestinationChain, SourceChain, SubmissionReceipt};

struct LocalState {
    ledger: Ledger,
    token_messenger: TokenMessenger,
    message_transmitter: MessageTransmitter,
}

/// A single-domain chain with a TokenMessenger, a MessageTransmitter and an
/// AttesterRegistry, all owned by `owner`.
pub struct LocalChain {
    domain: Domain,
    state: Mutex<LocalState>,
}

impl std::fmt::Debug for LocalChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChain")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl LocalChain {
    pub fn new(domain: Domain, owner: Address) -> Self {
        Self {
            domain,
            state: Mutex::new(LocalState {
                ledger: Ledger::new(),
                token_messenger: TokenMessenger::new(domain, owner),
                message_transmitter: MessageTransmitter::new(domain, AttesterRegistry::new(owner)),
            }),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Credits `account` out of thin air; the local chain's faucet
    pub async fn fund(&self, account: &[u8], amount: U256) -> Result<()> {
        self.state.lock().await.ledger.mint(account, amount)
    }

    pub async fn balance_of(&self, account: &[u8]) -> U256 {
        self.state.lock().await.ledger.balance_of(account)
    }

    pub async fn total_supply(&self) -> U256 {
        self.state.lock().await.ledger.total_supply()
    }

    // TokenMessenger

    pub async fn burn_and_send(
        &self,
        sender: Address,
        destination: Domain,
        recipient: impl Into<Bytes>,
        amount: U256,
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        let LocalState {
            ledger,
            token_messenger,
            ..
        } = &mut *state;
        token_messenger.burn_and_send(ledger, sender, destination, recipient.into(), amount)
    }

    pub async fn set_destination(
        &self,
        caller: Address,
        destination: Domain,
        config: DestinationConfig,
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .token_messenger
            .set_destination(caller, destination, config)
    }

    pub async fn set_token_messenger_paused(&self, caller: Address, paused: bool) -> Result<()> {
        self.state
            .lock()
            .await
            .token_messenger
            .set_paused(caller, paused)
    }

    pub async fn next_nonce(&self) -> u64 {
        self.state.lock().await.token_messenger.next_nonce()
    }

    pub async fn message_by_nonce(&self, nonce: u64) -> Option<MessageSent> {
        self.state
            .lock()
            .await
            .token_messenger
            .message_by_nonce(nonce)
            .cloned()
    }

    // MessageTransmitter

    /// Raw `receiveMessage` over encoded bytes
    pub async fn receive_message_bytes(
        &self,
        message: &[u8],
        signatures: &[Bytes],
    ) -> Result<MessageReceived> {
        let mut state = self.state.lock().await;
        let LocalState {
            ledger,
            message_transmitter,
            ..
        } = &mut *state;
        message_transmitter.receive_message(ledger, message, signatures)
    }

    pub async fn set_message_transmitter_paused(&self, caller: Address, paused: bool) -> Result<()> {
        self.state
            .lock()
            .await
            .message_transmitter
            .set_paused(caller, paused)
    }

    pub async fn received_events(&self) -> Vec<MessageReceived> {
        self.state.lock().await.message_transmitter.events().to_vec()
    }

    pub async fn is_nonce_used(&self, source_domain: Domain, nonce: u64) -> bool {
        self.state
            .lock()
            .await
            .message_transmitter
            .nonce_ledger()
            .is_used(source_domain, nonce)
    }

    // AttesterRegistry

    pub async fn add_attester(&self, caller: Address, domain: Domain, identity: Address) -> Result<()> {
        self.state
            .lock()
            .await
            .message_transmitter
            .registry_mut()
            .add_attester(caller, domain, identity)
    }

    pub async fn remove_attester(
        &self,
        caller: Address,
        domain: Domain,
        identity: Address,
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .message_transmitter
            .registry_mut()
            .remove_attester(caller, domain, identity)
    }

    pub async fn set_attester_active(
        &self,
        caller: Address,
        domain: Domain,
        identity: Address,
        active: bool,
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .message_transmitter
            .registry_mut()
            .set_attester_active(caller, domain, identity, active)
    }

    pub async fn set_threshold(&self, caller: Address, domain: Domain, threshold: u32) -> Result<()> {
        self.state
            .lock()
            .await
            .message_transmitter
            .registry_mut()
            .set_threshold(caller, domain, threshold)
    }

    pub async fn is_attester(&self, domain: Domain, identity: Address) -> bool {
        self.state
            .lock()
            .await
            .message_transmitter
            .registry()
            .is_attester(domain, &identity)
    }

    pub async fn get_threshold(&self, domain: Domain) -> u32 {
        self.state
            .lock()
            .await
            .message_transmitter
            .registry()
            .get_threshold(domain)
    }

    pub async fn attester_record(&self, domain: Domain, identity: Address) -> Option<AttesterRecord> {
        self.state
            .lock()
            .await
            .message_transmitter
            .registry()
            .attester(domain, &identity)
            .cloned()
    }
}

#[async_trait]
impl SourceChain for LocalChain {
    fn domain(&self) -> Domain {
        self.domain
    }

    #[instrument(skip(self), fields(domain = %self.domain))]
    async fn poll_message_sent(&self, cursor: u64) -> Result<(Vec<MessageSent>, u64)> {
        let (events, next) = self.state.lock().await.token_messenger.messages_since(cursor);
        debug!(count = events.len(), next_cursor = next, "Polled MessageSent events");
        Ok((events, next))
    }
}

#[async_trait]
impl DestinationChain for LocalChain {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn is_message_received(&self, message_hash: FixedBytes<32>) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .message_transmitter
            .is_message_received(message_hash))
    }

    #[instrument(skip(self, message, signatures), fields(domain = %self.domain, nonce = message.nonce))]
    async fn receive_message(
        &self,
        message: &Message,
        signatures: &[Bytes],
    ) -> Result<SubmissionReceipt> {
        let received = self
            .receive_message_bytes(&message.encode(), signatures)
            .await?;
        Ok(SubmissionReceipt {
            message_hash: received.message_hash,
            transaction: None,
        })
    }
}

#[async_trait]
impl AttesterSetProvider for LocalChain {
    async fn attester_set(&self, domain: Domain) -> Result<AttesterSet> {
        if domain != self.domain {
            return Err(BridgeError::UnknownDomain(domain));
        }
        Ok(self
            .state
            .lock()
            .await
            .message_transmitter
            .registry()
            .attester_set(domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::AttesterKeys;
    use std::sync::Arc;

    const A: Domain = Domain::new(0);
    const B: Domain = Domain::new(1);

    fn owner() -> Address {
        Address::repeat_byte(0xee)
    }

    #[tokio::test]
    async fn test_concurrent_burns_get_distinct_sequential_nonces() {
        let chain = Arc::new(LocalChain::new(A, owner()));
        chain
            .set_destination(owner(), B, DestinationConfig::default())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let chain = chain.clone();
            let sender = Address::repeat_byte(i + 1);
            chain.fund(sender.as_slice(), U256::from(10u64)).await.unwrap();
            handles.push(tokio::spawn(async move {
                chain
                    .burn_and_send(sender, B, vec![0xcc; 20], U256::from(1u64))
                    .await
                    .unwrap()
            }));
        }

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap());
        }
        nonces.sort_unstable();
        assert_eq!(nonces, (0..16).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_receive_through_trait() {
        let keys = AttesterKeys::generate(2);
        let chain = LocalChain::new(B, owner());
        for identity in keys.identities() {
            chain.add_attester(owner(), B, identity).await.unwrap();
        }
        chain.set_threshold(owner(), B, 2).await.unwrap();

        let message = Message::new(A, B, 0, vec![1u8; 20], vec![2u8; 20], U256::from(9u64));
        let receipt = DestinationChain::receive_message(
            &chain,
            &message,
            &keys.sign(message.hash(), &[0, 1]),
        )
        .await
        .unwrap();
        assert_eq!(receipt.message_hash, message.hash());
        assert!(chain.is_message_received(message.hash()).await.unwrap());
        assert!(chain.is_nonce_used(A, 0).await);
        assert_eq!(chain.balance_of(&[2u8; 20]).await, U256::from(9u64));
    }

    #[tokio::test]
    async fn test_attester_set_snapshot() {
        let keys = AttesterKeys::generate(3);
        let chain = LocalChain::new(B, owner());
        for identity in keys.identities() {
            chain.add_attester(owner(), B, identity).await.unwrap();
        }
        chain.set_threshold(owner(), B, 2).await.unwrap();

        let set = chain.attester_set(B).await.unwrap();
        assert_eq!(set.attesters, keys.identities());
        assert_eq!(set.threshold, 2);
        assert!(chain.attester_set(A).await.is_err());
    }
}
