//! Alloy-based adapters for deployed bridge contracts.

use alloy_network::{Ethereum, EthereumWallet};
use alloy_primitives::{Address, Bytes, FixedBytes};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::Filter;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use tracing::{debug, instrument, trace};

use crate::chain::DomainConfig;
use crate::contracts::abi::{IAttesterRegistry, IMessageTransmitter, ITokenMessenger};
use crate::contracts::AttesterSet;
use crate::error::{BridgeError, Result};
use crate::protocol::{Domain, Message, MessageSent};
use crate::traits::{AttesterSetProvider, DestinationChain, SourceChain, SubmissionReceipt};

/// Largest block span requested in one `eth_getLogs` call
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 2_000;

/// Connects to the RPC endpoint of `config`.
///
/// Pass a `wallet` when the provider must send transactions (relayers).
pub fn connect(config: &DomainConfig, wallet: Option<PrivateKeySigner>) -> Result<DynProvider> {
    let url = config.require_rpc_url()?.clone();
    let provider = match wallet {
        Some(signer) => ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased(),
        None => ProviderBuilder::new().connect_http(url).erased(),
    };
    debug!(
        domain = %config.domain,
        name = %config.name,
        event = "rpc_provider_connected"
    );
    Ok(provider)
}

/// Reads `MessageSent` logs from a deployed TokenMessenger.
///
/// Cursors are block numbers: a poll scans `cursor..=head - confirmations`,
/// capped at `max_block_range` blocks, and returns the block after the last
/// one scanned.
#[derive(Debug, Clone)]
pub struct AlloySourceChain<P> {
    domain: Domain,
    provider: P,
    token_messenger: Address,
    confirmations: u64,
    start_block: u64,
    max_block_range: u64,
}

impl<P> AlloySourceChain<P>
where
    P: Provider<Ethereum> + Clone,
{
    pub fn new(provider: P, config: &DomainConfig) -> Self {
        Self {
            domain: config.domain,
            provider,
            token_messenger: config.token_messenger,
            confirmations: config.confirmations,
            start_block: config.start_block,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
        }
    }

    pub fn with_max_block_range(mut self, blocks: u64) -> Self {
        self.max_block_range = blocks.max(1);
        self
    }

    /// Returns a reference to the underlying Alloy provider.
    pub fn inner(&self) -> &P {
        &self.provider
    }
}

#[async_trait]
impl<P> SourceChain for AlloySourceChain<P>
where
    P: Provider<Ethereum> + Clone + Send + Sync,
{
    fn domain(&self) -> Domain {
        self.domain
    }

    #[instrument(skip(self), fields(domain = %self.domain))]
    async fn poll_message_sent(&self, cursor: u64) -> Result<(Vec<MessageSent>, u64)> {
        let head = self.provider.get_block_number().await?;
        let Some(safe_head) = head.checked_sub(self.confirmations) else {
            return Ok((Vec::new(), cursor));
        };
        if cursor > safe_head {
            trace!(head = head, "No new confirmed blocks");
            return Ok((Vec::new(), cursor));
        }
        let to = safe_head.min(cursor.saturating_add(self.max_block_range - 1));

        let filter = Filter::new()
            .address(self.token_messenger)
            .event_signature(ITokenMessenger::MessageSent::SIGNATURE_HASH)
            .from_block(cursor)
            .to_block(to);
        let logs = self.provider.get_logs(&filter).await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let decoded = log.log_decode::<ITokenMessenger::MessageSent>()?;
            let event = decoded.inner.data;
            events.push(MessageSent {
                message: Message::new(
                    self.domain,
                    Domain::new(event.destinationDomain),
                    event.nonce,
                    event.sender,
                    event.recipient,
                    event.amount,
                ),
                block_number: log.block_number.unwrap_or(to),
            });
        }

        debug!(
            from_block = cursor,
            to_block = to,
            count = events.len(),
            "Scanned MessageSent logs"
        );
        Ok((events, to + 1))
    }

    fn start_cursor(&self) -> u64 {
        self.start_block
    }
}

/// Calls a deployed MessageTransmitter.
#[derive(Debug, Clone)]
pub struct AlloyDestinationChain<P> {
    domain: Domain,
    provider: P,
    message_transmitter: Address,
}

impl<P> AlloyDestinationChain<P>
where
    P: Provider<Ethereum> + Clone,
{
    pub fn new(provider: P, config: &DomainConfig) -> Self {
        Self {
            domain: config.domain,
            provider,
            message_transmitter: config.message_transmitter,
        }
    }
}

/// Maps a MessageTransmitter revert onto the matching bridge error
fn transmitter_error(err: alloy_contract::Error) -> BridgeError {
    if let Some(e) = err.as_decoded_error::<IMessageTransmitter::AlreadyProcessed>() {
        return BridgeError::AlreadyProcessed {
            source_domain: Domain::new(e.sourceDomain),
            nonce: e.nonce,
        };
    }
    if let Some(e) = err.as_decoded_error::<IMessageTransmitter::ThresholdNotMet>() {
        return BridgeError::ThresholdNotMet {
            valid: e.valid,
            required: e.required,
        };
    }
    if err
        .as_decoded_error::<IMessageTransmitter::MalformedMessage>()
        .is_some()
    {
        return BridgeError::MalformedMessage("rejected by destination contract".to_string());
    }
    if err.as_decoded_error::<IMessageTransmitter::Paused>().is_some() {
        return BridgeError::Paused;
    }
    contract_error(err)
}

fn contract_error(err: alloy_contract::Error) -> BridgeError {
    match err {
        alloy_contract::Error::TransportError(e) => BridgeError::Rpc(e),
        other => BridgeError::ContractCall(other.to_string()),
    }
}

#[async_trait]
impl<P> DestinationChain for AlloyDestinationChain<P>
where
    P: Provider<Ethereum> + Clone + Send + Sync,
{
    fn domain(&self) -> Domain {
        self.domain
    }

    #[instrument(skip(self), fields(domain = %self.domain))]
    async fn is_message_received(&self, message_hash: FixedBytes<32>) -> Result<bool> {
        let contract = IMessageTransmitter::new(self.message_transmitter, self.provider.clone());
        contract
            .isMessageReceived(message_hash)
            .call()
            .await
            .map_err(contract_error)
    }

    #[instrument(skip(self, message, signatures), fields(domain = %self.domain, nonce = message.nonce))]
    async fn receive_message(
        &self,
        message: &Message,
        signatures: &[Bytes],
    ) -> Result<SubmissionReceipt> {
        let contract = IMessageTransmitter::new(self.message_transmitter, self.provider.clone());
        let pending = contract
            .receiveMessage(message.encode(), signatures.to_vec())
            .send()
            .await
            .map_err(transmitter_error)?;

        let tx_hash = *pending.tx_hash();
        trace!(tx_hash = %tx_hash, "receiveMessage submitted");

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| BridgeError::Provider(e.to_string()))?;
        if !receipt.status() {
            return Err(BridgeError::ContractCall(format!(
                "receiveMessage reverted in {tx_hash}"
            )));
        }

        debug!(tx_hash = %tx_hash, "receiveMessage confirmed");
        Ok(SubmissionReceipt {
            message_hash: message.hash(),
            transaction: Some(tx_hash),
        })
    }
}

/// Reads attester sets from a deployed AttesterRegistry.
#[derive(Debug, Clone)]
pub struct AlloyAttesterRegistry<P> {
    provider: P,
    registry: Address,
}

impl<P> AlloyAttesterRegistry<P>
where
    P: Provider<Ethereum> + Clone,
{
    pub fn new(provider: P, config: &DomainConfig) -> Self {
        Self {
            provider,
            registry: config.attester_registry,
        }
    }
}

#[async_trait]
impl<P> AttesterSetProvider for AlloyAttesterRegistry<P>
where
    P: Provider<Ethereum> + Clone + Send + Sync,
{
    #[instrument(skip(self), fields(registry = %self.registry))]
    async fn attester_set(&self, domain: Domain) -> Result<AttesterSet> {
        let contract = IAttesterRegistry::new(self.registry, self.provider.clone());
        let attesters = contract
            .getAttesters(domain.as_u32())
            .call()
            .await
            .map_err(contract_error)?;
        let threshold = contract
            .getThreshold(domain.as_u32())
            .call()
            .await
            .map_err(contract_error)?;
        let version = contract.version().call().await.map_err(contract_error)?;

        debug!(
            domain = %domain,
            attesters = attesters.len(),
            threshold = threshold,
            version = version,
            "Fetched attester set"
        );
        Ok(AttesterSet {
            domain,
            attesters,
            threshold,
            version,
        })
    }
}
