//! Domain registry and chain connection parameters
//!
//! The registry is a static lookup table from a bridge [`Domain`] to the
//! parameters needed to talk to that chain. It has no behaviour of its own;
//! the service, the relayer and the binary all consult it.

pub mod local;

use std::collections::BTreeMap;

use alloy_chains::NamedChain;
use alloy_primitives::Address;
use bon::Builder;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BridgeError, Result};
use crate::protocol::Domain;

/// Connection parameters for one bridged chain
///
/// # Example
///
/// ```rust
/// use attestation_bridge::{Domain, DomainConfig};
/// use alloy_chains::NamedChain;
/// use alloy_primitives::Address;
///
/// let config = DomainConfig::builder()
///     .domain(Domain::ARBITRUM)
///     .name("arbitrum".to_string())
///     .chain(NamedChain::Arbitrum)
///     .token_messenger(Address::repeat_byte(1))
///     .message_transmitter(Address::repeat_byte(2))
///     .attester_registry(Address::repeat_byte(3))
///     .build();
///
/// assert_eq!(config.domain, Domain::ARBITRUM);
/// assert!(config.rpc_url.is_none());
/// assert_eq!(config.start_block, 0);
/// ```
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainConfig {
    pub domain: Domain,
    pub name: String,
    /// EVM chain behind the domain, when it is a named one
    pub chain: Option<NamedChain>,
    pub rpc_url: Option<Url>,
    pub token_messenger: Address,
    pub message_transmitter: Address,
    pub attester_registry: Address,
    /// Blocks to wait before a `MessageSent` log is treated as final
    #[builder(default)]
    #[serde(default)]
    pub confirmations: u64,
    /// First block scanned for `MessageSent` logs on a fresh start
    #[builder(default)]
    #[serde(default)]
    pub start_block: u64,
}

impl DomainConfig {
    /// Returns the RPC endpoint or an `InvalidConfig` error naming the domain
    pub fn require_rpc_url(&self) -> Result<&Url> {
        self.rpc_url.as_ref().ok_or_else(|| {
            BridgeError::InvalidConfig(format!(
                "no RPC url configured for domain {} ({})",
                self.domain, self.name
            ))
        })
    }
}

/// Lookup table of every domain in the bridge topology
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRegistry {
    domains: BTreeMap<Domain, DomainConfig>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a domain.
    ///
    /// # Errors
    ///
    /// Domains are immutable once assigned, so registering the same domain
    /// twice returns [`BridgeError::InvalidConfig`].
    pub fn register(&mut self, config: DomainConfig) -> Result<()> {
        if self.domains.contains_key(&config.domain) {
            return Err(BridgeError::InvalidConfig(format!(
                "domain {} registered twice",
                config.domain
            )));
        }
        self.domains.insert(config.domain, config);
        Ok(())
    }

    pub fn get(&self, domain: Domain) -> Result<&DomainConfig> {
        self.domains
            .get(&domain)
            .ok_or(BridgeError::UnknownDomain(domain))
    }

    pub fn contains(&self, domain: Domain) -> bool {
        self.domains.contains_key(&domain)
    }

    /// Registered domains in ascending order
    pub fn domains(&self) -> impl Iterator<Item = Domain> + '_ {
        self.domains.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DomainConfig> {
        self.domains.values()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Finds the domain configured for a named EVM chain
    pub fn by_chain(&self, chain: NamedChain) -> Option<&DomainConfig> {
        self.domains.values().find(|c| c.chain == Some(chain))
    }
}

impl FromIterator<DomainConfig> for DomainRegistry {
    /// Later duplicates are ignored; use [`DomainRegistry::register`] to detect them.
    fn from_iter<T: IntoIterator<Item = DomainConfig>>(iter: T) -> Self {
        let mut domains = BTreeMap::new();
        for config in iter {
            domains.entry(config.domain).or_insert(config);
        }
        Self { domains }
    }
}
