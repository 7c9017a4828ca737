//! Configuration for the attestation service, the relayer and the node binary.
//!
//! Value types follow one pattern: `Default` carries production defaults,
//! `with_*` methods override single fields, and `from_lookup` reads the
//! `BRIDGE_*` variables through any key lookup so tests never touch the
//! process environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy_chains::NamedChain;
use alloy_primitives::Address;
use bon::Builder;
use url::Url;

use crate::chain::{DomainConfig, DomainRegistry};
use crate::error::{BridgeError, Result};
use crate::protocol::Domain;

/// Default quorum window before a pending attestation expires (30 minutes)
pub const DEFAULT_EXPIRY_WINDOW_SECS: u64 = 30 * 60;

/// Default interval between source-chain polls
pub const DEFAULT_SOURCE_POLL_INTERVAL_SECS: u64 = 5;

/// Default interval between expiry and reconciliation sweeps
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 10;

/// Default upper bound on any single chain call
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Default interval between relayer polls of the ready list
pub const DEFAULT_RELAYER_POLL_INTERVAL_SECS: u64 = 10;

/// Default submission attempts per attestation before it is reported failed
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default first backoff delay, doubled after every failed attempt
pub const DEFAULT_INITIAL_BACKOFF_SECS: u64 = 1;

/// Default ceiling on the backoff delay
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 60;

/// Timing parameters of the attestation service.
///
/// # Examples
///
/// ```rust
/// use attestation_bridge::ServiceConfig;
///
/// let config = ServiceConfig::default()
///     .with_expiry_window_secs(600)
///     .with_source_poll_interval_secs(2);
/// assert_eq!(config.expiry_window().as_secs(), 600);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Seconds a message may stay pending before it expires
    pub expiry_window_secs: u64,
    /// Seconds between polls of each source chain
    pub source_poll_interval_secs: u64,
    /// Seconds between expiry and reconciliation sweeps
    pub maintenance_interval_secs: u64,
    /// Upper bound on a single chain call, in seconds
    pub call_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            expiry_window_secs: DEFAULT_EXPIRY_WINDOW_SECS,
            source_poll_interval_secs: DEFAULT_SOURCE_POLL_INTERVAL_SECS,
            maintenance_interval_secs: DEFAULT_MAINTENANCE_INTERVAL_SECS,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
        }
    }
}

impl ServiceConfig {
    /// Short windows for local development chains
    pub fn local() -> Self {
        Self {
            expiry_window_secs: 120,
            source_poll_interval_secs: 1,
            maintenance_interval_secs: 1,
            call_timeout_secs: 5,
        }
    }

    pub fn with_expiry_window_secs(mut self, secs: u64) -> Self {
        self.expiry_window_secs = secs;
        self
    }

    pub fn with_source_poll_interval_secs(mut self, secs: u64) -> Self {
        self.source_poll_interval_secs = secs;
        self
    }

    pub fn with_maintenance_interval_secs(mut self, secs: u64) -> Self {
        self.maintenance_interval_secs = secs;
        self
    }

    pub fn with_call_timeout_secs(mut self, secs: u64) -> Self {
        self.call_timeout_secs = secs;
        self
    }

    pub fn expiry_window(&self) -> Duration {
        Duration::from_secs(self.expiry_window_secs)
    }

    pub fn source_poll_interval(&self) -> Duration {
        Duration::from_secs(self.source_poll_interval_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Reads `BRIDGE_EXPIRY_SECS`, `BRIDGE_SOURCE_POLL_SECS`,
    /// `BRIDGE_MAINTENANCE_SECS` and `BRIDGE_CALL_TIMEOUT_SECS`, falling back
    /// to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            expiry_window_secs: parse_or(&lookup, "BRIDGE_EXPIRY_SECS", defaults.expiry_window_secs)?,
            source_poll_interval_secs: parse_or(
                &lookup,
                "BRIDGE_SOURCE_POLL_SECS",
                defaults.source_poll_interval_secs,
            )?,
            maintenance_interval_secs: parse_or(
                &lookup,
                "BRIDGE_MAINTENANCE_SECS",
                defaults.maintenance_interval_secs,
            )?,
            call_timeout_secs: parse_or(
                &lookup,
                "BRIDGE_CALL_TIMEOUT_SECS",
                defaults.call_timeout_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("expiry window", self.expiry_window_secs),
            ("source poll interval", self.source_poll_interval_secs),
            ("maintenance interval", self.maintenance_interval_secs),
            ("call timeout", self.call_timeout_secs),
        ] {
            if value == 0 {
                return Err(BridgeError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Polling, timeout and retry parameters of a relayer.
///
/// # Examples
///
/// ```rust
/// use attestation_bridge::RelayerConfig;
/// use std::time::Duration;
///
/// let config = RelayerConfig::default().with_max_attempts(3);
/// assert_eq!(config.backoff_delay(1), Duration::from_secs(1));
/// assert_eq!(config.backoff_delay(2), Duration::from_secs(2));
/// assert_eq!(config.backoff_delay(10), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayerConfig {
    /// Seconds between polls of the ready list
    pub poll_interval_secs: u64,
    /// Submission attempts per attestation before it is reported failed
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in seconds
    pub initial_backoff_secs: u64,
    /// Ceiling on the backoff delay, in seconds
    pub max_backoff_secs: u64,
    /// Upper bound on a single chain or API call, in seconds
    pub call_timeout_secs: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_RELAYER_POLL_INTERVAL_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_secs: DEFAULT_INITIAL_BACKOFF_SECS,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
        }
    }
}

impl RelayerConfig {
    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_backoff_secs(mut self, secs: u64) -> Self {
        self.initial_backoff_secs = secs;
        self
    }

    pub fn with_max_backoff_secs(mut self, secs: u64) -> Self {
        self.max_backoff_secs = secs;
        self
    }

    pub fn with_call_timeout_secs(mut self, secs: u64) -> Self {
        self.call_timeout_secs = secs;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Delay before retrying after `failed_attempts` failures.
    ///
    /// `initial * 2^(failed_attempts - 1)`, capped at `max_backoff_secs`.
    pub fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(32);
        let secs = self
            .initial_backoff_secs
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }

    /// Reads `BRIDGE_RELAYER_POLL_SECS`, `BRIDGE_RELAYER_MAX_ATTEMPTS`,
    /// `BRIDGE_RELAYER_BACKOFF_SECS`, `BRIDGE_RELAYER_MAX_BACKOFF_SECS` and
    /// `BRIDGE_CALL_TIMEOUT_SECS`, falling back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            poll_interval_secs: parse_or(
                &lookup,
                "BRIDGE_RELAYER_POLL_SECS",
                defaults.poll_interval_secs,
            )?,
            max_attempts: parse_or(&lookup, "BRIDGE_RELAYER_MAX_ATTEMPTS", defaults.max_attempts)?,
            initial_backoff_secs: parse_or(
                &lookup,
                "BRIDGE_RELAYER_BACKOFF_SECS",
                defaults.initial_backoff_secs,
            )?,
            max_backoff_secs: parse_or(
                &lookup,
                "BRIDGE_RELAYER_MAX_BACKOFF_SECS",
                defaults.max_backoff_secs,
            )?,
            call_timeout_secs: parse_or(
                &lookup,
                "BRIDGE_CALL_TIMEOUT_SECS",
                defaults.call_timeout_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(BridgeError::InvalidConfig(
                "relayer max attempts must be positive".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 || self.call_timeout_secs == 0 {
            return Err(BridgeError::InvalidConfig(
                "relayer intervals must be positive".to_string(),
            ));
        }
        if self.initial_backoff_secs > self.max_backoff_secs {
            return Err(BridgeError::InvalidConfig(
                "initial backoff exceeds max backoff".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the `bridge-node` binary needs.
#[derive(Builder, Debug, Clone)]
pub struct NodeConfig {
    pub domains: DomainRegistry,
    #[builder(default = default_listen_addr())]
    pub listen_addr: SocketAddr,
    /// Snapshot file for the attestation store
    pub store_path: Option<PathBuf>,
    /// Hex private keys of attesters co-hosted with the service
    #[builder(default)]
    pub attester_keys: Vec<String>,
    /// Hex private key the relayer pays gas with; no relayer runs without it
    pub relayer_key: Option<String>,
    /// Remote attestation service for the relayer; the co-hosted one if unset
    pub attestation_url: Option<Url>,
    #[builder(default)]
    pub service: ServiceConfig,
    #[builder(default)]
    pub relayer: RelayerConfig,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl NodeConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the node configuration from `BRIDGE_*` keys.
    ///
    /// `BRIDGE_DOMAINS` lists domain ids separated by commas. Each listed
    /// domain `N` reads `BRIDGE_DOMAIN_N_RPC_URL`, `BRIDGE_DOMAIN_N_TOKEN_MESSENGER`,
    /// `BRIDGE_DOMAIN_N_MESSAGE_TRANSMITTER`, `BRIDGE_DOMAIN_N_ATTESTER_REGISTRY`
    /// and optionally `BRIDGE_DOMAIN_N_NAME`, `BRIDGE_DOMAIN_N_CHAIN_ID` and
    /// `BRIDGE_DOMAIN_N_CONFIRMATIONS`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let ids = lookup("BRIDGE_DOMAINS")
            .ok_or_else(|| BridgeError::InvalidConfig("BRIDGE_DOMAINS is not set".to_string()))?;

        let mut domains = DomainRegistry::new();
        for id in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let domain: Domain = id
                .parse()
                .map_err(|e| BridgeError::InvalidConfig(format!("bad domain id {id:?}: {e}")))?;
            domains.register(domain_from_lookup(&lookup, domain)?)?;
        }
        if domains.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "BRIDGE_DOMAINS lists no domains".to_string(),
            ));
        }

        let listen_addr = match lookup("BRIDGE_LISTEN_ADDR") {
            Some(addr) => addr.parse().map_err(|e| {
                BridgeError::InvalidConfig(format!("bad BRIDGE_LISTEN_ADDR {addr:?}: {e}"))
            })?,
            None => default_listen_addr(),
        };

        let attester_keys = lookup("BRIDGE_ATTESTER_KEYS")
            .map(|keys| {
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            domains,
            listen_addr,
            store_path: lookup("BRIDGE_STORE_PATH").map(PathBuf::from),
            attester_keys,
            relayer_key: lookup("BRIDGE_RELAYER_KEY"),
            attestation_url: lookup("BRIDGE_ATTESTATION_URL")
                .map(|url| Url::parse(url.trim()))
                .transpose()?,
            service: ServiceConfig::from_lookup(&lookup)?,
            relayer: RelayerConfig::from_lookup(&lookup)?,
        })
    }
}

fn domain_from_lookup(
    lookup: &impl Fn(&str) -> Option<String>,
    domain: Domain,
) -> Result<DomainConfig> {
    let key = |field: &str| format!("BRIDGE_DOMAIN_{domain}_{field}");
    let required = |field: &str| {
        let name = key(field);
        lookup(&name).ok_or_else(|| BridgeError::InvalidConfig(format!("{name} is not set")))
    };
    let address = |field: &str| -> Result<Address> {
        let value = required(field)?;
        value.trim().parse::<Address>().map_err(|e| {
            BridgeError::InvalidConfig(format!("bad {} {value:?}: {e}", key(field)))
        })
    };

    let rpc_url = lookup(&key("RPC_URL"))
        .map(|url| Url::parse(url.trim()))
        .transpose()?;
    let chain = lookup(&key("CHAIN_ID"))
        .map(|id| {
            id.trim()
                .parse::<u64>()
                .ok()
                .and_then(|id| NamedChain::try_from(id).ok())
                .ok_or_else(|| BridgeError::InvalidConfig(format!("unknown chain id {id:?}")))
        })
        .transpose()?;
    let name = lookup(&key("NAME"))
        .or_else(|| domain.well_known_name().map(str::to_lowercase))
        .unwrap_or_else(|| format!("domain-{domain}"));

    Ok(DomainConfig::builder()
        .domain(domain)
        .name(name)
        .maybe_chain(chain)
        .maybe_rpc_url(rpc_url)
        .token_messenger(address("TOKEN_MESSENGER")?)
        .message_transmitter(address("MESSAGE_TRANSMITTER")?)
        .attester_registry(address("ATTESTER_REGISTRY")?)
        .confirmations(parse_or(lookup, &key("CONFIRMATIONS"), 0)?)
        .start_block(parse_or(lookup, &key("START_BLOCK"), 0)?)
        .build())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| BridgeError::InvalidConfig(format!("bad {key} {value:?}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_service_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.expiry_window(), Duration::from_secs(1800));
        assert_eq!(config.source_poll_interval(), Duration::from_secs(5));
        assert_eq!(config.maintenance_interval(), Duration::from_secs(10));
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relayer_defaults_and_backoff() {
        let config = RelayerConfig::default();
        assert_eq!(config.max_attempts, 5);
        let delays: Vec<u64> = (1..=8).map(|n| config.backoff_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_config_is_copy() {
        let config = RelayerConfig::default();
        let copied = config;
        assert_eq!(config, copied);
    }

    #[test]
    fn test_service_from_lookup() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("BRIDGE_EXPIRY_SECS", "60"),
            ("BRIDGE_CALL_TIMEOUT_SECS", " 3 "),
        ]))
        .unwrap();
        assert_eq!(config.expiry_window_secs, 60);
        assert_eq!(config.call_timeout_secs, 3);
        assert_eq!(config.source_poll_interval_secs, 5);

        let err = ServiceConfig::from_lookup(lookup_from(&[("BRIDGE_EXPIRY_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("BRIDGE_EXPIRY_SECS"));

        assert!(ServiceConfig::from_lookup(lookup_from(&[("BRIDGE_EXPIRY_SECS", "0")])).is_err());
    }

    #[test]
    fn test_relayer_rejects_inverted_backoff() {
        let result = RelayerConfig::from_lookup(lookup_from(&[
            ("BRIDGE_RELAYER_BACKOFF_SECS", "120"),
            ("BRIDGE_RELAYER_MAX_BACKOFF_SECS", "60"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_node_from_lookup() {
        let config = NodeConfig::from_lookup(lookup_from(&[
            ("BRIDGE_DOMAINS", "0, 3"),
            ("BRIDGE_DOMAIN_0_RPC_URL", "http://localhost:8545"),
            ("BRIDGE_DOMAIN_0_CHAIN_ID", "1"),
            (
                "BRIDGE_DOMAIN_0_TOKEN_MESSENGER",
                "0x1111111111111111111111111111111111111111",
            ),
            (
                "BRIDGE_DOMAIN_0_MESSAGE_TRANSMITTER",
                "0x2222222222222222222222222222222222222222",
            ),
            (
                "BRIDGE_DOMAIN_0_ATTESTER_REGISTRY",
                "0x3333333333333333333333333333333333333333",
            ),
            ("BRIDGE_DOMAIN_0_CONFIRMATIONS", "12"),
            ("BRIDGE_DOMAIN_0_START_BLOCK", "21000000"),
            (
                "BRIDGE_DOMAIN_3_TOKEN_MESSENGER",
                "0x4444444444444444444444444444444444444444",
            ),
            (
                "BRIDGE_DOMAIN_3_MESSAGE_TRANSMITTER",
                "0x5555555555555555555555555555555555555555",
            ),
            (
                "BRIDGE_DOMAIN_3_ATTESTER_REGISTRY",
                "0x6666666666666666666666666666666666666666",
            ),
            ("BRIDGE_LISTEN_ADDR", "127.0.0.1:9000"),
            ("BRIDGE_ATTESTER_KEYS", "0xaa, 0xbb"),
        ]))
        .unwrap();

        assert_eq!(config.domains.len(), 2);
        let ethereum = config.domains.get(Domain::ETHEREUM).unwrap();
        assert_eq!(ethereum.name, "ethereum");
        assert_eq!(ethereum.chain, Some(NamedChain::Mainnet));
        assert_eq!(ethereum.confirmations, 12);
        assert_eq!(ethereum.start_block, 21_000_000);
        assert!(ethereum.rpc_url.is_some());

        let arbitrum = config.domains.get(Domain::ARBITRUM).unwrap();
        assert!(arbitrum.rpc_url.is_none());
        assert_eq!(arbitrum.start_block, 0);
        assert_eq!(arbitrum.name, "arbitrum");

        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.attester_keys, vec!["0xaa", "0xbb"]);
        assert!(config.relayer_key.is_none());
        assert!(config.attestation_url.is_none());
        assert_eq!(config.service, ServiceConfig::default());
    }

    #[test]
    fn test_node_requires_contract_addresses() {
        let err = NodeConfig::from_lookup(lookup_from(&[("BRIDGE_DOMAINS", "7")])).unwrap_err();
        assert!(err.to_string().contains("BRIDGE_DOMAIN_7_TOKEN_MESSENGER"));

        assert!(NodeConfig::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn test_bad_start_block_is_rejected() {
        let err = NodeConfig::from_lookup(lookup_from(&[
            ("BRIDGE_DOMAINS", "3"),
            (
                "BRIDGE_DOMAIN_3_TOKEN_MESSENGER",
                "0x4444444444444444444444444444444444444444",
            ),
            (
                "BRIDGE_DOMAIN_3_MESSAGE_TRANSMITTER",
                "0x5555555555555555555555555555555555555555",
            ),
            (
                "BRIDGE_DOMAIN_3_ATTESTER_REGISTRY",
                "0x6666666666666666666666666666666666666666",
            ),
            ("BRIDGE_DOMAIN_3_START_BLOCK", "latest"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("BRIDGE_DOMAIN_3_START_BLOCK"));
    }
}
