//! Attester registry
//!
//! Per destination domain: the attester identities, whether each is active,
//! and the number of distinct valid signatures a message needs. Every
//! mutation requires the owner and bumps a registry-wide `version`, which the
//! attestation service records when it snapshots a set.

use std::collections::HashMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BridgeError, Result};
use crate::protocol::Domain;

/// One registered attester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttesterRecord {
    pub identity: Address,
    pub active: bool,
    /// Signatures from this attester counted toward an accepted message
    pub messages_signed: u64,
}

/// Active attesters and threshold for one domain at a registry version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttesterSet {
    pub domain: Domain,
    /// Active attesters in registration order
    pub attesters: Vec<Address>,
    pub threshold: u32,
    pub version: u64,
}

impl AttesterSet {
    pub fn contains(&self, identity: &Address) -> bool {
        self.attesters.contains(identity)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DomainAttesters {
    attesters: Vec<AttesterRecord>,
    /// Zero until the owner configures it
    threshold: u32,
}

impl DomainAttesters {
    fn find(&self, identity: &Address) -> Option<&AttesterRecord> {
        self.attesters.iter().find(|a| &a.identity == identity)
    }

    fn find_mut(&mut self, identity: &Address) -> Option<&mut AttesterRecord> {
        self.attesters.iter_mut().find(|a| &a.identity == identity)
    }

    fn active_count(&self) -> u32 {
        self.attesters.iter().filter(|a| a.active).count() as u32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttesterRegistry {
    owner: Address,
    domains: HashMap<Domain, DomainAttesters>,
    version: u64,
}

impl AttesterRegistry {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            domains: HashMap::new(),
            version: 0,
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Incremented by every successful mutation
    pub fn version(&self) -> u64 {
        self.version
    }

    fn ensure_owner(&self, caller: Address) -> Result<()> {
        if caller != self.owner {
            return Err(BridgeError::Unauthorized { caller });
        }
        Ok(())
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    pub fn transfer_ownership(&mut self, caller: Address, new_owner: Address) -> Result<()> {
        self.ensure_owner(caller)?;
        self.owner = new_owner;
        self.bump();
        info!(
            previous_owner = %caller,
            new_owner = %new_owner,
            event = "registry_ownership_transferred"
        );
        Ok(())
    }

    pub fn add_attester(&mut self, caller: Address, domain: Domain, identity: Address) -> Result<()> {
        self.ensure_owner(caller)?;
        let entry = self.domains.entry(domain).or_default();
        if entry.find(&identity).is_some() {
            return Err(BridgeError::AttesterExists {
                domain,
                attester: identity,
            });
        }
        entry.attesters.push(AttesterRecord {
            identity,
            active: true,
            messages_signed: 0,
        });
        self.bump();
        info!(
            domain = %domain,
            attester = %identity,
            version = self.version,
            event = "attester_added"
        );
        Ok(())
    }

    /// Removes an attester.
    ///
    /// Fails with [`BridgeError::InvalidThreshold`] when removing an active
    /// attester would leave fewer active attesters than the threshold.
    pub fn remove_attester(
        &mut self,
        caller: Address,
        domain: Domain,
        identity: Address,
    ) -> Result<()> {
        self.ensure_owner(caller)?;
        let entry = self
            .domains
            .get_mut(&domain)
            .ok_or(BridgeError::AttesterNotFound {
                domain,
                attester: identity,
            })?;
        let record = entry.find(&identity).ok_or(BridgeError::AttesterNotFound {
            domain,
            attester: identity,
        })?;
        if record.active {
            ensure_satisfiable(domain, entry.threshold, entry.active_count() - 1)?;
        }
        entry.attesters.retain(|a| a.identity != identity);
        self.bump();
        info!(
            domain = %domain,
            attester = %identity,
            version = self.version,
            event = "attester_removed"
        );
        Ok(())
    }

    /// Enables or disables an attester without forgetting it.
    pub fn set_attester_active(
        &mut self,
        caller: Address,
        domain: Domain,
        identity: Address,
        active: bool,
    ) -> Result<()> {
        self.ensure_owner(caller)?;
        let entry = self
            .domains
            .get_mut(&domain)
            .ok_or(BridgeError::AttesterNotFound {
                domain,
                attester: identity,
            })?;
        let was_active = entry
            .find(&identity)
            .ok_or(BridgeError::AttesterNotFound {
                domain,
                attester: identity,
            })?
            .active;
        if was_active == active {
            return Ok(());
        }
        if was_active {
            ensure_satisfiable(domain, entry.threshold, entry.active_count() - 1)?;
        }
        if let Some(record) = entry.find_mut(&identity) {
            record.active = active;
        }
        self.bump();
        info!(
            domain = %domain,
            attester = %identity,
            active = active,
            version = self.version,
            event = "attester_status_changed"
        );
        Ok(())
    }

    pub fn set_threshold(&mut self, caller: Address, domain: Domain, threshold: u32) -> Result<()> {
        self.ensure_owner(caller)?;
        if threshold == 0 {
            return Err(BridgeError::InvalidThreshold {
                domain,
                threshold,
                reason: "threshold must be at least 1".to_string(),
            });
        }
        let active = self
            .domains
            .get(&domain)
            .map(DomainAttesters::active_count)
            .unwrap_or(0);
        if threshold > active {
            return Err(BridgeError::InvalidThreshold {
                domain,
                threshold,
                reason: format!("only {active} active attesters"),
            });
        }
        self.domains.entry(domain).or_default().threshold = threshold;
        self.bump();
        info!(
            domain = %domain,
            threshold = threshold,
            version = self.version,
            event = "threshold_updated"
        );
        Ok(())
    }

    /// True only for registered, active attesters of `domain`
    pub fn is_attester(&self, domain: Domain, identity: &Address) -> bool {
        self.domains
            .get(&domain)
            .and_then(|d| d.find(identity))
            .is_some_and(|a| a.active)
    }

    /// Zero when no threshold was ever configured for `domain`
    pub fn get_threshold(&self, domain: Domain) -> u32 {
        self.domains.get(&domain).map(|d| d.threshold).unwrap_or(0)
    }

    pub fn attester(&self, domain: Domain, identity: &Address) -> Option<&AttesterRecord> {
        self.domains.get(&domain).and_then(|d| d.find(identity))
    }

    /// All registered attesters of `domain`, active or not
    pub fn attesters(&self, domain: Domain) -> &[AttesterRecord] {
        self.domains
            .get(&domain)
            .map(|d| d.attesters.as_slice())
            .unwrap_or_default()
    }

    pub fn attester_set(&self, domain: Domain) -> AttesterSet {
        let entry = self.domains.get(&domain);
        AttesterSet {
            domain,
            attesters: entry
                .map(|d| {
                    d.attesters
                        .iter()
                        .filter(|a| a.active)
                        .map(|a| a.identity)
                        .collect()
                })
                .unwrap_or_default(),
            threshold: entry.map(|d| d.threshold).unwrap_or(0),
            version: self.version,
        }
    }

    /// Credits attesters whose signatures were counted for an accepted message
    pub(crate) fn record_signed(&mut self, domain: Domain, identities: &[Address]) {
        if let Some(entry) = self.domains.get_mut(&domain) {
            for identity in identities {
                if let Some(record) = entry.find_mut(identity) {
                    record.messages_signed += 1;
                }
            }
        }
    }
}

fn ensure_satisfiable(domain: Domain, threshold: u32, active_after: u32) -> Result<()> {
    if threshold > active_after {
        return Err(BridgeError::InvalidThreshold {
            domain,
            threshold,
            reason: format!("change would leave {active_after} active attesters"),
        });
    }
    Ok(())
}
