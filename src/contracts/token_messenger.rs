//! Source-chain burn contract
//!
//! `burn_and_send` validates everything before it touches state: a rejected
//! burn leaves balances, the nonce counter and the event log unchanged.

use std::collections::HashMap;

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Ledger;
use crate::error::{BridgeError, Result};
use crate::protocol::{Domain, Message, MessageSent, MAX_ADDRESS_LEN};

/// Per-destination burn settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationConfig {
    pub enabled: bool,
    /// Largest single burn toward this destination, unlimited when `None`
    pub max_burn_amount: Option<U256>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_burn_amount: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMessenger {
    local_domain: Domain,
    owner: Address,
    paused: bool,
    destinations: HashMap<Domain, DestinationConfig>,
    /// Emitted messages; position equals nonce
    sent: Vec<MessageSent>,
}

impl TokenMessenger {
    pub fn new(local_domain: Domain, owner: Address) -> Self {
        Self {
            local_domain,
            owner,
            paused: false,
            destinations: HashMap::new(),
            sent: Vec::new(),
        }
    }

    pub fn local_domain(&self) -> Domain {
        self.local_domain
    }

    /// Nonce the next successful burn will receive
    pub fn next_nonce(&self) -> u64 {
        self.sent.len() as u64
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn ensure_owner(&self, caller: Address) -> Result<()> {
        if caller != self.owner {
            return Err(BridgeError::Unauthorized { caller });
        }
        Ok(())
    }

    pub fn set_paused(&mut self, caller: Address, paused: bool) -> Result<()> {
        self.ensure_owner(caller)?;
        self.paused = paused;
        info!(
            domain = %self.local_domain,
            paused = paused,
            event = "token_messenger_pause_changed"
        );
        Ok(())
    }

    /// Registers or reconfigures a destination domain
    pub fn set_destination(
        &mut self,
        caller: Address,
        domain: Domain,
        config: DestinationConfig,
    ) -> Result<()> {
        self.ensure_owner(caller)?;
        self.destinations.insert(domain, config);
        info!(
            domain = %self.local_domain,
            destination_domain = %domain,
            enabled = config.enabled,
            max_burn_amount = ?config.max_burn_amount,
            event = "destination_configured"
        );
        Ok(())
    }

    pub fn destination(&self, domain: Domain) -> Option<&DestinationConfig> {
        self.destinations.get(&domain)
    }

    /// Burns `amount` from `sender` and emits a message toward `destination`.
    ///
    /// Returns the nonce assigned to the message. Nonces start at 0 and
    /// increase by one per successful call.
    ///
    /// # Errors
    ///
    /// `Paused`, `ZeroAmount`, `UnknownDomain`, `DomainDisabled`,
    /// `AmountExceedsMax`, `MalformedMessage` for a bad recipient, and
    /// `InsufficientFunds`. None of them burn or consume a nonce.
    pub fn burn_and_send(
        &mut self,
        ledger: &mut Ledger,
        sender: Address,
        destination: Domain,
        recipient: Bytes,
        amount: U256,
    ) -> Result<u64> {
        if let Err(e) = self.check_burn(ledger, sender, destination, &recipient, amount) {
            warn!(
                domain = %self.local_domain,
                destination_domain = %destination,
                sender = %sender,
                amount = %amount,
                error = %e,
                event = "burn_rejected"
            );
            return Err(e);
        }

        ledger.burn(sender.as_slice(), amount)?;

        let nonce = self.next_nonce();
        let message = Message::new(
            self.local_domain,
            destination,
            nonce,
            Bytes::copy_from_slice(sender.as_slice()),
            recipient,
            amount,
        );
        let message_hash = message.hash();
        self.sent.push(MessageSent {
            message,
            block_number: nonce,
        });

        info!(
            domain = %self.local_domain,
            destination_domain = %destination,
            nonce = nonce,
            sender = %sender,
            amount = %amount,
            message_hash = %message_hash,
            event = "message_sent"
        );

        Ok(nonce)
    }

    fn check_burn(
        &self,
        ledger: &Ledger,
        sender: Address,
        destination: Domain,
        recipient: &Bytes,
        amount: U256,
    ) -> Result<()> {
        if self.paused {
            return Err(BridgeError::Paused);
        }
        if amount.is_zero() {
            return Err(BridgeError::ZeroAmount);
        }
        let config = self
            .destinations
            .get(&destination)
            .ok_or(BridgeError::UnknownDomain(destination))?;
        if !config.enabled {
            return Err(BridgeError::DomainDisabled(destination));
        }
        if let Some(max) = config.max_burn_amount {
            if amount > max {
                return Err(BridgeError::AmountExceedsMax {
                    amount: amount.to_string(),
                    max: max.to_string(),
                });
            }
        }
        if recipient.is_empty() || recipient.len() > MAX_ADDRESS_LEN {
            return Err(BridgeError::MalformedMessage(format!(
                "recipient length {} outside 1..={MAX_ADDRESS_LEN}",
                recipient.len()
            )));
        }
        ledger.ensure_funds(sender.as_slice(), amount)
    }

    /// Message emitted with `nonce`, if any
    pub fn message_by_nonce(&self, nonce: u64) -> Option<&MessageSent> {
        usize::try_from(nonce).ok().and_then(|i| self.sent.get(i))
    }

    /// Events at positions `cursor..`, plus the cursor to resume from
    pub fn messages_since(&self, cursor: u64) -> (Vec<MessageSent>, u64) {
        let start = usize::try_from(cursor)
            .unwrap_or(usize::MAX)
            .min(self.sent.len());
        (self.sent[start..].to_vec(), self.sent.len() as u64)
    }
}
