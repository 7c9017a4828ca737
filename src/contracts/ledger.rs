//! Balances of the bridgeable asset on one chain

use std::collections::HashMap;

use alloy_primitives::{Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Account balances keyed by opaque address bytes
///
/// Burns on the source chain and mints on the destination chain both go
/// through here, so `total_supply` always equals the sum of balances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    balances: HashMap<Bytes, U256>,
    total_supply: U256,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &[u8]) -> U256 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    /// Checks that `account` could cover a burn of `amount` without mutating anything
    pub fn ensure_funds(&self, account: &[u8], amount: U256) -> Result<()> {
        let balance = self.balance_of(account);
        if balance < amount {
            return Err(BridgeError::InsufficientFunds {
                balance: balance.to_string(),
                requested: amount.to_string(),
            });
        }
        Ok(())
    }

    pub fn mint(&mut self, account: &[u8], amount: U256) -> Result<()> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or_else(|| BridgeError::ContractCall("total supply overflow".to_string()))?;
        let balance = self.balance_of(account);
        // balance <= supply, so this cannot overflow once the supply check passed
        self.balances
            .insert(Bytes::copy_from_slice(account), balance + amount);
        self.total_supply = supply;
        Ok(())
    }

    pub fn burn(&mut self, account: &[u8], amount: U256) -> Result<()> {
        self.ensure_funds(account, amount)?;
        let remaining = self.balance_of(account) - amount;
        if remaining.is_zero() {
            self.balances.remove(account);
        } else {
            self.balances
                .insert(Bytes::copy_from_slice(account), remaining);
        }
        self.total_supply -= amount;
        Ok(())
    }
}
