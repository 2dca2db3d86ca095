//! The value-movement primitive the engine relies on.
//!
//! The engine never moves balances itself. It describes a [`Transfer`] and
//! hands it to a [`Custody`] implementation, which must apply it completely
//! or not at all.

use std::collections::HashMap;

use thiserror::Error;

use crate::address::Address;
use crate::transition::Transfer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    #[error("insufficient balance in {account}: required {required}, available {available}")]
    InsufficientBalance {
        account: Address,
        required: u64,
        available: u64,
    },
    #[error("balance overflow crediting {0}")]
    Overflow(Address),
}

pub trait Custody {
    fn balance(&self, asset: &Address, owner: &Address) -> u64;

    /// Atomically move `transfer.amount` of `transfer.asset`.
    fn transfer(&mut self, transfer: &Transfer) -> Result<(), CustodyError>;
}

/// Balances held in a map. Used by tests and by callers embedding the engine.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCustody {
    balances: HashMap<(Address, Address), u64>,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `owner` from outside the treasury. Returns the new balance.
    pub fn deposit(
        &mut self,
        asset: Address,
        owner: Address,
        amount: u64,
    ) -> Result<u64, CustodyError> {
        let balance = self.balances.entry((asset, owner)).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(CustodyError::Overflow(owner))?;
        Ok(*balance)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Address, u64)> {
        self.balances
            .iter()
            .map(|((asset, owner), amount)| (asset, owner, *amount))
    }
}

impl Custody for InMemoryCustody {
    fn balance(&self, asset: &Address, owner: &Address) -> u64 {
        self.balances.get(&(*asset, *owner)).copied().unwrap_or(0)
    }

    fn transfer(&mut self, transfer: &Transfer) -> Result<(), CustodyError> {
        let from_balance = self.balance(&transfer.asset, &transfer.from);
        if from_balance < transfer.amount {
            return Err(CustodyError::InsufficientBalance {
                account: transfer.from,
                required: transfer.amount,
                available: from_balance,
            });
        }
        if transfer.from == transfer.to {
            return Ok(());
        }

        let to_balance = self.balance(&transfer.asset, &transfer.to);
        let credited = to_balance
            .checked_add(transfer.amount)
            .ok_or(CustodyError::Overflow(transfer.to))?;

        // Both sides checked; apply.
        self.balances
            .insert((transfer.asset, transfer.from), from_balance - transfer.amount);
        self.balances.insert((transfer.asset, transfer.to), credited);
        Ok(())
    }
}
