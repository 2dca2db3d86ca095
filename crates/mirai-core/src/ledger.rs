use serde::{Deserialize, Serialize};

use crate::address::{Address, ledger_address};
use crate::constants::INITIAL_VERSION;
use crate::error::{Result, TreasuryError};
use crate::guard;
use crate::transition::{GovernanceUpdate, Record};

/// Governance policy applied to every entity creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceSettings {
    pub is_paused: bool,
    pub max_entity_amount: u64,
    pub max_total_allocation: u64,
    pub last_updated: i64,
}

impl GovernanceSettings {
    /// Not paused, no caps.
    pub fn unrestricted(now: i64) -> Self {
        Self {
            is_paused: false,
            max_entity_amount: u64::MAX,
            max_total_allocation: u64::MAX,
            last_updated: now,
        }
    }
}

/// Per-DAO treasury ledger: aggregate allocation/payout and governance.
///
/// The aggregates are derived from the entities the ledger funded and must
/// always reconcile with them: `total_allocated` is the sum of every entity's
/// total and `total_paid` the sum of everything released.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    pub id: Address,
    pub authority: Address,
    pub funding_asset: Address,
    pub created_at: i64,
    pub total_entities_created: u64,
    pub total_allocated: u64,
    pub total_paid: u64,
    pub governance: GovernanceSettings,
    pub version: u64,
}

impl Ledger {
    pub fn init(authority: Address, funding_asset: Address, now: i64) -> Result<Self> {
        if funding_asset.is_zero() {
            return Err(TreasuryError::InvalidMint);
        }

        let ledger = Self {
            id: ledger_address(&authority),
            authority,
            funding_asset,
            created_at: now,
            total_entities_created: 0,
            total_allocated: 0,
            total_paid: 0,
            governance: GovernanceSettings::unrestricted(now),
            version: INITIAL_VERSION,
        };

        tracing::info!(
            ledger = %ledger.id,
            authority = %ledger.authority,
            asset = %ledger.funding_asset,
            "ledger initialized"
        );
        Ok(ledger)
    }

    /// Apply initial caps before the ledger is first committed.
    pub fn with_limits(mut self, max_entity_amount: u64, max_total_allocation: u64) -> Result<Self> {
        guard::check_limits(max_entity_amount, max_total_allocation)?;
        self.governance.max_entity_amount = max_entity_amount;
        self.governance.max_total_allocation = max_total_allocation;
        Ok(self)
    }

    pub fn is_treasury_active(&self) -> bool {
        !self.governance.is_paused
    }

    /// Allocated but not yet paid out, i.e. what the escrows should hold.
    pub fn outstanding(&self) -> u64 {
        self.total_allocated.saturating_sub(self.total_paid)
    }

    /// Headroom left under `max_total_allocation`.
    pub fn remaining_allocation(&self) -> u64 {
        self.governance
            .max_total_allocation
            .saturating_sub(self.total_allocated)
    }

    /// Authority-only. Returns the next ledger version; nothing is mutated.
    pub fn set_paused(&self, caller: &Address, paused: bool, now: i64) -> Result<GovernanceUpdate> {
        guard::authorize_admin(self, caller)?;
        let mut next = self.successor();
        next.governance.is_paused = paused;
        next.governance.last_updated = now;
        Ok(GovernanceUpdate { ledger: next })
    }

    /// Authority-only. Returns the next ledger version; nothing is mutated.
    pub fn set_limits(
        &self,
        caller: &Address,
        max_entity_amount: u64,
        max_total_allocation: u64,
        now: i64,
    ) -> Result<GovernanceUpdate> {
        guard::authorize_admin(self, caller)?;
        guard::check_limits(max_entity_amount, max_total_allocation)?;
        let mut next = self.successor();
        next.governance.max_entity_amount = max_entity_amount;
        next.governance.max_total_allocation = max_total_allocation;
        next.governance.last_updated = now;
        Ok(GovernanceUpdate { ledger: next })
    }

    pub(crate) fn successor(&self) -> Ledger {
        let mut next = self.clone();
        next.version += 1;
        next
    }

    pub(crate) fn record_allocation(&mut self, amount: u64) -> Result<()> {
        self.total_allocated = self.total_allocated.checked_add(amount).ok_or(
            TreasuryError::TotalAllocationExceedsLimit {
                allocated: self.total_allocated,
                amount,
                limit: self.governance.max_total_allocation,
            },
        )?;
        self.total_entities_created = self.total_entities_created.saturating_add(1);
        Ok(())
    }

    pub(crate) fn record_payment(&mut self, amount: u64) -> Result<()> {
        let outstanding = self.outstanding();
        if amount > outstanding {
            return Err(TreasuryError::InsufficientUnlockedTokens {
                requested: amount,
                available: outstanding,
            });
        }
        self.total_paid += amount;
        Ok(())
    }
}

impl Record for Ledger {
    const NAME: &'static str = "ledger";

    fn address(&self) -> Address {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
