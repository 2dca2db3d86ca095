//! Governance guard: policy checks run before any transition is built.
//!
//! Category validity is enforced one step earlier, when a raw tag is decoded
//! into [`PaymentCategory`](crate::PaymentCategory); inside the engine the
//! category is a closed enum and cannot be out of range.

use crate::address::Address;
use crate::constants::MAX_DESCRIPTION_LEN;
use crate::error::{Result, TreasuryError};
use crate::ledger::Ledger;
use crate::transition::EntityKind;

/// Pause flag, per-entity cap and aggregate cap, in that order.
pub fn check_creation(ledger: &Ledger, amount: u64) -> Result<()> {
    let governance = &ledger.governance;

    if governance.is_paused {
        return Err(TreasuryError::TreasuryPaused);
    }

    if amount > governance.max_entity_amount {
        return Err(TreasuryError::StreamAmountExceedsLimit {
            amount,
            limit: governance.max_entity_amount,
        });
    }

    match ledger.total_allocated.checked_add(amount) {
        Some(total) if total <= governance.max_total_allocation => Ok(()),
        _ => Err(TreasuryError::TotalAllocationExceedsLimit {
            allocated: ledger.total_allocated,
            amount,
            limit: governance.max_total_allocation,
        }),
    }
}

pub fn authorize_admin(ledger: &Ledger, caller: &Address) -> Result<()> {
    if *caller != ledger.authority {
        return Err(TreasuryError::UnauthorizedTreasuryModification);
    }
    Ok(())
}

pub fn authorize_creator(ledger: &Ledger, caller: &Address, kind: EntityKind) -> Result<()> {
    if *caller == ledger.authority {
        return Ok(());
    }
    Err(match kind {
        EntityKind::Stream => TreasuryError::UnauthorizedStreamCreation,
        EntityKind::Vesting => TreasuryError::UnauthorizedVestingCreation,
    })
}

pub fn check_description(description: &str) -> Result<()> {
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(TreasuryError::DescriptionTooLong {
            len: description.len(),
            max: MAX_DESCRIPTION_LEN,
        });
    }
    Ok(())
}

pub fn check_limits(max_entity_amount: u64, max_total_allocation: u64) -> Result<()> {
    if max_entity_amount == 0 || max_total_allocation == 0 {
        return Err(TreasuryError::InvalidGovernanceSettings(
            "limits must be greater than 0".to_string(),
        ));
    }
    if max_entity_amount > max_total_allocation {
        return Err(TreasuryError::InvalidGovernanceSettings(format!(
            "max entity amount {max_entity_amount} exceeds max total allocation {max_total_allocation}"
        )));
    }
    Ok(())
}
