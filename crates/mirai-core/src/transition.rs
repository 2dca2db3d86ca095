use serde::{Deserialize, Serialize};

use crate::address::{Address, stream_address, vesting_address};
use crate::error::{Result, TreasuryError};
use crate::guard;
use crate::ledger::Ledger;
use crate::reconcile::check_entity;

/// A single atomic value movement between two custodied balances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub asset: Address,
    pub from: Address,
    pub to: Address,
    pub amount: u64,
}

/// The complete effect of one create/redeem/claim operation.
///
/// Records carry the version they will have once committed; a committer
/// accepts the transition only if the stored records are exactly one
/// version behind. Only the engines in this crate build transitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition<E> {
    pub(crate) ledger: Ledger,
    pub(crate) entity: E,
    pub(crate) transfer: Transfer,
}

impl<E> Transition<E> {
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    pub fn transfer(&self) -> &Transfer {
        &self.transfer
    }

    pub fn into_entity(self) -> E {
        self.entity
    }

    pub fn amount(&self) -> u64 {
        self.transfer.amount
    }
}

impl<E: Entity> Transition<E> {
    /// True when the transition inserts a new entity rather than updating one.
    pub fn creates_entity(&self) -> bool {
        self.entity.version() == crate::constants::INITIAL_VERSION
    }

    /// Check that this is a transition the engines build from `current` and
    /// `stored`, the entity's committed record (`None` for a create).
    ///
    /// Versions are not compared here; that is [`check_successor`]'s job.
    pub fn verify(&self, current: &Ledger, stored: Option<&E>) -> Result<()> {
        let Transition {
            ledger: next,
            entity,
            transfer,
        } = self;
        let reject = |reason| TreasuryError::InvalidTransition {
            record: E::NAME,
            address: entity.address(),
            reason,
        };

        // Only the aggregates and the version move with a payout or allocation
        let fixed = Ledger {
            total_entities_created: next.total_entities_created,
            total_allocated: next.total_allocated,
            total_paid: next.total_paid,
            version: next.version,
            ..current.clone()
        };
        if fixed != *next {
            return Err(reject("ledger identity or governance changed"));
        }
        check_entity(current, entity)?;
        if transfer.asset != current.funding_asset {
            return Err(reject("transfer asset is not the funding asset"));
        }

        match stored {
            None => {
                if transfer.from != current.authority || transfer.to != entity.address() {
                    return Err(reject("allocation must move funds from the authority to escrow"));
                }
                if transfer.amount != entity.total_amount() || entity.paid_amount() != 0 {
                    return Err(reject("allocation must escrow exactly the entity total"));
                }
                let allocated = current.total_allocated.checked_add(transfer.amount);
                if allocated != Some(next.total_allocated)
                    || next.total_paid != current.total_paid
                    || next.total_entities_created != current.total_entities_created.saturating_add(1)
                {
                    return Err(reject("ledger aggregates do not match the allocation"));
                }
            }
            Some(prev) => {
                if !entity.same_terms(prev) {
                    return Err(reject("payout changed the entity terms"));
                }
                if transfer.from != entity.address() || transfer.to != entity.recipient() {
                    return Err(reject("payout must move funds from escrow to the recipient"));
                }
                if transfer.amount == 0
                    || prev.paid_amount().checked_add(transfer.amount) != Some(entity.paid_amount())
                {
                    return Err(reject("transfer amount does not match the paid amount"));
                }
                if current.total_paid.checked_add(transfer.amount) != Some(next.total_paid)
                    || next.total_allocated != current.total_allocated
                    || next.total_entities_created != current.total_entities_created
                {
                    return Err(reject("ledger aggregates do not match the payout"));
                }
            }
        }
        Ok(())
    }
}

/// The next ledger version produced by an authorized governance change.
///
/// Returned by [`Ledger::set_paused`] and [`Ledger::set_limits`]; there is
/// no other way to build one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GovernanceUpdate {
    pub(crate) ledger: Ledger,
}

impl GovernanceUpdate {
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    /// Only governance settings and the version may differ from `current`.
    pub fn verify(&self, current: &Ledger) -> Result<()> {
        let next = &self.ledger;
        let expected = Ledger {
            governance: next.governance,
            version: next.version,
            ..current.clone()
        };
        if expected != *next {
            return Err(TreasuryError::InvalidTransition {
                record: Ledger::NAME,
                address: next.id,
                reason: "governance update changed ledger identity or aggregates",
            });
        }
        guard::check_limits(
            next.governance.max_entity_amount,
            next.governance.max_total_allocation,
        )
    }
}

/// A versioned record stored at a derived address.
pub trait Record {
    const NAME: &'static str;

    fn address(&self) -> Address;
    fn version(&self) -> u64;
}

/// Accept `next` only if the stored record is exactly one version behind it.
pub fn check_successor<R: Record>(stored_version: u64, next: &R) -> Result<()> {
    if stored_version.checked_add(1) == Some(next.version()) {
        return Ok(());
    }
    Err(TreasuryError::Conflict {
        record: R::NAME,
        address: next.address(),
        expected: next.version().saturating_sub(1),
        found: stored_version,
    })
}

/// A stream or vesting grant: an escrowed allocation paid out over time.
pub trait Entity: Record + Clone {
    const KIND: EntityKind;

    fn ledger(&self) -> Address;
    fn recipient(&self) -> Address;
    fn funding_asset(&self) -> Address;
    fn total_amount(&self) -> u64;
    /// Withdrawn or claimed so far.
    fn paid_amount(&self) -> u64;

    fn is_completed(&self) -> bool;

    /// Why the release schedule is unusable, if it is.
    fn timing_defect(&self) -> Option<&'static str>;

    /// Equal in everything fixed at creation; payout progress and version
    /// are ignored.
    fn same_terms(&self, other: &Self) -> bool;

    /// What the escrow must hold.
    fn escrowed(&self) -> u64 {
        self.total_amount().saturating_sub(self.paid_amount())
    }
}

/// The two kinds of release entity a ledger funds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Stream,
    Vesting,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Stream => "stream",
            EntityKind::Vesting => "vesting",
        }
    }

    /// Where the entity for `recipient` under `ledger` must live.
    pub fn address_for(self, ledger: &Address, recipient: &Address) -> Address {
        match self {
            EntityKind::Stream => stream_address(ledger, recipient),
            EntityKind::Vesting => vesting_address(ledger, recipient),
        }
    }

    pub fn already_exists(self, address: Address) -> TreasuryError {
        match self {
            EntityKind::Stream => TreasuryError::StreamAlreadyExists(address),
            EntityKind::Vesting => TreasuryError::VestingAlreadyExists(address),
        }
    }

    pub fn unknown(self, address: Address) -> TreasuryError {
        match self {
            EntityKind::Stream => TreasuryError::UnknownStream(address),
            EntityKind::Vesting => TreasuryError::UnknownVesting(address),
        }
    }
}
