//! Ledger aggregates recomputed from the entities they summarize.

use serde::{Deserialize, Serialize};

use crate::address::{Address, ledger_address};
use crate::error::{Result, TreasuryError};
use crate::ledger::Ledger;
use crate::transition::{Entity, Record};

/// Totals recomputed from live entities and escrow balances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub entities: u64,
    pub total_allocated: u64,
    pub total_paid: u64,
    pub escrow_held: u64,
}

impl Reconciliation {
    fn add<E: Entity>(&mut self, entity: &E) {
        self.entities += 1;
        self.total_allocated = self.total_allocated.saturating_add(entity.total_amount());
        self.total_paid = self.total_paid.saturating_add(entity.paid_amount());
        self.escrow_held = self.escrow_held.saturating_add(entity.escrowed());
    }
}

/// A ledger must sit at the address its authority derives and be funded in
/// a real asset.
pub fn check_ledger(ledger: &Ledger) -> Result<()> {
    let malformed = |reason| TreasuryError::MalformedRecord {
        record: Ledger::NAME,
        address: ledger.id,
        reason,
    };
    if ledger.id != ledger_address(&ledger.authority) {
        return Err(malformed("id is not derived from the authority"));
    }
    if ledger.funding_asset.is_zero() {
        return Err(malformed("funding asset is zero"));
    }
    Ok(())
}

/// Record-level invariants of an entity funded by `ledger`.
pub fn check_entity<E: Entity>(ledger: &Ledger, entity: &E) -> Result<()> {
    let malformed = |reason| TreasuryError::MalformedRecord {
        record: E::NAME,
        address: entity.address(),
        reason,
    };
    if entity.ledger() != ledger.id {
        return Err(malformed("belongs to another ledger"));
    }
    if entity.address() != E::KIND.address_for(&ledger.id, &entity.recipient()) {
        return Err(malformed("address is not derived from the recipient"));
    }
    if entity.funding_asset() != ledger.funding_asset {
        return Err(malformed("funding asset differs from the ledger"));
    }
    if let Some(reason) = entity.timing_defect() {
        return Err(malformed(reason));
    }
    if entity.total_amount() == 0 {
        return Err(malformed("total amount is zero"));
    }
    if entity.paid_amount() > entity.total_amount() {
        return Err(malformed("paid amount exceeds total"));
    }
    if entity.is_completed() != (entity.paid_amount() == entity.total_amount()) {
        return Err(malformed("status disagrees with the paid amount"));
    }
    Ok(())
}

/// Check every aggregate on `ledger` and every escrow balance.
///
/// Every record is checked with [`check_ledger`] / [`check_entity`] first.
/// `balance(asset, owner)` reads custody. Any disagreement is reported as
/// [`TreasuryError::ReconciliationMismatch`] naming the first field that
/// failed.
pub fn reconcile<'a, S, V, B>(
    ledger: &Ledger,
    streams: S,
    vestings: V,
    balance: B,
) -> Result<Reconciliation>
where
    S: IntoIterator<Item = &'a crate::stream::Stream>,
    V: IntoIterator<Item = &'a crate::vesting::Vesting>,
    B: Fn(&Address, &Address) -> u64,
{
    check_ledger(ledger)?;
    let mut computed = Reconciliation::default();

    for stream in streams {
        check_entity(ledger, stream)?;
        computed.add(stream);
        check_escrow(stream, &balance)?;
    }
    for vesting in vestings {
        check_entity(ledger, vesting)?;
        computed.add(vesting);
        check_escrow(vesting, &balance)?;
    }

    let pairs = [
        ("totalEntitiesCreated", ledger.total_entities_created, computed.entities),
        ("totalAllocated", ledger.total_allocated, computed.total_allocated),
        ("totalPaid", ledger.total_paid, computed.total_paid),
    ];
    for (field, recorded, actual) in pairs {
        if recorded != actual {
            return Err(TreasuryError::ReconciliationMismatch {
                field: field.to_string(),
                recorded,
                computed: actual,
            });
        }
    }
    Ok(computed)
}

fn check_escrow<E: Entity, B: Fn(&Address, &Address) -> u64>(entity: &E, balance: &B) -> Result<()> {
    let held = balance(&entity.funding_asset(), &entity.address());
    if held != entity.escrowed() {
        return Err(TreasuryError::ReconciliationMismatch {
            field: format!("escrow {}", entity.address()),
            recorded: held,
            computed: entity.escrowed(),
        });
    }
    Ok(())
}
