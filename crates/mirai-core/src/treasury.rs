//! In-memory treasury: one ledger, its entities and a custody backend.
//!
//! Operations compute a [`Transition`] from the current records and then
//! commit it. Commits compare versions before touching anything, so a
//! transition computed from stale state is rejected with
//! [`TreasuryError::Conflict`] and nothing changes.

use std::collections::BTreeMap;

use crate::address::Address;
use crate::custody::{Custody, InMemoryCustody};
use crate::error::{Result, TreasuryError};
use crate::ledger::Ledger;
use crate::reconcile::{self, Reconciliation};
use crate::stream::{self, CreateStream, Stream};
use crate::transition::{Entity, GovernanceUpdate, Transition, check_successor};
use crate::vesting::{self, CreateVesting, Vesting};

#[derive(Debug, Clone)]
pub struct Treasury<C: Custody = InMemoryCustody> {
    ledger: Ledger,
    streams: BTreeMap<Address, Stream>,
    vestings: BTreeMap<Address, Vesting>,
    custody: C,
}

impl<C: Custody> Treasury<C> {
    pub fn new(ledger: Ledger, custody: C) -> Self {
        Self {
            ledger,
            streams: BTreeMap::new(),
            vestings: BTreeMap::new(),
            custody,
        }
    }

    pub fn init(authority: Address, funding_asset: Address, custody: C, now: i64) -> Result<Self> {
        Ok(Self::new(Ledger::init(authority, funding_asset, now)?, custody))
    }

    /// Rebuild from persisted records. The result is checked with
    /// [`reconcile`](Self::reconcile) before it is returned.
    pub fn from_parts(
        ledger: Ledger,
        streams: impl IntoIterator<Item = Stream>,
        vestings: impl IntoIterator<Item = Vesting>,
        custody: C,
    ) -> Result<Self> {
        let treasury = Self {
            ledger,
            streams: streams.into_iter().map(|s| (s.address, s)).collect(),
            vestings: vestings.into_iter().map(|v| (v.address, v)).collect(),
            custody,
        };
        treasury.reconcile()?;
        Ok(treasury)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn custody(&self) -> &C {
        &self.custody
    }

    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    pub fn stream(&self, address: &Address) -> Result<&Stream> {
        self.streams
            .get(address)
            .ok_or(TreasuryError::UnknownStream(*address))
    }

    pub fn vesting(&self, address: &Address) -> Result<&Vesting> {
        self.vestings
            .get(address)
            .ok_or(TreasuryError::UnknownVesting(*address))
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn vestings(&self) -> impl Iterator<Item = &Vesting> {
        self.vestings.values()
    }

    pub fn balance(&self, owner: &Address) -> u64 {
        self.custody.balance(&self.ledger.funding_asset, owner)
    }

    // --- Operations ---

    pub fn create_stream(&mut self, caller: &Address, req: CreateStream, now: i64) -> Result<Stream> {
        let transition = stream::create(&self.ledger, caller, req, now)?;
        let created = transition.entity.clone();
        self.apply_stream(transition)?;
        Ok(created)
    }

    /// Returns the amount transferred to the recipient.
    pub fn redeem_stream(
        &mut self,
        address: &Address,
        caller: &Address,
        amount: u64,
        now: i64,
    ) -> Result<u64> {
        let transition = stream::redeem(&self.ledger, self.stream(address)?, caller, amount, now)?;
        let paid = transition.amount();
        self.apply_stream(transition)?;
        Ok(paid)
    }

    pub fn create_vesting(
        &mut self,
        caller: &Address,
        req: CreateVesting,
        now: i64,
    ) -> Result<Vesting> {
        let transition = vesting::create(&self.ledger, caller, req, now)?;
        let created = transition.entity.clone();
        self.apply_vesting(transition)?;
        Ok(created)
    }

    pub fn claim_vesting(
        &mut self,
        address: &Address,
        caller: &Address,
        amount: u64,
        now: i64,
    ) -> Result<u64> {
        let transition = vesting::claim(&self.ledger, self.vesting(address)?, caller, amount, now)?;
        let paid = transition.amount();
        self.apply_vesting(transition)?;
        Ok(paid)
    }

    pub fn set_paused(&mut self, caller: &Address, paused: bool, now: i64) -> Result<()> {
        let next = self.ledger.set_paused(caller, paused, now)?;
        self.apply_ledger(next)
    }

    pub fn set_limits(
        &mut self,
        caller: &Address,
        max_entity_amount: u64,
        max_total_allocation: u64,
        now: i64,
    ) -> Result<()> {
        let next = self
            .ledger
            .set_limits(caller, max_entity_amount, max_total_allocation, now)?;
        self.apply_ledger(next)
    }

    pub fn reconcile(&self) -> Result<Reconciliation> {
        reconcile::reconcile(
            &self.ledger,
            self.streams.values(),
            self.vestings.values(),
            |asset, owner| self.custody.balance(asset, owner),
        )
    }

    // --- Commits ---

    pub fn apply_stream(&mut self, transition: Transition<Stream>) -> Result<()> {
        commit(
            &mut self.ledger,
            &mut self.streams,
            &mut self.custody,
            transition,
        )
    }

    pub fn apply_vesting(&mut self, transition: Transition<Vesting>) -> Result<()> {
        commit(
            &mut self.ledger,
            &mut self.vestings,
            &mut self.custody,
            transition,
        )
    }

    /// Commit a governance-only ledger update.
    pub fn apply_ledger(&mut self, update: GovernanceUpdate) -> Result<()> {
        if update.ledger().id != self.ledger.id {
            return Err(TreasuryError::UnknownLedger(update.ledger().id));
        }
        check_successor(self.ledger.version, update.ledger()).inspect_err(log_conflict)?;
        update.verify(&self.ledger)?;
        let next = update.into_ledger();
        tracing::info!(
            ledger = %next.id,
            version = next.version,
            paused = next.governance.is_paused,
            max_entity_amount = next.governance.max_entity_amount,
            max_total_allocation = next.governance.max_total_allocation,
            "governance updated"
        );
        self.ledger = next;
        Ok(())
    }
}

fn commit<E: Entity, C: Custody>(
    ledger: &mut Ledger,
    table: &mut BTreeMap<Address, E>,
    custody: &mut C,
    transition: Transition<E>,
) -> Result<()> {
    if transition.ledger.id != ledger.id || transition.entity.ledger() != ledger.id {
        return Err(TreasuryError::UnknownLedger(transition.ledger.id));
    }
    check_successor(ledger.version, &transition.ledger).inspect_err(log_conflict)?;

    let address = transition.entity.address();
    let stored = table.get(&address);
    match stored {
        Some(_) if transition.creates_entity() => return Err(E::KIND.already_exists(address)),
        Some(stored) => {
            check_successor(stored.version(), &transition.entity).inspect_err(log_conflict)?
        }
        None if transition.creates_entity() => {}
        None => return Err(E::KIND.unknown(address)),
    }
    transition.verify(ledger, stored)?;
    if stored.is_none() && custody.balance(&transition.transfer.asset, &transition.transfer.to) != 0 {
        return Err(TreasuryError::InvalidTransition {
            record: E::NAME,
            address,
            reason: "escrow account is already funded",
        });
    }

    let Transition {
        ledger: next_ledger,
        entity,
        transfer,
    } = transition;

    // Last fallible step; custody applies all or nothing.
    custody.transfer(&transfer)?;

    tracing::info!(
        ledger = %next_ledger.id,
        kind = E::KIND.as_str(),
        entity = %address,
        version = entity.version(),
        amount = transfer.amount,
        from = %transfer.from,
        to = %transfer.to,
        total_allocated = next_ledger.total_allocated,
        total_paid = next_ledger.total_paid,
        "transition committed"
    );

    table.insert(address, entity);
    *ledger = next_ledger;
    Ok(())
}

fn log_conflict(err: &TreasuryError) {
    if let TreasuryError::Conflict {
        record,
        address,
        expected,
        found,
    } = err
    {
        tracing::warn!(record, %address, expected, found, "stale transition rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::PaymentCategory;
    use crate::vesting::VestingType;

    const T: i64 = 1_771_632_000;

    fn authority() -> Address {
        Address::named("authority")
    }

    fn alice() -> Address {
        Address::named("alice")
    }

    fn mint() -> Address {
        Address::named("mint")
    }

    fn funded(amount: u64) -> Treasury {
        let mut custody = InMemoryCustody::new();
        custody.deposit(mint(), authority(), amount).unwrap();
        Treasury::init(authority(), mint(), custody, T).unwrap()
    }

    fn stream_req(total: u64) -> CreateStream {
        CreateStream {
            recipient: alice(),
            asset: mint(),
            start_time: T + 10,
            end_time: T + 100,
            total_amount: total,
            category: PaymentCategory::Contributors,
            description: "monthly contributor".to_string(),
        }
    }

    #[test]
    fn test_stream_lifecycle_moves_funds() {
        let mut treasury = funded(200_000_000);
        let stream = treasury
            .create_stream(&authority(), stream_req(100_000_000), T)
            .unwrap();

        assert_eq!(treasury.balance(&authority()), 100_000_000);
        assert_eq!(treasury.balance(&stream.address), 100_000_000);

        let paid = treasury
            .redeem_stream(&stream.address, &alice(), 10_000_000, T + 55)
            .unwrap();
        assert_eq!(paid, 10_000_000);
        assert_eq!(treasury.balance(&alice()), 10_000_000);
        assert_eq!(treasury.balance(&stream.address), 90_000_000);
        assert_eq!(
            treasury.stream(&stream.address).unwrap().withdrawable_amount(T + 55),
            40_000_000
        );

        let report = treasury.reconcile().unwrap();
        assert_eq!(report.total_allocated, 100_000_000);
        assert_eq!(report.total_paid, 10_000_000);
        assert_eq!(report.escrow_held, 90_000_000);
    }

    #[test]
    fn test_invalid_timing_leaves_aggregates() {
        let mut treasury = funded(1_000);
        let mut req = stream_req(500);
        req.end_time = req.start_time;
        let before = treasury.ledger().clone();

        assert_eq!(
            treasury.create_stream(&authority(), req, T),
            Err(TreasuryError::InvalidStreamTiming)
        );
        assert_eq!(treasury.ledger(), &before);
        assert_eq!(treasury.balance(&authority()), 1_000);
    }

    #[test]
    fn test_underfunded_create_rejected_atomically() {
        let mut treasury = funded(100);
        assert_eq!(
            treasury.create_stream(&authority(), stream_req(101), T),
            Err(TreasuryError::InsufficientTreasuryBalance {
                required: 101,
                available: 100
            })
        );
        assert_eq!(treasury.ledger().total_allocated, 0);
        assert_eq!(treasury.streams().count(), 0);
    }

    #[test]
    fn test_second_stream_for_recipient_rejected() {
        let mut treasury = funded(1_000);
        let stream = treasury.create_stream(&authority(), stream_req(100), T).unwrap();
        assert_eq!(
            treasury.create_stream(&authority(), stream_req(100), T),
            Err(TreasuryError::StreamAlreadyExists(stream.address))
        );
        assert_eq!(treasury.ledger().total_entities_created, 1);
    }

    #[test]
    fn test_stale_transition_conflicts() {
        let mut treasury = funded(1_000);
        let stream = treasury.create_stream(&authority(), stream_req(900), T).unwrap();

        // Two redeems computed from the same snapshot
        let first = stream::redeem(treasury.ledger(), &stream, &alice(), 100, T + 100).unwrap();
        let second = stream::redeem(treasury.ledger(), &stream, &alice(), 800, T + 100).unwrap();

        treasury.apply_stream(first).unwrap();
        let err = treasury.apply_stream(second).unwrap_err();
        assert!(matches!(err, TreasuryError::Conflict { record: "ledger", .. }));
        assert!(err.kind().is_retryable());

        // Nothing from the rejected transition leaked through
        assert_eq!(treasury.balance(&alice()), 100);
        assert_eq!(treasury.ledger().total_paid, 100);
        treasury.reconcile().unwrap();
    }

    #[test]
    fn test_redirected_payout_rejected() {
        let mut treasury = funded(1_000);
        let stream = treasury.create_stream(&authority(), stream_req(1_000), T).unwrap();
        let mallory = Address::named("mallory");

        let mut forged = stream::redeem(treasury.ledger(), &stream, &alice(), 500, T + 55).unwrap();
        forged.transfer.to = mallory;
        assert!(matches!(
            treasury.apply_stream(forged),
            Err(TreasuryError::InvalidTransition { record: "stream", .. })
        ));

        let mut inflated = stream::redeem(treasury.ledger(), &stream, &alice(), 500, T + 55).unwrap();
        inflated.transfer.amount = 1_000;
        assert!(treasury.apply_stream(inflated).is_err());

        let mut rewritten = stream::redeem(treasury.ledger(), &stream, &alice(), 500, T + 55).unwrap();
        rewritten.entity.end_time = T + 11;
        assert!(treasury.apply_stream(rewritten).is_err());

        assert_eq!(treasury.balance(&mallory), 0);
        assert_eq!(treasury.balance(&stream.address), 1_000);
        assert_eq!(treasury.ledger().total_paid, 0);
        treasury.reconcile().unwrap();
    }

    #[test]
    fn test_forged_allocation_rejected() {
        let mut treasury = funded(1_000);
        let mut forged = stream::create(treasury.ledger(), &authority(), stream_req(400), T).unwrap();
        forged.ledger.total_allocated = 0;
        assert!(matches!(
            treasury.apply_stream(forged),
            Err(TreasuryError::InvalidTransition { .. })
        ));
        assert_eq!(treasury.streams().count(), 0);
        assert_eq!(treasury.balance(&authority()), 1_000);
    }

    #[test]
    fn test_authority_swap_rejected() {
        let mut treasury = funded(10);
        let mut update = treasury.ledger().set_paused(&authority(), true, T).unwrap();
        update.ledger.authority = Address::named("mallory");
        assert!(matches!(
            treasury.apply_ledger(update),
            Err(TreasuryError::InvalidTransition { record: "ledger", .. })
        ));
        assert_eq!(treasury.ledger().authority, authority());
        assert!(treasury.ledger().is_treasury_active());
    }

    #[test]
    fn test_pause_blocks_creation_not_redemption() {
        let mut treasury = funded(1_000);
        let stream = treasury.create_stream(&authority(), stream_req(500), T).unwrap();
        treasury.set_paused(&authority(), true, T + 20).unwrap();

        assert_eq!(
            treasury.create_vesting(
                &authority(),
                CreateVesting {
                    recipient: alice(),
                    asset: mint(),
                    vesting_type: VestingType::Linear,
                    start_time: T,
                    end_time: T + 10,
                    cliff_time: T,
                    total_amount: 10,
                    category: PaymentCategory::Grants,
                    description: String::new(),
                },
                T + 20,
            ),
            Err(TreasuryError::TreasuryPaused)
        );
        assert!(treasury.redeem_stream(&stream.address, &alice(), 50, T + 30).is_ok());

        treasury.set_paused(&authority(), false, T + 40).unwrap();
        assert!(treasury.ledger().is_treasury_active());
        assert_eq!(treasury.ledger().governance.last_updated, T + 40);
    }

    #[test]
    fn test_limits_enforced_after_update() {
        let mut treasury = funded(10_000);
        treasury.set_limits(&authority(), 1_000, 1_500, T).unwrap();
        assert!(matches!(
            treasury.create_stream(&authority(), stream_req(1_001), T),
            Err(TreasuryError::StreamAmountExceedsLimit { .. })
        ));
        treasury.create_stream(&authority(), stream_req(1_000), T).unwrap();

        let mut req = stream_req(600);
        req.recipient = Address::named("carol");
        assert!(matches!(
            treasury.create_stream(&authority(), req, T),
            Err(TreasuryError::TotalAllocationExceedsLimit { .. })
        ));
    }

    #[test]
    fn test_unknown_entities() {
        let mut treasury = funded(10);
        let ghost = Address::named("ghost");
        assert_eq!(
            treasury.redeem_stream(&ghost, &alice(), 1, T),
            Err(TreasuryError::UnknownStream(ghost))
        );
        assert_eq!(
            treasury.claim_vesting(&ghost, &alice(), 1, T),
            Err(TreasuryError::UnknownVesting(ghost))
        );
    }

    #[test]
    fn test_from_parts_rejects_inconsistent_records() {
        let mut treasury = funded(1_000);
        let stream = treasury.create_stream(&authority(), stream_req(400), T).unwrap();

        let mut ledger = treasury.ledger().clone();
        ledger.total_paid = 1;
        let err = Treasury::from_parts(
            ledger,
            [stream],
            [],
            treasury.custody().clone(),
        )
        .unwrap_err();
        assert!(matches!(err, TreasuryError::ReconciliationMismatch { .. }));
    }
}
