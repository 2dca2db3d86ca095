//! Vesting grants, linear or cliff-gated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::address::{Address, vesting_address};
use crate::category::PaymentCategory;
use crate::constants::INITIAL_VERSION;
use crate::error::{Result, TreasuryError};
use crate::guard;
use crate::ledger::Ledger;
use crate::release::Schedule;
use crate::transition::{Entity, EntityKind, Record, Transfer, Transition};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VestingType {
    Linear,
    Cliff,
}

impl VestingType {
    pub fn as_str(self) -> &'static str {
        match self {
            VestingType::Linear => "linear",
            VestingType::Cliff => "cliff",
        }
    }
}

impl FromStr for VestingType {
    type Err = TreasuryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(VestingType::Linear),
            "cliff" => Ok(VestingType::Cliff),
            _ => Err(TreasuryError::InvalidVestingType(s.to_string())),
        }
    }
}

impl fmt::Display for VestingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VestingStatus {
    Active,
    Completed,
}

impl VestingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VestingStatus::Active => "active",
            VestingStatus::Completed => "completed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vesting {
    pub address: Address,
    pub ledger: Address,
    pub recipient: Address,
    pub creator: Address,
    pub funding_asset: Address,
    pub vesting_type: VestingType,
    pub total_amount: u64,
    pub claimed_amount: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub cliff_time: i64,
    pub category: PaymentCategory,
    pub description: String,
    pub status: VestingStatus,
    pub created_at: i64,
    pub version: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateVesting {
    pub recipient: Address,
    pub asset: Address,
    pub vesting_type: VestingType,
    pub start_time: i64,
    pub end_time: i64,
    pub cliff_time: i64,
    pub total_amount: u64,
    pub category: PaymentCategory,
    pub description: String,
}

impl Vesting {
    /// Linear grants ignore `cliff_time`; only cliff grants are gated by it.
    pub fn schedule(&self) -> Schedule {
        match self.vesting_type {
            VestingType::Linear => {
                Schedule::linear(self.total_amount, self.start_time, self.end_time)
            }
            VestingType::Cliff => Schedule::with_cliff(
                self.total_amount,
                self.start_time,
                self.end_time,
                self.cliff_time,
            ),
        }
    }

    /// Earliest time a claim can succeed.
    pub fn gate_time(&self) -> i64 {
        match self.vesting_type {
            VestingType::Linear => self.start_time,
            VestingType::Cliff => self.cliff_time,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == VestingStatus::Active
    }

    pub fn claimable_amount(&self, now: i64) -> u64 {
        if !self.is_active() {
            return 0;
        }
        self.schedule().available(now, self.claimed_amount)
    }

    pub fn remaining_amount(&self) -> u64 {
        self.total_amount.saturating_sub(self.claimed_amount)
    }

    pub fn progress_percentage(&self, now: i64) -> f64 {
        if self.total_amount == 0 {
            return 0.0;
        }
        self.schedule().unlocked_at(now) as f64 / self.total_amount as f64 * 100.0
    }
}

impl Record for Vesting {
    const NAME: &'static str = "vesting";

    fn address(&self) -> Address {
        self.address
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Entity for Vesting {
    const KIND: EntityKind = EntityKind::Vesting;

    fn ledger(&self) -> Address {
        self.ledger
    }

    fn recipient(&self) -> Address {
        self.recipient
    }

    fn funding_asset(&self) -> Address {
        self.funding_asset
    }

    fn total_amount(&self) -> u64 {
        self.total_amount
    }

    fn paid_amount(&self) -> u64 {
        self.claimed_amount
    }

    fn is_completed(&self) -> bool {
        self.status == VestingStatus::Completed
    }

    fn timing_defect(&self) -> Option<&'static str> {
        if self.end_time <= self.start_time {
            return Some("end time is not after start time");
        }
        if self.cliff_time < self.start_time || self.cliff_time > self.end_time {
            return Some("cliff time is outside the schedule");
        }
        None
    }

    fn same_terms(&self, other: &Self) -> bool {
        let aligned = Vesting {
            claimed_amount: other.claimed_amount,
            status: other.status,
            version: other.version,
            ..self.clone()
        };
        aligned == *other
    }
}

pub fn create(
    ledger: &Ledger,
    caller: &Address,
    req: CreateVesting,
    now: i64,
) -> Result<Transition<Vesting>> {
    guard::authorize_creator(ledger, caller, EntityKind::Vesting)?;
    if req.asset != ledger.funding_asset {
        return Err(TreasuryError::InvalidMint);
    }
    if req.total_amount == 0 {
        return Err(TreasuryError::InvalidTotalAmount);
    }
    if req.end_time <= req.start_time {
        return Err(TreasuryError::InvalidVestingTiming);
    }
    guard::check_description(&req.description)?;
    if req.cliff_time < req.start_time || req.cliff_time > req.end_time {
        return Err(TreasuryError::InvalidCliffTiming);
    }
    guard::check_creation(ledger, req.total_amount)?;

    let address = vesting_address(&ledger.id, &req.recipient);
    let mut next_ledger = ledger.successor();
    next_ledger.record_allocation(req.total_amount)?;

    let vesting = Vesting {
        address,
        ledger: ledger.id,
        recipient: req.recipient,
        creator: *caller,
        funding_asset: req.asset,
        vesting_type: req.vesting_type,
        total_amount: req.total_amount,
        claimed_amount: 0,
        start_time: req.start_time,
        end_time: req.end_time,
        cliff_time: req.cliff_time,
        category: req.category,
        description: req.description,
        status: VestingStatus::Active,
        created_at: now,
        version: INITIAL_VERSION,
    };

    Ok(Transition {
        ledger: next_ledger,
        transfer: Transfer {
            asset: ledger.funding_asset,
            from: ledger.authority,
            to: address,
            amount: vesting.total_amount,
        },
        entity: vesting,
    })
}

pub fn claim(
    ledger: &Ledger,
    vesting: &Vesting,
    caller: &Address,
    amount: u64,
    now: i64,
) -> Result<Transition<Vesting>> {
    if vesting.ledger != ledger.id {
        return Err(TreasuryError::UnknownVesting(vesting.address));
    }
    if *caller != vesting.recipient || vesting_address(&ledger.id, caller) != vesting.address {
        return Err(TreasuryError::UnauthorizedVestingClaim);
    }
    if amount == 0 {
        return Err(TreasuryError::InvalidClaimAmount);
    }
    if now < vesting.gate_time() {
        return Err(TreasuryError::VestingNotStarted);
    }
    if !vesting.is_active() {
        return Err(TreasuryError::VestingNotActive);
    }

    let available = vesting.schedule().available(now, vesting.claimed_amount);
    if amount > available {
        return Err(TreasuryError::InsufficientUnlockedTokens {
            requested: amount,
            available,
        });
    }

    let mut next = vesting.clone();
    next.claimed_amount += amount;
    next.version += 1;
    if next.claimed_amount == next.total_amount {
        next.status = VestingStatus::Completed;
    }

    let mut next_ledger = ledger.successor();
    next_ledger.record_payment(amount)?;

    Ok(Transition {
        ledger: next_ledger,
        entity: next,
        transfer: Transfer {
            asset: vesting.funding_asset,
            from: vesting.address,
            to: vesting.recipient,
            amount,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const T: i64 = 1_771_632_000;

    fn authority() -> Address {
        Address::named("authority")
    }

    fn bob() -> Address {
        Address::named("bob")
    }

    fn mint() -> Address {
        Address::named("mint")
    }

    fn ledger() -> Ledger {
        Ledger::init(authority(), mint(), T).unwrap()
    }

    fn request(
        vesting_type: VestingType,
        total: u64,
        start: i64,
        end: i64,
        cliff: i64,
    ) -> CreateVesting {
        CreateVesting {
            recipient: bob(),
            asset: mint(),
            vesting_type,
            start_time: start,
            end_time: end,
            cliff_time: cliff,
            total_amount: total,
            category: PaymentCategory::Development,
            description: "advisor grant".to_string(),
        }
    }

    fn created(req: CreateVesting) -> (Ledger, Vesting) {
        let t = create(&ledger(), &authority(), req, T).unwrap();
        (t.ledger, t.entity)
    }

    #[test]
    fn test_vesting_type_parse() {
        assert_eq!("Cliff".parse::<VestingType>().unwrap(), VestingType::Cliff);
        assert_eq!(" linear ".parse::<VestingType>().unwrap(), VestingType::Linear);
        assert_eq!(
            "graded".parse::<VestingType>(),
            Err(TreasuryError::InvalidVestingType("graded".to_string()))
        );
    }

    #[test]
    fn test_create_vesting() {
        let ledger = ledger();
        let t = create(
            &ledger,
            &authority(),
            request(VestingType::Cliff, 1_200, T, T + 1_200, T + 300),
            T,
        )
        .unwrap();
        assert_eq!(t.entity.address, vesting_address(&ledger.id, &bob()));
        assert_eq!(t.entity.claimed_amount, 0);
        assert_eq!(t.entity.status, VestingStatus::Active);
        assert_eq!(t.ledger.total_allocated, 1_200);
        assert_eq!(t.transfer.to, t.entity.address);
        assert_eq!(t.transfer.from, authority());
    }

    #[test]
    fn test_create_timing_errors() {
        let ledger = ledger();
        assert_eq!(
            create(&ledger, &authority(), request(VestingType::Linear, 100, T + 10, T, T + 10), T),
            Err(TreasuryError::InvalidVestingTiming)
        );
        assert_eq!(
            create(&ledger, &authority(), request(VestingType::Cliff, 100, T, T + 10, T - 1), T),
            Err(TreasuryError::InvalidCliffTiming)
        );
        assert_eq!(
            create(&ledger, &authority(), request(VestingType::Cliff, 100, T, T + 10, T + 11), T),
            Err(TreasuryError::InvalidCliffTiming)
        );
    }

    #[test]
    fn test_only_authority_creates() {
        assert_eq!(
            create(&ledger(), &bob(), request(VestingType::Linear, 100, T, T + 10, T), T),
            Err(TreasuryError::UnauthorizedVestingCreation)
        );
    }

    #[test]
    fn test_cliff_gates_visibility_not_accrual() {
        let (ledger, vesting) = created(request(VestingType::Cliff, 1_000, T, T + 1_000, T + 250));

        assert_eq!(vesting.claimable_amount(T + 100), 0);
        assert_eq!(
            claim(&ledger, &vesting, &bob(), 1, T + 100),
            Err(TreasuryError::VestingNotStarted)
        );

        // At the cliff everything accrued since start becomes visible
        assert_eq!(vesting.claimable_amount(T + 250), 250);
        let t = claim(&ledger, &vesting, &bob(), 250, T + 250).unwrap();
        assert_eq!(t.entity.claimed_amount, 250);
        assert_eq!(t.ledger.total_paid, 250);
    }

    #[test]
    fn test_linear_claims_from_start() {
        let (ledger, vesting) = created(request(VestingType::Linear, 1_000, T, T + 100, T));
        assert_eq!(
            claim(&ledger, &vesting, &bob(), 1, T - 1),
            Err(TreasuryError::VestingNotStarted)
        );
        assert_eq!(
            claim(&ledger, &vesting, &bob(), 101, T + 10),
            Err(TreasuryError::InsufficientUnlockedTokens {
                requested: 101,
                available: 100
            })
        );
        assert!(claim(&ledger, &vesting, &bob(), 100, T + 10).is_ok());
    }

    #[test]
    fn test_claim_authorization_and_amount() {
        let (ledger, vesting) = created(request(VestingType::Linear, 1_000, T, T + 100, T));
        assert_eq!(
            claim(&ledger, &vesting, &authority(), 10, T + 50),
            Err(TreasuryError::UnauthorizedVestingClaim)
        );
        assert_eq!(
            claim(&ledger, &vesting, &bob(), 0, T + 50),
            Err(TreasuryError::InvalidClaimAmount)
        );
    }

    #[test]
    fn test_full_claim_completes() {
        let (ledger, vesting) = created(request(VestingType::Cliff, 1_000, T, T + 100, T + 50));
        let t = claim(&ledger, &vesting, &bob(), 1_000, T + 100).unwrap();
        assert_eq!(t.entity.status, VestingStatus::Completed);
        assert_eq!(t.entity.remaining_amount(), 0);
        assert_eq!(
            claim(&t.ledger, &t.entity, &bob(), 1, T + 101),
            Err(TreasuryError::VestingNotActive)
        );
    }

    #[test]
    fn test_progress_percentage_respects_cliff() {
        let (_, vesting) = created(request(VestingType::Cliff, 1_000, T, T + 100, T + 40));
        assert_relative_eq!(vesting.progress_percentage(T + 20), 0.0);
        assert_relative_eq!(vesting.progress_percentage(T + 40), 40.0);
    }
}
