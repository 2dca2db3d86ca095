//! Continuous payment streams.
//!
//! A stream escrows its full amount at creation and unlocks it linearly
//! between `start_time` and `end_time`. Only the recipient can redeem, and
//! only what has unlocked and not yet been withdrawn.

use serde::{Deserialize, Serialize};

use crate::address::{Address, stream_address};
use crate::category::PaymentCategory;
use crate::constants::INITIAL_VERSION;
use crate::error::{Result, TreasuryError};
use crate::guard;
use crate::ledger::Ledger;
use crate::release::Schedule;
use crate::transition::{Entity, EntityKind, Record, Transfer, Transition};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Active,
    Completed,
}

impl StreamStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamStatus::Active => "active",
            StreamStatus::Completed => "completed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    /// Derived from `["stream", ledger, recipient]`; also the escrow account.
    pub address: Address,
    pub ledger: Address,
    pub recipient: Address,
    pub creator: Address,
    pub funding_asset: Address,
    pub total_amount: u64,
    pub withdrawn_amount: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub category: PaymentCategory,
    pub description: String,
    pub status: StreamStatus,
    pub created_at: i64,
    pub version: u64,
}

/// Parameters for [`create`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateStream {
    pub recipient: Address,
    pub asset: Address,
    pub start_time: i64,
    pub end_time: i64,
    pub total_amount: u64,
    pub category: PaymentCategory,
    pub description: String,
}

impl Stream {
    pub fn schedule(&self) -> Schedule {
        Schedule::linear(self.total_amount, self.start_time, self.end_time)
    }

    pub fn is_active(&self) -> bool {
        self.status == StreamStatus::Active
    }

    /// What the recipient could redeem right now.
    pub fn withdrawable_amount(&self, now: i64) -> u64 {
        if !self.is_active() {
            return 0;
        }
        self.schedule().available(now, self.withdrawn_amount)
    }

    /// Still held in escrow.
    pub fn remaining_amount(&self) -> u64 {
        self.total_amount.saturating_sub(self.withdrawn_amount)
    }

    pub fn progress_percentage(&self, now: i64) -> f64 {
        if self.total_amount == 0 {
            return 0.0;
        }
        self.schedule().unlocked_at(now) as f64 / self.total_amount as f64 * 100.0
    }
}

impl Record for Stream {
    const NAME: &'static str = "stream";

    fn address(&self) -> Address {
        self.address
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Entity for Stream {
    const KIND: EntityKind = EntityKind::Stream;

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
        self.withdrawn_amount
    }

    fn is_completed(&self) -> bool {
        self.status == StreamStatus::Completed
    }

    fn timing_defect(&self) -> Option<&'static str> {
        (self.end_time <= self.start_time).then_some("end time is not after start time")
    }

    fn same_terms(&self, other: &Self) -> bool {
        let aligned = Stream {
            withdrawn_amount: other.withdrawn_amount,
            status: other.status,
            version: other.version,
            ..self.clone()
        };
        aligned == *other
    }
}

/// Build the transition that opens a stream funded from the authority's balance.
pub fn create(
    ledger: &Ledger,
    caller: &Address,
    req: CreateStream,
    now: i64,
) -> Result<Transition<Stream>> {
    guard::authorize_creator(ledger, caller, EntityKind::Stream)?;
    if req.asset != ledger.funding_asset {
        return Err(TreasuryError::InvalidMint);
    }
    if req.total_amount == 0 {
        return Err(TreasuryError::InvalidTotalAmount);
    }
    if req.end_time <= req.start_time {
        return Err(TreasuryError::InvalidStreamTiming);
    }
    guard::check_description(&req.description)?;
    guard::check_creation(ledger, req.total_amount)?;

    let address = stream_address(&ledger.id, &req.recipient);
    let mut next_ledger = ledger.successor();
    next_ledger.record_allocation(req.total_amount)?;

    let stream = Stream {
        address,
        ledger: ledger.id,
        recipient: req.recipient,
        creator: *caller,
        funding_asset: req.asset,
        total_amount: req.total_amount,
        withdrawn_amount: 0,
        start_time: req.start_time,
        end_time: req.end_time,
        category: req.category,
        description: req.description,
        status: StreamStatus::Active,
        created_at: now,
        version: INITIAL_VERSION,
    };

    let transfer = Transfer {
        asset: ledger.funding_asset,
        from: ledger.authority,
        to: address,
        amount: req.total_amount,
    };

    Ok(Transition {
        ledger: next_ledger,
        entity: stream,
        transfer,
    })
}

/// Build the transition that pays `amount` of unlocked value to the recipient.
pub fn redeem(
    ledger: &Ledger,
    stream: &Stream,
    caller: &Address,
    amount: u64,
    now: i64,
) -> Result<Transition<Stream>> {
    if stream.ledger != ledger.id {
        return Err(TreasuryError::UnknownStream(stream.address));
    }
    // The caller must be the recipient and must derive this exact escrow
    if *caller != stream.recipient || stream_address(&ledger.id, caller) != stream.address {
        return Err(TreasuryError::UnauthorizedWithdrawal);
    }
    if amount == 0 {
        return Err(TreasuryError::InvalidWithdrawalAmount);
    }
    if now < stream.start_time {
        return Err(TreasuryError::StreamNotStarted);
    }
    if !stream.is_active() {
        return Err(TreasuryError::StreamNotActive);
    }

    let available = stream.schedule().available(now, stream.withdrawn_amount);
    if amount > available {
        return Err(TreasuryError::InsufficientUnlockedTokens {
            requested: amount,
            available,
        });
    }

    let mut next_stream = stream.clone();
    // amount <= unlocked - withdrawn <= total - withdrawn, so this cannot overflow
    next_stream.withdrawn_amount += amount;
    next_stream.version += 1;
    if next_stream.withdrawn_amount == next_stream.total_amount {
        next_stream.status = StreamStatus::Completed;
    }

    let mut next_ledger = ledger.successor();
    next_ledger.record_payment(amount)?;

    Ok(Transition {
        ledger: next_ledger,
        entity: next_stream,
        transfer: Transfer {
            asset: stream.funding_asset,
            from: stream.address,
            to: stream.recipient,
            amount,
        },
    })
}
