use thiserror::Error;

use crate::address::Address;
use crate::custody::CustodyError;

/// Every way a treasury operation can be rejected.
///
/// A rejected operation never leaves partial state behind: engines compute
/// transitions without touching stored records, and commits validate
/// everything before applying anything.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreasuryError {
    // --- Validation ---
    #[error("invalid stream timing: start time must be before end time")]
    InvalidStreamTiming,

    #[error("invalid vesting timing: start time must be before end time")]
    InvalidVestingTiming,

    #[error("invalid cliff timing: cliff time must be between start and end time")]
    InvalidCliffTiming,

    #[error("total amount must be greater than 0")]
    InvalidTotalAmount,

    #[error("invalid withdrawal amount: must be greater than 0")]
    InvalidWithdrawalAmount,

    #[error("invalid claim amount: must be greater than 0")]
    InvalidClaimAmount,

    #[error("description is too long: {len} bytes (max {max})")]
    DescriptionTooLong { len: usize, max: usize },

    #[error("invalid payment category: {0}")]
    InvalidPaymentCategory(String),

    #[error("invalid vesting type: {0}")]
    InvalidVestingType(String),

    #[error("invalid mint: asset must match the treasury funding asset and be non-zero")]
    InvalidMint,

    #[error("invalid governance settings: {0}")]
    InvalidGovernanceSettings(String),

    // --- Temporal ---
    #[error("stream has not started yet")]
    StreamNotStarted,

    #[error("vesting has not started yet")]
    VestingNotStarted,

    // --- Entitlement ---
    #[error("insufficient unlocked tokens: requested {requested}, available {available}")]
    InsufficientUnlockedTokens { requested: u64, available: u64 },

    #[error("insufficient treasury balance: required {required}, available {available}")]
    InsufficientTreasuryBalance { required: u64, available: u64 },

    #[error("custody rejected transfer: {0}")]
    Custody(CustodyError),

    // --- Authorization ---
    #[error("unauthorized: only the recipient can withdraw from this stream")]
    UnauthorizedWithdrawal,

    #[error("unauthorized: only the recipient can claim from this vesting")]
    UnauthorizedVestingClaim,

    #[error("unauthorized: only the DAO authority can create streams")]
    UnauthorizedStreamCreation,

    #[error("unauthorized: only the DAO authority can create vesting")]
    UnauthorizedVestingCreation,

    #[error("unauthorized: only the DAO authority can modify treasury settings")]
    UnauthorizedTreasuryModification,

    // --- Lifecycle ---
    #[error("stream is not in active status")]
    StreamNotActive,

    #[error("vesting is not in active status")]
    VestingNotActive,

    #[error("stream already exists for this recipient: {0}")]
    StreamAlreadyExists(Address),

    #[error("vesting already exists for this recipient: {0}")]
    VestingAlreadyExists(Address),

    #[error("unknown ledger: {0}")]
    UnknownLedger(Address),

    #[error("unknown stream: {0}")]
    UnknownStream(Address),

    #[error("unknown vesting: {0}")]
    UnknownVesting(Address),

    // --- Governance ---
    #[error("treasury operations are currently paused")]
    TreasuryPaused,

    #[error("amount {amount} exceeds maximum allowed per entity ({limit})")]
    StreamAmountExceedsLimit { amount: u64, limit: u64 },

    #[error("total allocation would exceed treasury limit: allocated {allocated} + {amount} > {limit}")]
    TotalAllocationExceedsLimit {
        allocated: u64,
        amount: u64,
        limit: u64,
    },

    // --- Concurrency ---
    #[error("stale {record} {address}: expected version {expected}, found {found}")]
    Conflict {
        record: &'static str,
        address: Address,
        expected: u64,
        found: u64,
    },

    // --- Integrity ---
    #[error("malformed {record} {address}: {reason}")]
    MalformedRecord {
        record: &'static str,
        address: Address,
        reason: &'static str,
    },

    #[error("invalid {record} transition {address}: {reason}")]
    InvalidTransition {
        record: &'static str,
        address: Address,
        reason: &'static str,
    },

    #[error("reconciliation mismatch on {field}: recorded {recorded}, computed {computed}")]
    ReconciliationMismatch {
        field: String,
        recorded: u64,
        computed: u64,
    },
}

/// Coarse classification used by callers to decide what to do with a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Temporal,
    Entitlement,
    Authorization,
    Lifecycle,
    Governance,
    Concurrency,
    Integrity,
}

impl ErrorKind {
    /// Whether the same caller can eventually succeed by waiting, correcting
    /// input, or recomputing from fresh state.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorKind::Authorization | ErrorKind::Lifecycle | ErrorKind::Integrity
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Temporal => "temporal",
            ErrorKind::Entitlement => "entitlement",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Lifecycle => "lifecycle",
            ErrorKind::Governance => "governance",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::Integrity => "integrity",
        }
    }
}

impl TreasuryError {
    pub fn kind(&self) -> ErrorKind {
        use TreasuryError::*;
        match self {
            InvalidStreamTiming
            | InvalidVestingTiming
            | InvalidCliffTiming
            | InvalidTotalAmount
            | InvalidWithdrawalAmount
            | InvalidClaimAmount
            | DescriptionTooLong { .. }
            | InvalidPaymentCategory(_)
            | InvalidVestingType(_)
            | InvalidMint
            | InvalidGovernanceSettings(_) => ErrorKind::Validation,
            StreamNotStarted | VestingNotStarted => ErrorKind::Temporal,
            InsufficientUnlockedTokens { .. } | InsufficientTreasuryBalance { .. } | Custody(_) => {
                ErrorKind::Entitlement
            }
            UnauthorizedWithdrawal
            | UnauthorizedVestingClaim
            | UnauthorizedStreamCreation
            | UnauthorizedVestingCreation
            | UnauthorizedTreasuryModification => ErrorKind::Authorization,
            StreamNotActive
            | VestingNotActive
            | StreamAlreadyExists(_)
            | VestingAlreadyExists(_)
            | UnknownLedger(_)
            | UnknownStream(_)
            | UnknownVesting(_) => ErrorKind::Lifecycle,
            TreasuryPaused | StreamAmountExceedsLimit { .. } | TotalAllocationExceedsLimit { .. } => {
                ErrorKind::Governance
            }
            Conflict { .. } => ErrorKind::Concurrency,
            MalformedRecord { .. } | InvalidTransition { .. } | ReconciliationMismatch { .. } => {
                ErrorKind::Integrity
            }
        }
    }
}

impl From<CustodyError> for TreasuryError {
    fn from(e: CustodyError) -> Self {
        match e {
            CustodyError::InsufficientBalance {
                required,
                available,
                ..
            } => TreasuryError::InsufficientTreasuryBalance {
                required,
                available,
            },
            other => TreasuryError::Custody(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TreasuryError>;
