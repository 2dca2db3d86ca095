/// Maximum stream/vesting description length in bytes.
pub const MAX_DESCRIPTION_LEN: usize = 64;

/// Basis-point denominator for progress reporting (100% = 10_000).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Derivation seed for a DAO ledger: `["dao", authority]`.
pub const LEDGER_SEED: &[u8] = b"dao";

/// Derivation seed for a stream record and its escrow: `["stream", ledger, recipient]`.
pub const STREAM_SEED: &[u8] = b"stream";

/// Derivation seed for a vesting record and its escrow: `["vesting", ledger, recipient]`.
pub const VESTING_SEED: &[u8] = b"vesting";

/// Derivation seed for human-named principals: `["principal", name]`.
pub const PRINCIPAL_SEED: &[u8] = b"principal";

/// Version stamped on freshly created records.
pub const INITIAL_VERSION: u64 = 1;
