//! JSON snapshot of a treasury, wire format 1.0.0.
//!
//! camelCase field names, addresses as 64-char hex, enums as lowercase
//! strings. Amounts are plain JSON numbers; every `u64` round-trips through
//! `serde_json` exactly.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::custody::InMemoryCustody;
use crate::error::TreasuryError;
use crate::ledger::Ledger;
use crate::stream::Stream;
use crate::time::unix_to_iso8601;
use crate::treasury::Treasury;
use crate::vesting::Vesting;

pub const CURRENT_VERSION: &str = "1.0.0";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TreasurySnapshot {
    pub version: String,
    pub timestamp: String,
    pub ledger: Ledger,
    #[serde(default)]
    pub streams: Vec<Stream>,
    #[serde(default)]
    pub vestings: Vec<Vesting>,
    #[serde(default)]
    pub balances: Vec<BalanceEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BalanceEntry {
    pub asset: Address,
    pub owner: Address,
    pub amount: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot version {found} (expected {expected})", expected = CURRENT_VERSION)]
    UnsupportedVersion { found: String },
    #[error(transparent)]
    Treasury(#[from] TreasuryError),
}

impl TreasurySnapshot {
    /// Assemble a snapshot. Zero balances are dropped and the rest sorted,
    /// so equal state always exports to equal JSON.
    pub fn capture(
        ledger: Ledger,
        streams: Vec<Stream>,
        vestings: Vec<Vesting>,
        balances: impl IntoIterator<Item = BalanceEntry>,
        now: i64,
    ) -> Self {
        let mut balances: Vec<BalanceEntry> =
            balances.into_iter().filter(|b| b.amount > 0).collect();
        balances.sort();
        Self {
            version: CURRENT_VERSION.to_string(),
            timestamp: unix_to_iso8601(now),
            ledger,
            streams,
            vestings,
            balances,
        }
    }

    pub fn from_treasury(treasury: &Treasury<InMemoryCustody>, now: i64) -> Self {
        let balances = treasury
            .custody()
            .accounts()
            .map(|(asset, owner, amount)| BalanceEntry {
                asset: *asset,
                owner: *owner,
                amount,
            })
            .collect::<Vec<_>>();
        Self::capture(
            treasury.ledger().clone(),
            treasury.streams().cloned().collect(),
            treasury.vestings().cloned().collect(),
            balances,
            now,
        )
    }

    /// Rebuild an in-memory treasury. Fails if the records do not reconcile.
    pub fn into_treasury(self) -> Result<Treasury<InMemoryCustody>, SnapshotError> {
        if self.version.split('.').next() != CURRENT_VERSION.split('.').next() {
            return Err(SnapshotError::UnsupportedVersion {
                found: self.version,
            });
        }
        let mut custody = InMemoryCustody::new();
        for entry in &self.balances {
            custody
                .deposit(entry.asset, entry.owner, entry.amount)
                .map_err(TreasuryError::from)?;
        }
        Ok(Treasury::from_parts(
            self.ledger,
            self.streams,
            self.vestings,
            custody,
        )?)
    }
}

pub fn export_json(treasury: &Treasury<InMemoryCustody>, now: i64) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&TreasurySnapshot::from_treasury(treasury, now))
}

pub fn import_json(json: &str) -> Result<Treasury<InMemoryCustody>, SnapshotError> {
    let snapshot: TreasurySnapshot = serde_json::from_str(json)?;
    snapshot.into_treasury()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::PaymentCategory;
    use crate::custody::Custody;
    use crate::stream::CreateStream;
    use crate::vesting::{CreateVesting, VestingType};

    const T: i64 = 1_771_632_000;

    fn populated() -> Treasury {
        let authority = Address::named("authority");
        let mint = Address::named("mint");
        let mut custody = InMemoryCustody::new();
        custody.deposit(mint, authority, 10_000).unwrap();
        let mut treasury = Treasury::init(authority, mint, custody, T).unwrap();

        let stream = treasury
            .create_stream(
                &authority,
                CreateStream {
                    recipient: Address::named("alice"),
                    asset: mint,
                    start_time: T,
                    end_time: T + 100,
                    total_amount: 1_000,
                    category: PaymentCategory::Grants,
                    description: "grant".to_string(),
                },
                T,
            )
            .unwrap();
        treasury
            .redeem_stream(&stream.address, &Address::named("alice"), 300, T + 30)
            .unwrap();
        treasury
            .create_vesting(
                &authority,
                CreateVesting {
                    recipient: Address::named("bob"),
                    asset: mint,
                    vesting_type: VestingType::Cliff,
                    start_time: T,
                    end_time: T + 400,
                    cliff_time: T + 100,
                    total_amount: 2_000,
                    category: PaymentCategory::Development,
                    description: "engineer".to_string(),
                },
                T,
            )
            .unwrap();
        treasury
    }

    #[test]
    fn test_roundtrip_preserves_state() {
        let treasury = populated();
        let json = export_json(&treasury, T + 50).unwrap();
        let restored = import_json(&json).unwrap();

        assert_eq!(restored.ledger(), treasury.ledger());
        assert_eq!(
            restored.streams().collect::<Vec<_>>(),
            treasury.streams().collect::<Vec<_>>()
        );
        assert_eq!(
            restored.vestings().collect::<Vec<_>>(),
            treasury.vestings().collect::<Vec<_>>()
        );
        let mint = treasury.ledger().funding_asset;
        assert_eq!(restored.custody().balance(&mint, &Address::named("alice")), 300);
    }

    #[test]
    fn test_wire_shape() {
        let json = export_json(&populated(), T).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["version"], CURRENT_VERSION);
        assert_eq!(value["timestamp"], "2026-02-21T00:00:00Z");
        assert_eq!(value["ledger"]["totalAllocated"], 3_000);
        assert_eq!(value["ledger"]["governance"]["isPaused"], false);
        assert_eq!(value["streams"][0]["withdrawnAmount"], 300);
        assert_eq!(value["streams"][0]["status"], "active");
        assert_eq!(value["vestings"][0]["vestingType"], "cliff");
        assert_eq!(value["vestings"][0]["category"], "development");
        assert_eq!(value["ledger"]["authority"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_rejects_other_major_version() {
        let json = export_json(&populated(), T)
            .unwrap()
            .replace("\"1.0.0\"", "\"2.0.0\"");
        assert!(matches!(
            import_json(&json),
            Err(SnapshotError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_rejects_tampered_aggregates() {
        let mut snapshot = TreasurySnapshot::from_treasury(&populated(), T);
        snapshot.ledger.total_paid += 1;
        assert!(matches!(
            snapshot.into_treasury(),
            Err(SnapshotError::Treasury(TreasuryError::ReconciliationMismatch { .. }))
        ));
    }

    #[test]
    fn test_rejects_tampered_records() {
        let mut snapshot = TreasurySnapshot::from_treasury(&populated(), T);
        let stream = &mut snapshot.streams[0];
        stream.end_time = stream.start_time - 50;
        stream.status = crate::stream::StreamStatus::Completed;
        assert!(matches!(
            snapshot.into_treasury(),
            Err(SnapshotError::Treasury(TreasuryError::MalformedRecord { record: "stream", .. }))
        ));

        let mut snapshot = TreasurySnapshot::from_treasury(&populated(), T);
        snapshot.vestings[0].recipient = Address::named("mallory");
        assert!(matches!(
            snapshot.into_treasury(),
            Err(SnapshotError::Treasury(TreasuryError::MalformedRecord { record: "vesting", .. }))
        ));

        let mut snapshot = TreasurySnapshot::from_treasury(&populated(), T);
        snapshot.ledger.authority = Address::named("mallory");
        assert!(matches!(
            snapshot.into_treasury(),
            Err(SnapshotError::Treasury(TreasuryError::MalformedRecord { record: "ledger", .. }))
        ));
    }
}
