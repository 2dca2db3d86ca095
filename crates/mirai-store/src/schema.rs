use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

/// Amounts are `u64` and may exceed SQLite's signed 64-bit INTEGER range, so
/// every amount column is TEXT holding the decimal value.
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // Fails harmlessly on in-memory and fresh databases
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::debug!("startup WAL checkpoint complete");
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ledgers (
            id                     TEXT PRIMARY KEY,
            authority              TEXT NOT NULL,
            funding_asset          TEXT NOT NULL,
            created_at             INTEGER NOT NULL,
            total_entities_created TEXT NOT NULL DEFAULT '0',
            total_allocated        TEXT NOT NULL DEFAULT '0',
            total_paid             TEXT NOT NULL DEFAULT '0',
            is_paused              INTEGER NOT NULL DEFAULT 0,
            max_entity_amount      TEXT NOT NULL,
            max_total_allocation   TEXT NOT NULL,
            governance_updated_at  INTEGER NOT NULL,
            version                INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS streams (
            address          TEXT PRIMARY KEY,
            ledger_id        TEXT NOT NULL REFERENCES ledgers(id),
            recipient        TEXT NOT NULL,
            creator          TEXT NOT NULL,
            funding_asset    TEXT NOT NULL,
            total_amount     TEXT NOT NULL,
            withdrawn_amount TEXT NOT NULL DEFAULT '0',
            start_time       INTEGER NOT NULL,
            end_time         INTEGER NOT NULL,
            category         TEXT NOT NULL,
            description      TEXT NOT NULL DEFAULT '',
            status           TEXT NOT NULL DEFAULT 'active',
            created_at       INTEGER NOT NULL,
            version          INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vestings (
            address        TEXT PRIMARY KEY,
            ledger_id      TEXT NOT NULL REFERENCES ledgers(id),
            recipient      TEXT NOT NULL,
            creator        TEXT NOT NULL,
            funding_asset  TEXT NOT NULL,
            vesting_type   TEXT NOT NULL,
            total_amount   TEXT NOT NULL,
            claimed_amount TEXT NOT NULL DEFAULT '0',
            start_time     INTEGER NOT NULL,
            end_time       INTEGER NOT NULL,
            cliff_time     INTEGER NOT NULL,
            category       TEXT NOT NULL,
            description    TEXT NOT NULL DEFAULT '',
            status         TEXT NOT NULL DEFAULT 'active',
            created_at     INTEGER NOT NULL,
            version        INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS balances (
            asset  TEXT NOT NULL,
            owner  TEXT NOT NULL,
            amount TEXT NOT NULL,
            PRIMARY KEY (asset, owner)
        );

        CREATE INDEX IF NOT EXISTS idx_streams_ledger ON streams(ledger_id);
        CREATE INDEX IF NOT EXISTS idx_vestings_ledger ON vestings(ledger_id);
        ",
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        for table in &["metadata", "ledgers", "streams", "vestings", "balances"] {
            let count: i64 = conn
                .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(count, 0, "table {table} should exist and be empty");
        }
    }

    #[test]
    fn test_schema_version_set() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_idempotent_initialize() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
    }

    #[test]
    fn test_busy_timeout_set() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 5000);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let orphan = conn.execute(
            "INSERT INTO streams (address, ledger_id, recipient, creator, funding_asset,
                total_amount, start_time, end_time, category, created_at, version)
             VALUES ('s', 'missing', 'r', 'c', 'a', '1', 0, 1, 'other', 0, 1)",
            [],
        );
        assert!(orphan.is_err(), "stream without a ledger must be rejected");
    }

    #[test]
    fn test_amounts_above_i64_survive() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        conn.execute(
            "INSERT INTO balances (asset, owner, amount) VALUES ('a', 'o', ?1)",
            [u64::MAX.to_string()],
        )
        .unwrap();
        let amount: String = conn
            .query_row("SELECT amount FROM balances", [], |row| row.get(0))
            .unwrap();
        assert_eq!(amount.parse::<u64>().unwrap(), u64::MAX);
    }
}
