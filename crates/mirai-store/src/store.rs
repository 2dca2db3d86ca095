use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

use mirai_core::{
    Address, BalanceEntry, CreateStream, CreateVesting, CustodyError, Entity, GovernanceSettings,
    GovernanceUpdate, InMemoryCustody, Ledger, Reconciliation, Stream, StreamStatus, Transfer,
    Transition, Treasury, TreasuryError, Vesting, VestingStatus, check_successor, reconcile, stream,
    vesting,
};

use crate::error::{Result, StoreError};
use crate::schema;

/// SQLite-backed treasury state.
///
/// Reads are plain queries. Every write that changes ledger aggregates goes
/// through a commit that runs inside one `IMMEDIATE` transaction: the ledger
/// and entity versions are compared first, then the records are written and
/// the custody transfer applied. Any failure rolls the whole commit back.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn write_tx(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM metadata WHERE key = ?1")?;
        let result = stmt.query_row([key], |row| row.get(0)).optional()?;
        Ok(result)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // --- Ledgers ---

    /// Store a freshly initialized ledger. Fails if one already exists for
    /// the same authority.
    pub fn insert_ledger(&self, ledger: &Ledger) -> Result<()> {
        let tx = self.write_tx()?;
        if ledger_version_on(&tx, &ledger.id)?.is_some() {
            return Err(StoreError::LedgerExists(ledger.id));
        }
        insert_ledger_on(&tx, ledger)?;
        tx.commit()?;
        tracing::info!(ledger = %ledger.id, authority = %ledger.authority, "ledger stored");
        Ok(())
    }

    pub fn init_ledger(
        &self,
        authority: Address,
        funding_asset: Address,
        limits: Option<(u64, u64)>,
        now: i64,
    ) -> Result<Ledger> {
        let mut ledger = Ledger::init(authority, funding_asset, now)?;
        if let Some((max_entity_amount, max_total_allocation)) = limits {
            ledger = ledger.with_limits(max_entity_amount, max_total_allocation)?;
        }
        self.insert_ledger(&ledger)?;
        Ok(ledger)
    }

    pub fn load_ledger(&self, id: &Address) -> Result<Ledger> {
        load_ledger_on(&self.conn, id)?.ok_or_else(|| TreasuryError::UnknownLedger(*id).into())
    }

    pub fn ledger_ids(&self) -> Result<Vec<Address>> {
        let mut stmt = self.conn.prepare("SELECT id FROM ledgers ORDER BY rowid")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        ids.iter().map(|id| parse_address("ledger id", id)).collect()
    }

    // --- Entities ---

    pub fn load_stream(&self, address: &Address) -> Result<Stream> {
        Stream::load_on(&self.conn, address)?
            .ok_or_else(|| TreasuryError::UnknownStream(*address).into())
    }

    pub fn load_streams(&self, ledger: &Address) -> Result<Vec<Stream>> {
        let sql =
            format!("SELECT {STREAM_COLUMNS} FROM streams WHERE ledger_id = ?1 ORDER BY rowid");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows: Vec<StreamRow> = stmt
            .query_map([ledger.to_hex()], StreamRow::from_row)?
            .collect::<std::result::Result<_, _>>()?;
        rows.into_iter().map(StreamRow::into_stream).collect()
    }

    pub fn load_vesting(&self, address: &Address) -> Result<Vesting> {
        Vesting::load_on(&self.conn, address)?
            .ok_or_else(|| TreasuryError::UnknownVesting(*address).into())
    }

    pub fn load_vestings(&self, ledger: &Address) -> Result<Vec<Vesting>> {
        let sql =
            format!("SELECT {VESTING_COLUMNS} FROM vestings WHERE ledger_id = ?1 ORDER BY rowid");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows: Vec<VestingRow> = stmt
            .query_map([ledger.to_hex()], VestingRow::from_row)?
            .collect::<std::result::Result<_, _>>()?;
        rows.into_iter().map(VestingRow::into_vesting).collect()
    }

    // --- Custody ---

    pub fn balance(&self, asset: &Address, owner: &Address) -> Result<u64> {
        balance_on(&self.conn, asset, owner)
    }

    /// Credit `owner` from outside the treasury. Returns the new balance.
    ///
    /// Escrow accounts of live streams and vesting grants only ever receive
    /// their allocation, so they cannot be deposited into.
    pub fn deposit(&self, asset: Address, owner: Address, amount: u64) -> Result<u64> {
        let tx = self.write_tx()?;
        if is_escrow_on(&tx, &owner)? {
            return Err(StoreError::EscrowAccount(owner));
        }
        let balance = balance_on(&tx, &asset, &owner)?
            .checked_add(amount)
            .ok_or(TreasuryError::Custody(CustodyError::Overflow(owner)))?;
        set_balance_on(&tx, &asset, &owner, balance)?;
        tx.commit()?;
        tracing::info!(%asset, %owner, amount, balance, "deposit");
        Ok(balance)
    }

    pub fn balances(&self, asset: &Address) -> Result<Vec<BalanceEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT owner, amount FROM balances WHERE asset = ?1 ORDER BY owner")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([asset.to_hex()], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        rows.into_iter()
            .map(|(owner, amount)| {
                Ok(BalanceEntry {
                    asset: *asset,
                    owner: parse_address("balance owner", &owner)?,
                    amount: parse_amount("balance amount", &amount)?,
                })
            })
            .collect()
    }

    // --- Commits ---

    pub fn commit_stream(&self, transition: &Transition<Stream>) -> Result<()> {
        self.commit(transition)
    }

    pub fn commit_vesting(&self, transition: &Transition<Vesting>) -> Result<()> {
        self.commit(transition)
    }

    /// Commit a governance-only ledger update.
    pub fn commit_ledger(&self, update: &GovernanceUpdate) -> Result<()> {
        let next = update.ledger();
        let tx = self.write_tx()?;
        let current = lock_ledger_on(&tx, next)?;
        update.verify(&current)?;
        write_ledger_on(&tx, next, current.version)?;
        tx.commit()?;
        tracing::info!(
            ledger = %next.id,
            version = next.version,
            paused = next.governance.is_paused,
            max_entity_amount = next.governance.max_entity_amount,
            max_total_allocation = next.governance.max_total_allocation,
            "governance updated"
        );
        Ok(())
    }

    fn commit<E: Entity + Table>(&self, transition: &Transition<E>) -> Result<()> {
        let next = transition.ledger();
        let entity = transition.entity();
        let transfer = transition.transfer();
        let address = entity.address();
        if entity.ledger() != next.id {
            return Err(TreasuryError::UnknownLedger(entity.ledger()).into());
        }

        let tx = self.write_tx()?;
        let current = lock_ledger_on(&tx, next)?;

        let stored = E::load_on(&tx, &address)?;
        match &stored {
            Some(_) if transition.creates_entity() => {
                return Err(E::KIND.already_exists(address).into());
            }
            Some(found) => check_successor(found.version(), entity).inspect_err(log_conflict)?,
            None if transition.creates_entity() => {}
            None => return Err(E::KIND.unknown(address).into()),
        }
        transition.verify(&current, stored.as_ref())?;
        if stored.is_none() && balance_on(&tx, &transfer.asset, &transfer.to)? != 0 {
            return Err(TreasuryError::InvalidTransition {
                record: E::KIND.as_str(),
                address,
                reason: "escrow account is already funded",
            }
            .into());
        }

        write_ledger_on(&tx, next, current.version)?;
        match stored {
            Some(_) => entity.update_on(&tx)?,
            None => entity.insert_on(&tx)?,
        }
        apply_transfer_on(&tx, transfer)?;
        tx.commit()?;

        tracing::info!(
            ledger = %next.id,
            kind = E::KIND.as_str(),
            entity = %address,
            version = entity.version(),
            amount = transfer.amount,
            from = %transfer.from,
            to = %transfer.to,
            total_allocated = next.total_allocated,
            total_paid = next.total_paid,
            "transition committed"
        );
        Ok(())
    }

    // --- Operations ---

    pub fn create_stream(
        &self,
        ledger: &Address,
        caller: &Address,
        req: CreateStream,
        now: i64,
    ) -> Result<Stream> {
        let ledger = self.load_ledger(ledger)?;
        let transition = stream::create(&ledger, caller, req, now)?;
        self.commit_stream(&transition)?;
        Ok(transition.into_entity())
    }

    /// Returns the amount transferred to the recipient.
    pub fn redeem_stream(
        &self,
        address: &Address,
        caller: &Address,
        amount: u64,
        now: i64,
    ) -> Result<u64> {
        let current = self.load_stream(address)?;
        let ledger = self.load_ledger(&current.ledger)?;
        let transition = stream::redeem(&ledger, &current, caller, amount, now)?;
        self.commit_stream(&transition)?;
        Ok(transition.amount())
    }

    pub fn create_vesting(
        &self,
        ledger: &Address,
        caller: &Address,
        req: CreateVesting,
        now: i64,
    ) -> Result<Vesting> {
        let ledger = self.load_ledger(ledger)?;
        let transition = vesting::create(&ledger, caller, req, now)?;
        self.commit_vesting(&transition)?;
        Ok(transition.into_entity())
    }

    pub fn claim_vesting(
        &self,
        address: &Address,
        caller: &Address,
        amount: u64,
        now: i64,
    ) -> Result<u64> {
        let current = self.load_vesting(address)?;
        let ledger = self.load_ledger(&current.ledger)?;
        let transition = vesting::claim(&ledger, &current, caller, amount, now)?;
        self.commit_vesting(&transition)?;
        Ok(transition.amount())
    }

    pub fn set_paused(
        &self,
        ledger: &Address,
        caller: &Address,
        paused: bool,
        now: i64,
    ) -> Result<Ledger> {
        let update = self.load_ledger(ledger)?.set_paused(caller, paused, now)?;
        self.commit_ledger(&update)?;
        Ok(update.into_ledger())
    }

    pub fn set_limits(
        &self,
        ledger: &Address,
        caller: &Address,
        max_entity_amount: u64,
        max_total_allocation: u64,
        now: i64,
    ) -> Result<Ledger> {
        let update = self.load_ledger(ledger)?.set_limits(
            caller,
            max_entity_amount,
            max_total_allocation,
            now,
        )?;
        self.commit_ledger(&update)?;
        Ok(update.into_ledger())
    }

    // --- Whole-ledger views ---

    /// Load one ledger with its entities and the custody balances of its
    /// funding asset. The result is reconciled before it is returned.
    pub fn load_treasury(&self, ledger: &Address) -> Result<Treasury<InMemoryCustody>> {
        let ledger = self.load_ledger(ledger)?;
        let mut custody = InMemoryCustody::new();
        for entry in self.balances(&ledger.funding_asset)? {
            custody
                .deposit(entry.asset, entry.owner, entry.amount)
                .map_err(TreasuryError::from)?;
        }
        let streams = self.load_streams(&ledger.id)?;
        let vestings = self.load_vestings(&ledger.id)?;
        Ok(Treasury::from_parts(ledger, streams, vestings, custody)?)
    }

    pub fn reconcile(&self, ledger: &Address) -> Result<Reconciliation> {
        let ledger = self.load_ledger(ledger)?;
        let streams = self.load_streams(&ledger.id)?;
        let vestings = self.load_vestings(&ledger.id)?;
        let balances: HashMap<Address, u64> = self
            .balances(&ledger.funding_asset)?
            .into_iter()
            .map(|b| (b.owner, b.amount))
            .collect();

        let asset = ledger.funding_asset;
        let report = reconcile(&ledger, &streams, &vestings, |a, owner| {
            if *a == asset {
                balances.get(owner).copied().unwrap_or(0)
            } else {
                0
            }
        })
        .inspect_err(|e| tracing::error!(ledger = %ledger.id, error = %e, "reconciliation failed"))?;
        Ok(report)
    }

    /// Write every record of a reconciled treasury under a ledger id that is
    /// not yet present.
    pub fn import_treasury(&self, treasury: &Treasury<InMemoryCustody>) -> Result<()> {
        treasury.reconcile()?;
        let ledger = treasury.ledger();

        let tx = self.write_tx()?;
        if ledger_version_on(&tx, &ledger.id)?.is_some() {
            return Err(StoreError::LedgerExists(ledger.id));
        }
        for (_, owner, _) in treasury.custody().accounts() {
            if is_escrow_on(&tx, owner)? {
                return Err(StoreError::EscrowAccount(*owner));
            }
        }
        insert_ledger_on(&tx, ledger)?;
        for s in treasury.streams() {
            s.insert_on(&tx)?;
        }
        for v in treasury.vestings() {
            v.insert_on(&tx)?;
        }
        for (asset, owner, amount) in treasury.custody().accounts() {
            let balance = balance_on(&tx, asset, owner)?
                .checked_add(amount)
                .ok_or(TreasuryError::Custody(CustodyError::Overflow(*owner)))?;
            set_balance_on(&tx, asset, owner, balance)?;
        }
        tx.commit()?;

        tracing::info!(
            ledger = %ledger.id,
            streams = treasury.streams().count(),
            vestings = treasury.vestings().count(),
            "treasury imported"
        );
        Ok(())
    }
}

// --- Row mapping ---

const LEDGER_COLUMNS: &str = "id, authority, funding_asset, created_at, total_entities_created, \
     total_allocated, total_paid, is_paused, max_entity_amount, max_total_allocation, \
     governance_updated_at, version";

const STREAM_COLUMNS: &str = "address, ledger_id, recipient, creator, funding_asset, \
     total_amount, withdrawn_amount, start_time, end_time, category, description, status, \
     created_at, version";

const VESTING_COLUMNS: &str = "address, ledger_id, recipient, creator, funding_asset, \
     vesting_type, total_amount, claimed_amount, start_time, end_time, cliff_time, category, \
     description, status, created_at, version";

struct LedgerRow {
    id: String,
    authority: String,
    funding_asset: String,
    created_at: i64,
    total_entities_created: String,
    total_allocated: String,
    total_paid: String,
    is_paused: bool,
    max_entity_amount: String,
    max_total_allocation: String,
    governance_updated_at: i64,
    version: i64,
}

impl LedgerRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            authority: row.get(1)?,
            funding_asset: row.get(2)?,
            created_at: row.get(3)?,
            total_entities_created: row.get(4)?,
            total_allocated: row.get(5)?,
            total_paid: row.get(6)?,
            is_paused: row.get::<_, i32>(7)? != 0,
            max_entity_amount: row.get(8)?,
            max_total_allocation: row.get(9)?,
            governance_updated_at: row.get(10)?,
            version: row.get(11)?,
        })
    }

    fn into_ledger(self) -> Result<Ledger> {
        Ok(Ledger {
            id: parse_address("ledger id", &self.id)?,
            authority: parse_address("authority", &self.authority)?,
            funding_asset: parse_address("funding asset", &self.funding_asset)?,
            created_at: self.created_at,
            total_entities_created: parse_amount(
                "total_entities_created",
                &self.total_entities_created,
            )?,
            total_allocated: parse_amount("total_allocated", &self.total_allocated)?,
            total_paid: parse_amount("total_paid", &self.total_paid)?,
            governance: GovernanceSettings {
                is_paused: self.is_paused,
                max_entity_amount: parse_amount("max_entity_amount", &self.max_entity_amount)?,
                max_total_allocation: parse_amount(
                    "max_total_allocation",
                    &self.max_total_allocation,
                )?,
                last_updated: self.governance_updated_at,
            },
            version: from_version(self.version)?,
        })
    }
}

struct StreamRow {
    address: String,
    ledger: String,
    recipient: String,
    creator: String,
    funding_asset: String,
    total_amount: String,
    withdrawn_amount: String,
    start_time: i64,
    end_time: i64,
    category: String,
    description: String,
    status: String,
    created_at: i64,
    version: i64,
}

impl StreamRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            address: row.get(0)?,
            ledger: row.get(1)?,
            recipient: row.get(2)?,
            creator: row.get(3)?,
            funding_asset: row.get(4)?,
            total_amount: row.get(5)?,
            withdrawn_amount: row.get(6)?,
            start_time: row.get(7)?,
            end_time: row.get(8)?,
            category: row.get(9)?,
            description: row.get(10)?,
            status: row.get(11)?,
            created_at: row.get(12)?,
            version: row.get(13)?,
        })
    }

    fn into_stream(self) -> Result<Stream> {
        Ok(Stream {
            address: parse_address("stream address", &self.address)?,
            ledger: parse_address("ledger id", &self.ledger)?,
            recipient: parse_address("recipient", &self.recipient)?,
            creator: parse_address("creator", &self.creator)?,
            funding_asset: parse_address("funding asset", &self.funding_asset)?,
            total_amount: parse_amount("total_amount", &self.total_amount)?,
            withdrawn_amount: parse_amount("withdrawn_amount", &self.withdrawn_amount)?,
            start_time: self.start_time,
            end_time: self.end_time,
            category: self
                .category
                .parse()
                .map_err(|e| corrupt("category", &self.category, e))?,
            description: self.description,
            status: match self.status.as_str() {
                "active" => StreamStatus::Active,
                "completed" => StreamStatus::Completed,
                other => return Err(corrupt("stream status", other, "unknown status")),
            },
            created_at: self.created_at,
            version: from_version(self.version)?,
        })
    }
}

struct VestingRow {
    address: String,
    ledger: String,
    recipient: String,
    creator: String,
    funding_asset: String,
    vesting_type: String,
    total_amount: String,
    claimed_amount: String,
    start_time: i64,
    end_time: i64,
    cliff_time: i64,
    category: String,
    description: String,
    status: String,
    created_at: i64,
    version: i64,
}

impl VestingRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            address: row.get(0)?,
            ledger: row.get(1)?,
            recipient: row.get(2)?,
            creator: row.get(3)?,
            funding_asset: row.get(4)?,
            vesting_type: row.get(5)?,
            total_amount: row.get(6)?,
            claimed_amount: row.get(7)?,
            start_time: row.get(8)?,
            end_time: row.get(9)?,
            cliff_time: row.get(10)?,
            category: row.get(11)?,
            description: row.get(12)?,
            status: row.get(13)?,
            created_at: row.get(14)?,
            version: row.get(15)?,
        })
    }

    fn into_vesting(self) -> Result<Vesting> {
        Ok(Vesting {
            address: parse_address("vesting address", &self.address)?,
            ledger: parse_address("ledger id", &self.ledger)?,
            recipient: parse_address("recipient", &self.recipient)?,
            creator: parse_address("creator", &self.creator)?,
            funding_asset: parse_address("funding asset", &self.funding_asset)?,
            vesting_type: self
                .vesting_type
                .parse()
                .map_err(|e| corrupt("vesting type", &self.vesting_type, e))?,
            total_amount: parse_amount("total_amount", &self.total_amount)?,
            claimed_amount: parse_amount("claimed_amount", &self.claimed_amount)?,
            start_time: self.start_time,
            end_time: self.end_time,
            cliff_time: self.cliff_time,
            category: self
                .category
                .parse()
                .map_err(|e| corrupt("category", &self.category, e))?,
            description: self.description,
            status: match self.status.as_str() {
                "active" => VestingStatus::Active,
                "completed" => VestingStatus::Completed,
                other => return Err(corrupt("vesting status", other, "unknown status")),
            },
            created_at: self.created_at,
            version: from_version(self.version)?,
        })
    }
}

/// Per-entity SQL. Only the fields a redeem or claim can change are updated.
trait Table: Sized {
    fn load_on(conn: &Connection, address: &Address) -> Result<Option<Self>>;
    fn insert_on(&self, conn: &Connection) -> Result<()>;
    fn update_on(&self, conn: &Connection) -> Result<()>;
}

impl Table for Stream {
    fn load_on(conn: &Connection, address: &Address) -> Result<Option<Self>> {
        let sql = format!("SELECT {STREAM_COLUMNS} FROM streams WHERE address = ?1");
        conn.query_row(&sql, [address.to_hex()], StreamRow::from_row)
            .optional()?
            .map(StreamRow::into_stream)
            .transpose()
    }

    fn insert_on(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO streams (address, ledger_id, recipient, creator, funding_asset,
                total_amount, withdrawn_amount, start_time, end_time, category, description,
                status, created_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                self.address.to_hex(),
                self.ledger.to_hex(),
                self.recipient.to_hex(),
                self.creator.to_hex(),
                self.funding_asset.to_hex(),
                self.total_amount.to_string(),
                self.withdrawn_amount.to_string(),
                self.start_time,
                self.end_time,
                self.category.as_str(),
                self.description,
                self.status.as_str(),
                self.created_at,
                to_version(self.version)?,
            ],
        )?;
        Ok(())
    }

    fn update_on(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "UPDATE streams SET withdrawn_amount = ?2, status = ?3, version = ?4
             WHERE address = ?1",
            params![
                self.address.to_hex(),
                self.withdrawn_amount.to_string(),
                self.status.as_str(),
                to_version(self.version)?,
            ],
        )?;
        Ok(())
    }
}

impl Table for Vesting {
    fn load_on(conn: &Connection, address: &Address) -> Result<Option<Self>> {
        let sql = format!("SELECT {VESTING_COLUMNS} FROM vestings WHERE address = ?1");
        conn.query_row(&sql, [address.to_hex()], VestingRow::from_row)
            .optional()?
            .map(VestingRow::into_vesting)
            .transpose()
    }

    fn insert_on(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO vestings (address, ledger_id, recipient, creator, funding_asset,
                vesting_type, total_amount, claimed_amount, start_time, end_time, cliff_time,
                category, description, status, created_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                self.address.to_hex(),
                self.ledger.to_hex(),
                self.recipient.to_hex(),
                self.creator.to_hex(),
                self.funding_asset.to_hex(),
                self.vesting_type.as_str(),
                self.total_amount.to_string(),
                self.claimed_amount.to_string(),
                self.start_time,
                self.end_time,
                self.cliff_time,
                self.category.as_str(),
                self.description,
                self.status.as_str(),
                self.created_at,
                to_version(self.version)?,
            ],
        )?;
        Ok(())
    }

    fn update_on(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "UPDATE vestings SET claimed_amount = ?2, status = ?3, version = ?4
             WHERE address = ?1",
            params![
                self.address.to_hex(),
                self.claimed_amount.to_string(),
                self.status.as_str(),
                to_version(self.version)?,
            ],
        )?;
        Ok(())
    }
}

// --- Statement helpers (usable on a connection or inside a transaction) ---

fn load_ledger_on(conn: &Connection, id: &Address) -> Result<Option<Ledger>> {
    let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledgers WHERE id = ?1");
    conn.query_row(&sql, [id.to_hex()], LedgerRow::from_row)
        .optional()?
        .map(LedgerRow::into_ledger)
        .transpose()
}

fn ledger_version_on(conn: &Connection, id: &Address) -> Result<Option<u64>> {
    conn.query_row(
        "SELECT version FROM ledgers WHERE id = ?1",
        [id.to_hex()],
        |row| row.get::<_, i64>(0),
    )
    .optional()?
    .map(from_version)
    .transpose()
}

/// True when `owner` is the escrow of any stored stream or vesting grant.
fn is_escrow_on(conn: &Connection, owner: &Address) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM streams WHERE address = ?1
             UNION ALL SELECT 1 FROM vestings WHERE address = ?1 LIMIT 1",
            [owner.to_hex()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn insert_ledger_on(conn: &Connection, ledger: &Ledger) -> Result<()> {
    conn.execute(
        "INSERT INTO ledgers (id, authority, funding_asset, created_at, total_entities_created,
            total_allocated, total_paid, is_paused, max_entity_amount, max_total_allocation,
            governance_updated_at, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            ledger.id.to_hex(),
            ledger.authority.to_hex(),
            ledger.funding_asset.to_hex(),
            ledger.created_at,
            ledger.total_entities_created.to_string(),
            ledger.total_allocated.to_string(),
            ledger.total_paid.to_string(),
            ledger.governance.is_paused as i32,
            ledger.governance.max_entity_amount.to_string(),
            ledger.governance.max_total_allocation.to_string(),
            ledger.governance.last_updated,
            to_version(ledger.version)?,
        ],
    )?;
    Ok(())
}

/// Read the stored ledger `next` succeeds and check it is exactly one
/// version behind.
fn lock_ledger_on(conn: &Connection, next: &Ledger) -> Result<Ledger> {
    let current = load_ledger_on(conn, &next.id)?.ok_or(TreasuryError::UnknownLedger(next.id))?;
    check_successor(current.version, next).inspect_err(log_conflict)?;
    Ok(current)
}

/// Compare-and-swap: write `next` only while the stored version is `found`.
fn write_ledger_on(conn: &Connection, next: &Ledger, found: u64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE ledgers SET total_entities_created = ?2, total_allocated = ?3, total_paid = ?4,
            is_paused = ?5, max_entity_amount = ?6, max_total_allocation = ?7,
            governance_updated_at = ?8, version = ?9
         WHERE id = ?1 AND version = ?10",
        params![
            next.id.to_hex(),
            next.total_entities_created.to_string(),
            next.total_allocated.to_string(),
            next.total_paid.to_string(),
            next.governance.is_paused as i32,
            next.governance.max_entity_amount.to_string(),
            next.governance.max_total_allocation.to_string(),
            next.governance.last_updated,
            to_version(next.version)?,
            to_version(found)?,
        ],
    )?;
    if updated == 0 {
        return Err(TreasuryError::Conflict {
            record: "ledger",
            address: next.id,
            expected: found,
            found: ledger_version_on(conn, &next.id)?.unwrap_or(0),
        }
        .into());
    }
    Ok(())
}

fn balance_on(conn: &Connection, asset: &Address, owner: &Address) -> Result<u64> {
    let amount: Option<String> = conn
        .query_row(
            "SELECT amount FROM balances WHERE asset = ?1 AND owner = ?2",
            [asset.to_hex(), owner.to_hex()],
            |row| row.get(0),
        )
        .optional()?;
    match amount {
        Some(amount) => parse_amount("balance amount", &amount),
        None => Ok(0),
    }
}

fn set_balance_on(conn: &Connection, asset: &Address, owner: &Address, amount: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO balances (asset, owner, amount) VALUES (?1, ?2, ?3)
         ON CONFLICT(asset, owner) DO UPDATE SET amount = excluded.amount",
        params![asset.to_hex(), owner.to_hex(), amount.to_string()],
    )?;
    Ok(())
}

/// Same semantics as the in-memory custody: both sides are checked before
/// either is written.
fn apply_transfer_on(conn: &Connection, transfer: &Transfer) -> Result<()> {
    let from_balance = balance_on(conn, &transfer.asset, &transfer.from)?;
    if from_balance < transfer.amount {
        return Err(TreasuryError::from(CustodyError::InsufficientBalance {
            account: transfer.from,
            required: transfer.amount,
            available: from_balance,
        })
        .into());
    }
    if transfer.from == transfer.to {
        return Ok(());
    }

    let credited = balance_on(conn, &transfer.asset, &transfer.to)?
        .checked_add(transfer.amount)
        .ok_or(TreasuryError::Custody(CustodyError::Overflow(transfer.to)))?;

    set_balance_on(
        conn,
        &transfer.asset,
        &transfer.from,
        from_balance - transfer.amount,
    )?;
    set_balance_on(conn, &transfer.asset, &transfer.to, credited)?;
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
        tracing::warn!(record, %address, expected, found, "stale commit rejected");
    }
}

// --- Parsing ---

fn corrupt(field: &str, value: &str, err: impl fmt::Display) -> StoreError {
    StoreError::InvalidData(format!("invalid {field} '{value}': {err}"))
}

fn parse_address(field: &str, s: &str) -> Result<Address> {
    s.parse().map_err(|e| corrupt(field, s, e))
}

fn parse_amount(field: &str, s: &str) -> Result<u64> {
    s.parse().map_err(|e| corrupt(field, s, e))
}

fn to_version(version: u64) -> Result<i64> {
    i64::try_from(version)
        .map_err(|_| StoreError::InvalidData(format!("version {version} out of range")))
}

fn from_version(version: i64) -> Result<u64> {
    u64::try_from(version)
        .map_err(|_| StoreError::InvalidData(format!("negative version {version}")))
}
