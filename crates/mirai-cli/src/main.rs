mod server;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mirai_core::time::{now_unix, unix_to_iso8601};
use mirai_core::{
    Address, CreateStream, CreateVesting, Ledger, PaymentCategory, Stream, Vesting, VestingType,
    ledger_address, stream_address, vesting_address,
};
use mirai_store::{Config, Store, TreasuryHome};
use rmcp::{ServiceExt, transport::stdio};

#[derive(Parser)]
#[command(name = "mirai", about = "DAO treasury engine CLI and MCP server")]
struct Cli {
    /// DAO authority owning the ledger (name or 64-char hex address)
    #[arg(long, global = true, default_value = "dao", value_parser = parse_principal)]
    dao: Address,

    /// Unix time to act at instead of the system clock
    #[arg(long, global = true, allow_hyphen_values = true)]
    now: Option<i64>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio transport
    Serve,

    /// Create the DAO's treasury ledger
    Init {
        /// Funding asset id (name or address)
        #[arg(long, value_parser = parse_principal)]
        asset: Address,

        /// Per-entity cap (overrides mirai.toml)
        #[arg(long)]
        max_entity_amount: Option<u64>,

        /// Total allocation cap (overrides mirai.toml)
        #[arg(long)]
        max_total_allocation: Option<u64>,
    },

    /// Credit an account with the funding asset
    Deposit {
        #[arg(long)]
        amount: u64,

        /// Account to credit (defaults to the DAO authority)
        #[arg(long, value_parser = parse_principal)]
        owner: Option<Address>,
    },

    /// Show an account's funding-asset balance
    Balance {
        /// Account (defaults to the DAO authority)
        #[arg(value_parser = parse_principal)]
        owner: Option<Address>,
    },

    /// Escrow funds into a linear payment stream
    CreateStream {
        #[arg(long, value_parser = parse_principal)]
        recipient: Address,

        #[arg(long)]
        amount: u64,

        /// Defaults to now
        #[arg(long, allow_hyphen_values = true)]
        start: Option<i64>,

        #[arg(long, allow_hyphen_values = true)]
        end: i64,

        #[arg(long, default_value = "other", value_parser = parse_category)]
        category: PaymentCategory,

        #[arg(long, default_value = "")]
        description: String,

        /// Defaults to the DAO authority
        #[arg(long, value_parser = parse_principal)]
        caller: Option<Address>,
    },

    /// Withdraw unlocked funds from the caller's stream
    Redeem {
        #[arg(long, value_parser = parse_principal)]
        caller: Address,

        #[arg(long)]
        amount: u64,
    },

    /// Escrow funds into a linear or cliff vesting grant
    CreateVesting {
        #[arg(long, value_parser = parse_principal)]
        recipient: Address,

        #[arg(long)]
        amount: u64,

        #[arg(long = "type", default_value = "linear", value_parser = parse_vesting_type)]
        vesting_type: VestingType,

        /// Defaults to now
        #[arg(long, allow_hyphen_values = true)]
        start: Option<i64>,

        #[arg(long, allow_hyphen_values = true)]
        end: i64,

        /// Defaults to start
        #[arg(long, allow_hyphen_values = true)]
        cliff: Option<i64>,

        #[arg(long, default_value = "other", value_parser = parse_category)]
        category: PaymentCategory,

        #[arg(long, default_value = "")]
        description: String,

        /// Defaults to the DAO authority
        #[arg(long, value_parser = parse_principal)]
        caller: Option<Address>,
    },

    /// Claim vested funds from the caller's grant
    Claim {
        #[arg(long, value_parser = parse_principal)]
        caller: Address,

        #[arg(long)]
        amount: u64,
    },

    /// Block new streams and grants
    Pause {
        #[arg(long, value_parser = parse_principal)]
        caller: Option<Address>,
    },

    /// Allow new streams and grants again
    Unpause {
        #[arg(long, value_parser = parse_principal)]
        caller: Option<Address>,
    },

    /// Set governance caps
    SetLimits {
        #[arg(long)]
        max_entity_amount: u64,

        #[arg(long)]
        max_total_allocation: u64,

        #[arg(long, value_parser = parse_principal)]
        caller: Option<Address>,
    },

    /// Show a recipient's stream
    Stream {
        #[arg(value_parser = parse_principal)]
        recipient: Address,
    },

    /// Show a recipient's vesting grant
    Vesting {
        #[arg(value_parser = parse_principal)]
        recipient: Address,
    },

    /// Show ledger statistics
    Stats,

    /// Check ledger aggregates against entities and escrow balances
    Reconcile,

    /// Export the ledger to a JSON snapshot file
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// Import a JSON snapshot file
    Import {
        /// Input file path
        path: PathBuf,
    },

    /// Print the addresses derived for a principal
    Address {
        #[arg(value_parser = parse_principal)]
        principal: Address,
    },
}

/// A 64-char hex address, or a name hashed into one.
pub(crate) fn parse_principal(s: &str) -> std::result::Result<Address, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err("principal must not be empty".to_string());
    }
    let hex = trimmed.trim_start_matches("0x");
    if hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return trimmed.parse().map_err(|e| format!("{e}"));
    }
    Ok(Address::named(trimmed))
}

fn parse_category(s: &str) -> std::result::Result<PaymentCategory, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_vesting_type(s: &str) -> std::result::Result<VestingType, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn init_tracing(verbose: bool, config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        EnvFilter::new(config.log.filter.as_deref().unwrap_or("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Everything a command needs: the open store and who/when it acts as.
struct Session {
    store: Store,
    config: Config,
    authority: Address,
    ledger: Address,
    now: i64,
    /// Set by `--now`. The server otherwise reads the clock per call.
    pinned_now: Option<i64>,
}

impl Session {
    fn load_ledger(&self) -> Result<Ledger> {
        self.store
            .load_ledger(&self.ledger)
            .with_context(|| format!("no treasury for DAO {} (run `mirai init`)", self.authority))
    }

    fn asset(&self) -> Result<Address> {
        Ok(self.load_ledger()?.funding_asset)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let home = TreasuryHome::open(None).context("failed to open data directory")?;
    let config = home.load_config().context("failed to load config")?;
    init_tracing(cli.verbose, &config);

    let store = home.open_store().context("failed to open treasury store")?;
    let session = Session {
        store,
        config,
        authority: cli.dao,
        ledger: ledger_address(&cli.dao),
        now: cli.now.unwrap_or_else(now_unix),
        pinned_now: cli.now,
    };

    match cli.command {
        Commands::Serve => cmd_serve(session).await,
        Commands::Init {
            asset,
            max_entity_amount,
            max_total_allocation,
        } => cmd_init(&session, asset, max_entity_amount, max_total_allocation),
        Commands::Deposit { amount, owner } => cmd_deposit(&session, amount, owner),
        Commands::Balance { owner } => cmd_balance(&session, owner),
        Commands::CreateStream {
            recipient,
            amount,
            start,
            end,
            category,
            description,
            caller,
        } => {
            let req = CreateStream {
                recipient,
                asset: session.asset()?,
                start_time: start.unwrap_or(session.now),
                end_time: end,
                total_amount: amount,
                category,
                description,
            };
            cmd_create_stream(&session, caller, req)
        }
        Commands::Redeem { caller, amount } => cmd_redeem(&session, caller, amount),
        Commands::CreateVesting {
            recipient,
            amount,
            vesting_type,
            start,
            end,
            cliff,
            category,
            description,
            caller,
        } => {
            let start_time = start.unwrap_or(session.now);
            let req = CreateVesting {
                recipient,
                asset: session.asset()?,
                vesting_type,
                start_time,
                end_time: end,
                cliff_time: cliff.unwrap_or(start_time),
                total_amount: amount,
                category,
                description,
            };
            cmd_create_vesting(&session, caller, req)
        }
        Commands::Claim { caller, amount } => cmd_claim(&session, caller, amount),
        Commands::Pause { caller } => cmd_set_paused(&session, caller, true),
        Commands::Unpause { caller } => cmd_set_paused(&session, caller, false),
        Commands::SetLimits {
            max_entity_amount,
            max_total_allocation,
            caller,
        } => cmd_set_limits(&session, caller, max_entity_amount, max_total_allocation),
        Commands::Stream { recipient } => cmd_stream(&session, recipient),
        Commands::Vesting { recipient } => cmd_vesting(&session, recipient),
        Commands::Stats => cmd_stats(&session),
        Commands::Reconcile => cmd_reconcile(&session),
        Commands::Export { path } => cmd_export(&session, &path),
        Commands::Import { path } => cmd_import(&session, &path),
        Commands::Address { principal } => cmd_address(&session, principal),
    }
}

async fn cmd_serve(session: Session) -> Result<()> {
    tracing::info!(ledger = %session.ledger, "starting MCP server");

    let server = server::MiraiServer::new(session.store, session.authority, session.pinned_now);
    let service = server
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;
    service.waiting().await?;

    tracing::info!("MCP server stopped");
    Ok(())
}

fn cmd_init(
    session: &Session,
    asset: Address,
    max_entity_amount: Option<u64>,
    max_total_allocation: Option<u64>,
) -> Result<()> {
    let configured = session.config.governance;
    let defaults = mirai_store::GovernanceDefaults {
        max_entity_amount: max_entity_amount.or(configured.max_entity_amount),
        max_total_allocation: max_total_allocation.or(configured.max_total_allocation),
    };

    let ledger = session
        .store
        .init_ledger(session.authority, asset, defaults.limits(), session.now)
        .context("failed to initialize treasury")?;

    println!("ledger:     {}", ledger.id);
    println!("authority:  {}", ledger.authority);
    println!("asset:      {}", ledger.funding_asset);
    print_limits(&ledger);
    Ok(())
}

fn cmd_deposit(session: &Session, amount: u64, owner: Option<Address>) -> Result<()> {
    let owner = owner.unwrap_or(session.authority);
    let balance = session
        .store
        .deposit(session.asset()?, owner, amount)
        .context("deposit failed")?;
    println!("deposited {amount} to {owner}. balance={balance}");
    Ok(())
}

fn cmd_balance(session: &Session, owner: Option<Address>) -> Result<()> {
    let owner = owner.unwrap_or(session.authority);
    let balance = session
        .store
        .balance(&session.asset()?, &owner)
        .context("failed to read balance")?;
    println!("{balance}");
    Ok(())
}

fn cmd_create_stream(session: &Session, caller: Option<Address>, req: CreateStream) -> Result<()> {
    let caller = caller.unwrap_or(session.authority);
    let stream = session
        .store
        .create_stream(&session.ledger, &caller, req, session.now)
        .context("create-stream failed")?;
    println!(
        "created stream {} → {}: {} from {} to {}",
        stream.address,
        stream.recipient,
        stream.total_amount,
        unix_to_iso8601(stream.start_time),
        unix_to_iso8601(stream.end_time)
    );
    Ok(())
}

fn cmd_redeem(session: &Session, caller: Address, amount: u64) -> Result<()> {
    let address = stream_address(&session.ledger, &caller);
    let paid = session
        .store
        .redeem_stream(&address, &caller, amount, session.now)
        .context("redeem failed")?;
    let stream = session.store.load_stream(&address)?;
    println!(
        "redeemed {paid}. withdrawn={}/{}, status={}",
        stream.withdrawn_amount,
        stream.total_amount,
        stream.status.as_str()
    );
    Ok(())
}

fn cmd_create_vesting(
    session: &Session,
    caller: Option<Address>,
    req: CreateVesting,
) -> Result<()> {
    let caller = caller.unwrap_or(session.authority);
    let vesting = session
        .store
        .create_vesting(&session.ledger, &caller, req, session.now)
        .context("create-vesting failed")?;
    println!(
        "created {} vesting {} → {}: {} from {} to {} (cliff {})",
        vesting.vesting_type,
        vesting.address,
        vesting.recipient,
        vesting.total_amount,
        unix_to_iso8601(vesting.start_time),
        unix_to_iso8601(vesting.end_time),
        unix_to_iso8601(vesting.cliff_time)
    );
    Ok(())
}

fn cmd_claim(session: &Session, caller: Address, amount: u64) -> Result<()> {
    let address = vesting_address(&session.ledger, &caller);
    let paid = session
        .store
        .claim_vesting(&address, &caller, amount, session.now)
        .context("claim failed")?;
    let vesting = session.store.load_vesting(&address)?;
    println!(
        "claimed {paid}. claimed={}/{}, status={}",
        vesting.claimed_amount,
        vesting.total_amount,
        vesting.status.as_str()
    );
    Ok(())
}

fn cmd_set_paused(session: &Session, caller: Option<Address>, paused: bool) -> Result<()> {
    let caller = caller.unwrap_or(session.authority);
    session
        .store
        .set_paused(&session.ledger, &caller, paused, session.now)
        .context("failed to update pause flag")?;
    println!("{}", if paused { "paused" } else { "unpaused" });
    Ok(())
}

fn cmd_set_limits(
    session: &Session,
    caller: Option<Address>,
    max_entity_amount: u64,
    max_total_allocation: u64,
) -> Result<()> {
    let caller = caller.unwrap_or(session.authority);
    let ledger = session
        .store
        .set_limits(
            &session.ledger,
            &caller,
            max_entity_amount,
            max_total_allocation,
            session.now,
        )
        .context("failed to update limits")?;
    print_limits(&ledger);
    Ok(())
}

fn print_limits(ledger: &Ledger) {
    println!("max_entity: {}", fmt_limit(ledger.governance.max_entity_amount));
    println!("max_total:  {}", fmt_limit(ledger.governance.max_total_allocation));
}

fn fmt_limit(limit: u64) -> String {
    if limit == u64::MAX {
        "unlimited".to_string()
    } else {
        limit.to_string()
    }
}

fn cmd_stream(session: &Session, recipient: Address) -> Result<()> {
    let address = stream_address(&session.ledger, &recipient);
    let stream = session
        .store
        .load_stream(&address)
        .context("failed to load stream")?;
    print_stream(&stream, session.now);
    Ok(())
}

fn print_stream(stream: &Stream, now: i64) {
    println!("address:      {}", stream.address);
    println!("recipient:    {}", stream.recipient);
    println!("status:       {}", stream.status.as_str());
    println!("total:        {}", stream.total_amount);
    println!("withdrawn:    {}", stream.withdrawn_amount);
    println!("withdrawable: {}", stream.withdrawable_amount(now));
    println!("remaining:    {}", stream.remaining_amount());
    println!("progress:     {:.2}%", stream.progress_percentage(now));
    println!("start:        {}", unix_to_iso8601(stream.start_time));
    println!("end:          {}", unix_to_iso8601(stream.end_time));
    println!("category:     {}", stream.category);
    if !stream.description.is_empty() {
        println!("description:  {}", stream.description);
    }
}

fn cmd_vesting(session: &Session, recipient: Address) -> Result<()> {
    let address = vesting_address(&session.ledger, &recipient);
    let vesting = session
        .store
        .load_vesting(&address)
        .context("failed to load vesting")?;
    print_vesting(&vesting, session.now);
    Ok(())
}

fn print_vesting(vesting: &Vesting, now: i64) {
    println!("address:      {}", vesting.address);
    println!("recipient:    {}", vesting.recipient);
    println!("type:         {}", vesting.vesting_type);
    println!("status:       {}", vesting.status.as_str());
    println!("total:        {}", vesting.total_amount);
    println!("claimed:      {}", vesting.claimed_amount);
    println!("claimable:    {}", vesting.claimable_amount(now));
    println!("remaining:    {}", vesting.remaining_amount());
    println!("progress:     {:.2}%", vesting.progress_percentage(now));
    println!("start:        {}", unix_to_iso8601(vesting.start_time));
    println!("cliff:        {}", unix_to_iso8601(vesting.cliff_time));
    println!("end:          {}", unix_to_iso8601(vesting.end_time));
    println!("category:     {}", vesting.category);
    if !vesting.description.is_empty() {
        println!("description:  {}", vesting.description);
    }
}

fn cmd_stats(session: &Session) -> Result<()> {
    let ledger = session.load_ledger()?;
    let treasury_balance = session
        .store
        .balance(&ledger.funding_asset, &ledger.authority)
        .context("failed to read treasury balance")?;

    println!("ledger:     {}", ledger.id);
    println!("authority:  {}", ledger.authority);
    println!("asset:      {}", ledger.funding_asset);
    println!("created:    {}", unix_to_iso8601(ledger.created_at));
    println!("entities:   {}", ledger.total_entities_created);
    println!("allocated:  {}", ledger.total_allocated);
    println!("paid:       {}", ledger.total_paid);
    println!("outstanding: {}", ledger.outstanding());
    println!("balance:    {treasury_balance}");
    println!("paused:     {}", ledger.governance.is_paused);
    print_limits(&ledger);
    println!("version:    {}", ledger.version);
    Ok(())
}

fn cmd_reconcile(session: &Session) -> Result<()> {
    let report = session
        .store
        .reconcile(&session.ledger)
        .context("reconciliation failed")?;
    println!("entities:   {}", report.entities);
    println!("allocated:  {}", report.total_allocated);
    println!("paid:       {}", report.total_paid);
    println!("escrow:     {}", report.escrow_held);
    println!("ok");
    Ok(())
}

fn cmd_export(session: &Session, path: &Path) -> Result<()> {
    session
        .store
        .export_json_file(&session.ledger, path, session.now)
        .with_context(|| format!("failed to export to {}", path.display()))?;
    println!("exported to {}", path.display());
    Ok(())
}

fn cmd_import(session: &Session, path: &Path) -> Result<()> {
    let ledger = session
        .store
        .import_json_file(path)
        .context("failed to import JSON")?;
    let report = session.store.reconcile(&ledger)?;
    println!(
        "imported ledger {ledger} from {}. entities={}, allocated={}, paid={}",
        path.display(),
        report.entities,
        report.total_allocated,
        report.total_paid
    );
    Ok(())
}

fn cmd_address(session: &Session, principal: Address) -> Result<()> {
    println!("principal:  {principal}");
    println!("ledger:     {}", ledger_address(&principal));
    println!("stream:     {}", stream_address(&session.ledger, &principal));
    println!("vesting:    {}", vesting_address(&session.ledger, &principal));
    Ok(())
}
