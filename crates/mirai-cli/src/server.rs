use std::sync::Arc;

use mirai_core::time::now_unix;
use mirai_core::{
    Address, CreateStream, CreateVesting, PaymentCategory, Stream, TreasuryError, Vesting,
    VestingType, ledger_address, stream_address, vesting_address,
};
use mirai_store::{Store, StoreError};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::parse_principal;

#[derive(Clone)]
pub struct MiraiServer {
    state: Arc<Mutex<ServerState>>,
    tool_router: ToolRouter<Self>,
}

struct ServerState {
    store: Store,
    authority: Address,
    ledger: Address,
    /// When set, every call without an explicit `now` acts at this time.
    pinned_now: Option<i64>,
}

impl ServerState {
    fn now(&self, requested: Option<i64>) -> i64 {
        requested.or(self.pinned_now).unwrap_or_else(now_unix)
    }

    fn caller(&self, caller: Option<&str>) -> Result<Address, McpError> {
        match caller {
            Some(c) => principal("caller", c),
            None => Ok(self.authority),
        }
    }

    fn funding_asset(&self) -> Result<Result<Address, CallToolResult>, McpError> {
        match self.store.load_ledger(&self.ledger) {
            Ok(ledger) => Ok(Ok(ledger.funding_asset)),
            Err(e) => rejected(e).map(Err),
        }
    }
}

impl MiraiServer {
    pub fn new(store: Store, authority: Address, pinned_now: Option<i64>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                store,
                authority,
                ledger: ledger_address(&authority),
                pinned_now,
            })),
            tool_router: Self::tool_router(),
        }
    }
}

fn principal(field: &str, value: &str) -> Result<Address, McpError> {
    parse_principal(value).map_err(|e| McpError::invalid_params(format!("{field}: {e}"), None))
}

fn json_result(value: &impl Serialize) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// A treasury rejection as a tool-level error the caller can act on.
fn error_body(err: &TreasuryError) -> serde_json::Value {
    let kind = err.kind();
    serde_json::json!({
        "error": err.to_string(),
        "kind": kind.as_str(),
        "retryable": kind.is_retryable(),
    })
}

fn refusal(err: &TreasuryError) -> CallToolResult {
    CallToolResult::error(vec![Content::text(error_body(err).to_string())])
}

/// Treasury rejections are tool results; storage failures are protocol errors.
fn rejected(err: StoreError) -> Result<CallToolResult, McpError> {
    match err {
        StoreError::Treasury(e) => {
            tracing::debug!(error = %e, "operation rejected");
            Ok(refusal(&e))
        }
        other => {
            tracing::error!(error = %other, "store failure");
            Err(McpError::internal_error(other.to_string(), None))
        }
    }
}

fn stream_view(stream: &Stream, now: i64) -> serde_json::Value {
    serde_json::json!({
        "stream": stream,
        "withdrawable": stream.withdrawable_amount(now),
        "remaining": stream.remaining_amount(),
        "progressPercentage": stream.progress_percentage(now),
        "now": now,
    })
}

fn vesting_view(vesting: &Vesting, now: i64) -> serde_json::Value {
    serde_json::json!({
        "vesting": vesting,
        "claimable": vesting.claimable_amount(now),
        "remaining": vesting.remaining_amount(),
        "progressPercentage": vesting.progress_percentage(now),
        "now": now,
    })
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateStreamRequest {
    /// Recipient: a name or a 64-char hex address
    recipient: String,
    /// Amount escrowed into the stream, in base units
    total_amount: u64,
    /// Unix seconds. Defaults to now
    start_time: Option<i64>,
    /// Unix seconds, after start_time
    end_time: i64,
    /// contributors, grants, operations, marketing, development or other (default)
    category: Option<String>,
    /// At most 64 bytes
    description: Option<String>,
    /// Acting principal. Defaults to the DAO authority
    caller: Option<String>,
    /// Unix seconds to act at. Defaults to the server clock
    now: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateVestingRequest {
    /// Recipient: a name or a 64-char hex address
    recipient: String,
    /// Amount escrowed into the grant, in base units
    total_amount: u64,
    /// "linear" (default) or "cliff"
    vesting_type: Option<String>,
    /// Unix seconds. Defaults to now
    start_time: Option<i64>,
    /// Unix seconds, after start_time
    end_time: i64,
    /// Unix seconds between start and end. Defaults to start_time
    cliff_time: Option<i64>,
    /// contributors, grants, operations, marketing, development or other (default)
    category: Option<String>,
    description: Option<String>,
    /// Acting principal. Defaults to the DAO authority
    caller: Option<String>,
    now: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PayoutRequest {
    /// The recipient withdrawing from their own stream or grant
    caller: String,
    /// Amount to release, in base units
    amount: u64,
    now: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SetPausedRequest {
    /// true blocks new streams and grants; existing ones keep paying out
    paused: bool,
    caller: Option<String>,
    now: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SetLimitsRequest {
    max_entity_amount: u64,
    max_total_allocation: u64,
    caller: Option<String>,
    now: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct StatusRequest {
    /// Recipient: a name or a 64-char hex address
    recipient: String,
    /// Unix seconds to evaluate at. Defaults to the server clock
    now: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExportRequest {
    /// Snapshot timestamp. Defaults to the server clock
    now: Option<i64>,
}

#[tool_router]
impl MiraiServer {
    #[tool(
        description = "Treasury ledger statistics: entities created, total allocated, total paid, governance settings, and the reconciliation of those aggregates against escrow balances."
    )]
    async fn treasury_stats(&self) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let ledger = match state.store.load_ledger(&state.ledger) {
            Ok(l) => l,
            Err(e) => return rejected(e),
        };
        let balance = match state.store.balance(&ledger.funding_asset, &ledger.authority) {
            Ok(b) => b,
            Err(e) => return rejected(e),
        };
        // A failed reconciliation is reported alongside the stats
        let reconciliation = match state.store.reconcile(&ledger.id) {
            Ok(r) => serde_json::json!(r),
            Err(StoreError::Treasury(e)) => error_body(&e),
            Err(e) => return rejected(e),
        };

        json_result(&serde_json::json!({
            "ledger": ledger,
            "outstanding": ledger.outstanding(),
            "treasuryBalance": balance,
            "reconciliation": reconciliation,
        }))
    }

    #[tool(
        description = "Create a linear payment stream. Escrows total_amount from the DAO treasury; the recipient can redeem the accrued share at any time between start_time and end_time. One stream per recipient."
    )]
    async fn create_stream(
        &self,
        Parameters(req): Parameters<CreateStreamRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let caller = state.caller(req.caller.as_deref())?;
        let recipient = principal("recipient", &req.recipient)?;
        let category: PaymentCategory = match req.category.as_deref().unwrap_or("other").parse() {
            Ok(c) => c,
            Err(e) => return Ok(refusal(&e)),
        };
        let asset = match state.funding_asset()? {
            Ok(a) => a,
            Err(refused) => return Ok(refused),
        };
        let now = state.now(req.now);

        let create = CreateStream {
            recipient,
            asset,
            start_time: req.start_time.unwrap_or(now),
            end_time: req.end_time,
            total_amount: req.total_amount,
            category,
            description: req.description.unwrap_or_default(),
        };
        match state.store.create_stream(&state.ledger, &caller, create, now) {
            Ok(stream) => json_result(&stream_view(&stream, now)),
            Err(e) => rejected(e),
        }
    }

    #[tool(
        description = "Redeem unlocked funds from the caller's own stream. Fails without side effects if the amount exceeds what has accrued and not yet been withdrawn."
    )]
    async fn redeem_stream(
        &self,
        Parameters(req): Parameters<PayoutRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let caller = principal("caller", &req.caller)?;
        let now = state.now(req.now);
        let address = stream_address(&state.ledger, &caller);

        let redeemed = match state.store.redeem_stream(&address, &caller, req.amount, now) {
            Ok(paid) => paid,
            Err(e) => return rejected(e),
        };
        match state.store.load_stream(&address) {
            Ok(stream) => {
                let mut view = stream_view(&stream, now);
                view["redeemed"] = redeemed.into();
                json_result(&view)
            }
            Err(e) => rejected(e),
        }
    }

    #[tool(
        description = "Create a vesting grant. Linear grants accrue from start_time; cliff grants release nothing before cliff_time and then the full amount accrued since start_time. One grant per recipient."
    )]
    async fn create_vesting(
        &self,
        Parameters(req): Parameters<CreateVestingRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let caller = state.caller(req.caller.as_deref())?;
        let recipient = principal("recipient", &req.recipient)?;
        let vesting_type: VestingType =
            match req.vesting_type.as_deref().unwrap_or("linear").parse() {
                Ok(t) => t,
                Err(e) => return Ok(refusal(&e)),
            };
        let category: PaymentCategory = match req.category.as_deref().unwrap_or("other").parse() {
            Ok(c) => c,
            Err(e) => return Ok(refusal(&e)),
        };
        let asset = match state.funding_asset()? {
            Ok(a) => a,
            Err(refused) => return Ok(refused),
        };
        let now = state.now(req.now);
        let start_time = req.start_time.unwrap_or(now);

        let create = CreateVesting {
            recipient,
            asset,
            vesting_type,
            start_time,
            end_time: req.end_time,
            cliff_time: req.cliff_time.unwrap_or(start_time),
            total_amount: req.total_amount,
            category,
            description: req.description.unwrap_or_default(),
        };
        match state.store.create_vesting(&state.ledger, &caller, create, now) {
            Ok(vesting) => json_result(&vesting_view(&vesting, now)),
            Err(e) => rejected(e),
        }
    }

    #[tool(
        description = "Claim vested funds from the caller's own grant. Fails without side effects before the cliff or if the amount exceeds what is claimable."
    )]
    async fn claim_vesting(
        &self,
        Parameters(req): Parameters<PayoutRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let caller = principal("caller", &req.caller)?;
        let now = state.now(req.now);
        let address = vesting_address(&state.ledger, &caller);

        let claimed = match state.store.claim_vesting(&address, &caller, req.amount, now) {
            Ok(paid) => paid,
            Err(e) => return rejected(e),
        };
        match state.store.load_vesting(&address) {
            Ok(vesting) => {
                let mut view = vesting_view(&vesting, now);
                view["claimed"] = claimed.into();
                json_result(&view)
            }
            Err(e) => rejected(e),
        }
    }

    #[tool(
        description = "Pause or unpause the treasury. Authority only. Pausing blocks new streams and grants; redemptions and claims continue."
    )]
    async fn set_paused(
        &self,
        Parameters(req): Parameters<SetPausedRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let caller = state.caller(req.caller.as_deref())?;
        let now = state.now(req.now);
        match state.store.set_paused(&state.ledger, &caller, req.paused, now) {
            Ok(ledger) => json_result(&ledger.governance),
            Err(e) => rejected(e),
        }
    }

    #[tool(
        description = "Set the per-entity and total allocation caps. Authority only. Both must be non-zero and the per-entity cap may not exceed the total cap."
    )]
    async fn set_limits(
        &self,
        Parameters(req): Parameters<SetLimitsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let caller = state.caller(req.caller.as_deref())?;
        let now = state.now(req.now);
        match state.store.set_limits(
            &state.ledger,
            &caller,
            req.max_entity_amount,
            req.max_total_allocation,
            now,
        ) {
            Ok(ledger) => json_result(&ledger.governance),
            Err(e) => rejected(e),
        }
    }

    #[tool(description = "Show a recipient's stream: amounts, withdrawable now, and progress.")]
    async fn stream_status(
        &self,
        Parameters(req): Parameters<StatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let recipient = principal("recipient", &req.recipient)?;
        let now = state.now(req.now);
        match state.store.load_stream(&stream_address(&state.ledger, &recipient)) {
            Ok(stream) => json_result(&stream_view(&stream, now)),
            Err(e) => rejected(e),
        }
    }

    #[tool(description = "Show a recipient's vesting grant: amounts, claimable now, and progress.")]
    async fn vesting_status(
        &self,
        Parameters(req): Parameters<StatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let recipient = principal("recipient", &req.recipient)?;
        let now = state.now(req.now);
        match state.store.load_vesting(&vesting_address(&state.ledger, &recipient)) {
            Ok(vesting) => json_result(&vesting_view(&vesting, now)),
            Err(e) => rejected(e),
        }
    }

    #[tool(description = "Export the ledger, its streams and grants, and custody balances as a 1.0.0 JSON snapshot.")]
    async fn export(
        &self,
        Parameters(req): Parameters<ExportRequest>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let now = state.now(req.now);
        match state.store.export_json_string(&state.ledger, now) {
            Ok(json) => Ok(CallToolResult::success(vec![Content::text(json)])),
            Err(e) => rejected(e),
        }
    }
}

#[tool_handler]
impl ServerHandler for MiraiServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "DAO treasury: payment streams and vesting grants funded from one ledger.\n\n\
                 Principals are names or 64-char hex addresses. Amounts are integer base units; \
                 times are Unix seconds and default to the server clock.\n\
                 - treasury_stats: ledger aggregates, governance, reconciliation.\n\
                 - create_stream / create_vesting: authority only, escrow funds for one recipient.\n\
                 - redeem_stream / claim_vesting: the recipient withdraws what has unlocked.\n\
                 - set_paused / set_limits: authority only governance.\n\
                 Rejected operations return an error result with `kind` and `retryable`; \
                 nothing is changed when an operation is rejected."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
