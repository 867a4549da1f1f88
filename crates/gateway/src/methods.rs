use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use {
    serde::Serialize,
    serde_json::{Value, json},
    tracing::debug,
};

use rpcgate_protocol::{ErrorCode, Message, ResponsePayload, RpcError, RpcVersion};

use crate::{
    args::{self, ArgsError, RawParams},
    core::{AssetId, ClientCore, CoreError},
};

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every route handler.
pub struct HandlerContext {
    pub core: Arc<dyn ClientCore>,
    pub params: RawParams,
}

/// The result a route handler produces.
pub type RouteResult = Result<Value, RpcError>;

/// A boxed async route handler.
pub type HandlerFn =
    Box<dyn Fn(HandlerContext) -> Pin<Box<dyn Future<Output = RouteResult> + Send>> + Send + Sync>;

impl From<ArgsError> for RpcError {
    fn from(err: ArgsError) -> Self {
        RpcError::new(ErrorCode::Arguments, err.to_string())
    }
}

fn encode<T: Serialize>(thing: &T) -> RouteResult {
    serde_json::to_value(thing)
        .map_err(|e| RpcError::new(ErrorCode::Internal, format!("unable to encode result: {e}")))
}

fn core_err(code: ErrorCode, what: &'static str) -> impl FnOnce(CoreError) -> RpcError {
    move |e| RpcError::new(code, format!("{what}: {e}"))
}

// ── Help ─────────────────────────────────────────────────────────────────────

struct RouteHelp {
    route: &'static str,
    pw_args: &'static str,
    args: &'static str,
    summary: &'static str,
}

const ROUTE_HELP: &[RouteHelp] = &[
    RouteHelp {
        route: "help",
        pw_args: "",
        args: "[route]",
        summary: "Print a help message for all routes, or for one route.",
    },
    RouteHelp {
        route: "version",
        pw_args: "",
        args: "",
        summary: "Print the RPC server version as {major, minor, patch}.",
    },
    RouteHelp {
        route: "init",
        pw_args: "appPass",
        args: "[seedHex]",
        summary: "Initialize the client with an app password, optionally restoring from a hex seed.",
    },
    RouteHelp {
        route: "login",
        pw_args: "appPass",
        args: "",
        summary: "Log in to the client. Returns pending notifications and connected exchanges.",
    },
    RouteHelp {
        route: "logout",
        pw_args: "",
        args: "",
        summary: "Log out of the client.",
    },
    RouteHelp {
        route: "getfee",
        pw_args: "",
        args: "host [cert]",
        summary: "Fetch the registration fee quoted by an exchange.",
    },
    RouteHelp {
        route: "register",
        pw_args: "appPass",
        args: "host fee [cert]",
        summary: "Register with an exchange. The fee must equal the quoted fee.",
    },
    RouteHelp {
        route: "exchanges",
        pw_args: "",
        args: "",
        summary: "List known exchanges keyed by host, with their markets.",
    },
    RouteHelp {
        route: "orderbook",
        pw_args: "",
        args: "host base quote [nOrders]",
        summary: "Fetch a market's order book, keeping at most nOrders per side.",
    },
    RouteHelp {
        route: "trade",
        pw_args: "appPass",
        args: "host isLimit sell base quote qty rate tifNow",
        summary: "Place an order. Booleans are true/false; qty and rate are in atoms.",
    },
    RouteHelp {
        route: "cancel",
        pw_args: "appPass",
        args: "orderID",
        summary: "Cancel an order by its 32-byte hex ID.",
    },
    RouteHelp {
        route: "wallets",
        pw_args: "",
        args: "",
        summary: "List every configured wallet.",
    },
    RouteHelp {
        route: "walletstate",
        pw_args: "",
        args: "assetID",
        summary: "Show the state of one wallet.",
    },
    RouteHelp {
        route: "balance",
        pw_args: "",
        args: "assetID",
        summary: "Show the balance of one wallet.",
    },
    RouteHelp {
        route: "newwallet",
        pw_args: "appPass walletPass",
        args: "assetID [settingsJSON]",
        summary: "Create and unlock a wallet. Settings are a JSON object of strings.",
    },
    RouteHelp {
        route: "openwallet",
        pw_args: "appPass",
        args: "assetID",
        summary: "Unlock a wallet.",
    },
    RouteHelp {
        route: "closewallet",
        pw_args: "",
        args: "assetID",
        summary: "Lock a wallet.",
    },
    RouteHelp {
        route: "withdraw",
        pw_args: "appPass",
        args: "assetID value address",
        summary: "Send value atoms to an address. Returns the new coin ID.",
    },
    RouteHelp {
        route: "exportseed",
        pw_args: "appPass",
        args: "",
        summary: "Export the client's seed as hex.",
    },
];

fn usage(h: &RouteHelp) -> String {
    let mut line = h.route.to_string();
    if !h.pw_args.is_empty() {
        line.push_str(&format!(" (PWArgs: {})", h.pw_args));
    }
    if !h.args.is_empty() {
        line.push(' ');
        line.push_str(h.args);
    }
    line
}

/// Help for all routes, or for one.
pub fn help_text(route: Option<&str>) -> Option<String> {
    match route {
        None => Some(
            ROUTE_HELP
                .iter()
                .map(usage)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Some(name) => ROUTE_HELP
            .iter()
            .find(|h| h.route == name)
            .map(|h| format!("{}\n\n{}", usage(h), h.summary)),
    }
}

// ── Route table ──────────────────────────────────────────────────────────────

/// Maps route names to handlers. Built once; there is no way to add routes
/// after construction.
pub struct RouteTable {
    handlers: HashMap<&'static str, HandlerFn>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        let mut table = Self {
            handlers: HashMap::new(),
        };
        table.register_defaults();
        table
    }

    fn register<F, Fut>(&mut self, route: &'static str, handler: F)
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RouteResult> + Send + 'static,
    {
        let boxed: HandlerFn = Box::new(
            move |ctx| -> Pin<Box<dyn Future<Output = RouteResult> + Send>> {
                Box::pin(handler(ctx))
            },
        );
        self.handlers.insert(route, boxed);
    }

    /// Run one request envelope through the pipeline.
    pub async fn dispatch(&self, msg: &Message, core: Arc<dyn ClientCore>) -> ResponsePayload {
        if msg.route.is_empty() {
            debug!(id = msg.id, "request without a route");
            return ResponsePayload::err(ErrorCode::UnknownRoute, "no route was supplied");
        }

        let Some(handler) = self.handlers.get(msg.route.as_str()) else {
            debug!(route = %msg.route, "unknown route");
            return ResponsePayload::err(ErrorCode::UnknownRoute, "unknown route");
        };

        let params: RawParams = match msg.decode_payload() {
            Ok(params) => params,
            Err(e) => {
                debug!(route = %msg.route, error = %e, "cannot decode params");
                return ResponsePayload::err(ErrorCode::ParseError, "unable to unmarshal request");
            },
        };

        debug!(route = %msg.route, id = msg.id, "dispatching route");
        match handler(HandlerContext { core, params }).await {
            Ok(result) => ResponsePayload::ok(result),
            Err(err) => {
                debug!(route = %msg.route, code = %err.code, msg = %err.message, "route error");
                ResponsePayload::err(err.code, err.message)
            },
        }
    }

    pub fn route_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    fn register_defaults(&mut self) {
        self.register("help", handle_help);
        self.register("version", handle_version);
        self.register_account_routes();
        self.register_exchange_routes();
        self.register_wallet_routes();
    }

    fn register_account_routes(&mut self) {
        self.register("init", handle_init);
        self.register("login", handle_login);
        self.register("logout", handle_logout);
        self.register("exportseed", handle_export_seed);
    }

    fn register_exchange_routes(&mut self) {
        self.register("getfee", handle_get_fee);
        self.register("register", handle_register);
        self.register("exchanges", handle_exchanges);
        self.register("orderbook", handle_order_book);
        self.register("trade", handle_trade);
        self.register("cancel", handle_cancel);
    }

    fn register_wallet_routes(&mut self) {
        self.register("wallets", handle_wallets);
        self.register("walletstate", handle_wallet_state);
        self.register("balance", handle_balance);
        self.register("newwallet", handle_new_wallet);
        self.register("openwallet", handle_open_wallet);
        self.register("closewallet", handle_close_wallet);
        self.register("withdraw", handle_withdraw);
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn handle_help(ctx: HandlerContext) -> RouteResult {
    let route = args::parse_help_args(ctx.params)?;
    help_text(route.as_deref())
        .map(Value::String)
        .ok_or_else(|| {
            RpcError::new(
                ErrorCode::Arguments,
                format!("unknown route: {}", route.unwrap_or_default()),
            )
        })
}

async fn handle_version(_ctx: HandlerContext) -> RouteResult {
    encode(&RpcVersion::current())
}

async fn handle_init(ctx: HandlerContext) -> RouteResult {
    let (app_pass, seed) = args::parse_init_args(ctx.params)?;
    ctx.core
        .initialize_client(&app_pass, seed)
        .await
        .map_err(core_err(ErrorCode::Init, "unable to initialize client"))?;
    Ok(json!("app initialized"))
}

async fn handle_login(ctx: HandlerContext) -> RouteResult {
    let app_pass = args::parse_app_pass(ctx.params)?;
    let res = ctx
        .core
        .login(&app_pass)
        .await
        .map_err(core_err(ErrorCode::Login, "unable to login"))?;
    encode(&res)
}

async fn handle_logout(ctx: HandlerContext) -> RouteResult {
    ctx.core
        .logout()
        .await
        .map_err(core_err(ErrorCode::Logout, "unable to logout"))?;
    Ok(json!("goodbye"))
}

async fn handle_export_seed(ctx: HandlerContext) -> RouteResult {
    let app_pass = args::parse_app_pass(ctx.params)?;
    let seed = ctx
        .core
        .export_seed(&app_pass)
        .await
        .map_err(core_err(ErrorCode::ExportSeed, "unable to export seed"))?;
    Ok(Value::String(hex::encode(seed)))
}

async fn handle_get_fee(ctx: HandlerContext) -> RouteResult {
    let (host, cert) = args::parse_getfee_args(ctx.params)?;
    let fee = ctx
        .core
        .get_fee(&host, cert.as_deref())
        .await
        .map_err(core_err(ErrorCode::GetFee, "unable to get fee"))?;
    Ok(json!({ "fee": fee }))
}

async fn handle_register(ctx: HandlerContext) -> RouteResult {
    let form = args::parse_register_args(ctx.params)?;
    let quoted = ctx
        .core
        .get_fee(&form.addr, form.cert.as_deref())
        .await
        .map_err(core_err(ErrorCode::Register, "unable to get fee"))?;
    if quoted != form.fee {
        return Err(RpcError::new(
            ErrorCode::Register,
            format!("fee mismatch: quoted {quoted}, got {}", form.fee),
        ));
    }
    let res = ctx
        .core
        .register(form)
        .await
        .map_err(core_err(ErrorCode::Register, "unable to register"))?;
    encode(&res)
}

async fn handle_exchanges(ctx: HandlerContext) -> RouteResult {
    encode(&ctx.core.exchanges().await)
}

async fn handle_order_book(ctx: HandlerContext) -> RouteResult {
    let req = args::parse_orderbook_args(ctx.params)?;
    let mut book = ctx
        .core
        .book(&req.host, req.base, req.quote)
        .await
        .map_err(core_err(ErrorCode::OrderBook, "unable to retrieve order book"))?;
    if let Some(n) = req.n_orders {
        book.truncate(n);
    }
    encode(&book)
}

async fn handle_trade(ctx: HandlerContext) -> RouteResult {
    let (app_pass, form) = args::parse_trade_args(ctx.params)?;
    let order = ctx
        .core
        .trade(&app_pass, form)
        .await
        .map_err(core_err(ErrorCode::Trade, "unable to trade"))?;
    encode(&order)
}

async fn handle_cancel(ctx: HandlerContext) -> RouteResult {
    let (app_pass, order_id) = args::parse_cancel_args(ctx.params)?;
    ctx.core
        .cancel(&app_pass, &order_id)
        .await
        .map_err(core_err(ErrorCode::Cancel, "unable to cancel order"))?;
    Ok(Value::String(format!(
        "canceled order {}",
        hex::encode(order_id)
    )))
}

async fn handle_wallets(ctx: HandlerContext) -> RouteResult {
    encode(&ctx.core.wallets().await)
}

async fn handle_wallet_state(ctx: HandlerContext) -> RouteResult {
    let asset_id = args::parse_asset_arg(ctx.params)?;
    let state = ctx.core.wallet_state(asset_id).await.ok_or_else(|| {
        RpcError::new(
            ErrorCode::WalletState,
            format!("no wallet found for asset {asset_id}"),
        )
    })?;
    encode(&state)
}

async fn handle_balance(ctx: HandlerContext) -> RouteResult {
    let asset_id = args::parse_asset_arg(ctx.params)?;
    let balance = ctx
        .core
        .asset_balance(asset_id)
        .await
        .map_err(core_err(ErrorCode::Balance, "unable to get balance"))?;
    encode(&balance)
}

/// Display name for an asset: the wallet's symbol when one is configured.
async fn asset_name(core: &dyn ClientCore, asset_id: AssetId) -> String {
    core.wallet_state(asset_id)
        .await
        .map(|w| w.symbol)
        .unwrap_or_else(|| format!("asset {asset_id}"))
}

async fn handle_new_wallet(ctx: HandlerContext) -> RouteResult {
    let (app_pass, wallet_pass, form) = args::parse_newwallet_args(ctx.params)?;
    let asset_id = form.asset_id;
    if let Some(existing) = ctx.core.wallet_state(asset_id).await {
        return Err(RpcError::new(
            ErrorCode::WalletExists,
            format!("error creating {} wallet: wallet already exists", existing.symbol),
        ));
    }
    ctx.core
        .create_wallet(&app_pass, &wallet_pass, form)
        .await
        .map_err(core_err(ErrorCode::CreateWallet, "error creating wallet"))?;
    let name = asset_name(ctx.core.as_ref(), asset_id).await;
    Ok(Value::String(format!("{name} wallet created and unlocked")))
}

async fn handle_open_wallet(ctx: HandlerContext) -> RouteResult {
    let (app_pass, asset_id) = args::parse_openwallet_args(ctx.params)?;
    ctx.core
        .open_wallet(asset_id, &app_pass)
        .await
        .map_err(core_err(ErrorCode::OpenWallet, "error unlocking wallet"))?;
    let name = asset_name(ctx.core.as_ref(), asset_id).await;
    Ok(Value::String(format!("{name} wallet unlocked")))
}

async fn handle_close_wallet(ctx: HandlerContext) -> RouteResult {
    let asset_id = args::parse_asset_arg(ctx.params)?;
    ctx.core
        .close_wallet(asset_id)
        .await
        .map_err(core_err(ErrorCode::CloseWallet, "unable to close wallet"))?;
    let name = asset_name(ctx.core.as_ref(), asset_id).await;
    Ok(Value::String(format!("{name} wallet locked")))
}

async fn handle_withdraw(ctx: HandlerContext) -> RouteResult {
    let req = args::parse_withdraw_args(ctx.params)?;
    let coin = ctx
        .core
        .withdraw(&req.app_pass, req.asset_id, req.value, &req.address)
        .await
        .map_err(core_err(ErrorCode::Withdraw, "unable to withdraw"))?;
    Ok(Value::String(coin.id))
}
