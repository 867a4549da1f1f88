//! In-memory [`ClientCore`] double for tests and local experiments.
//!
//! State is scripted up front with the `with_*` builders; every call is
//! recorded by name so tests can assert what the routes invoked.

use std::collections::{BTreeMap, HashMap};

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, SecretString},
    tokio::sync::{Mutex, broadcast},
};

use crate::core::{
    AssetId, ClientCore, Coin, CoreError, Exchange, LoginResult, NOTIFICATION_BUFFER,
    Notification, Order, OrderBook, RegisterForm, RegisterResult, TradeForm, WalletBalance,
    WalletForm, WalletState,
};

#[derive(Default)]
struct MockState {
    initialized: bool,
    logged_in: bool,
    wallets: BTreeMap<AssetId, WalletState>,
    exchanges: HashMap<String, Exchange>,
    books: HashMap<(String, AssetId, AssetId), OrderBook>,
    orders: Vec<Order>,
    calls: Vec<&'static str>,
}

pub struct MockCore {
    app_pass: String,
    fee: u64,
    seed: Vec<u8>,
    stall: Option<&'static str>,
    state: Mutex<MockState>,
    notes: broadcast::Sender<Notification>,
}

impl MockCore {
    /// A core whose app password is `app_pass`.
    pub fn new(app_pass: impl Into<String>) -> Self {
        let (notes, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            app_pass: app_pass.into(),
            fee: 100_000_000,
            seed: vec![0xab; 64],
            stall: None,
            state: Mutex::new(MockState::default()),
            notes,
        }
    }

    pub fn with_wallet(mut self, wallet: WalletState) -> Self {
        self.state.get_mut().wallets.insert(wallet.asset_id, wallet);
        self
    }

    pub fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.state
            .get_mut()
            .exchanges
            .insert(exchange.host.clone(), exchange);
        self
    }

    pub fn with_book(mut self, host: &str, base: AssetId, quote: AssetId, book: OrderBook) -> Self {
        self.state
            .get_mut()
            .books
            .insert((host.to_string(), base, quote), book);
        self
    }

    pub fn with_fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    /// Make the named operation hang forever once invoked.
    pub fn with_stall(mut self, call: &'static str) -> Self {
        self.stall = Some(call);
        self
    }

    /// Names of the core operations invoked so far, in call order.
    pub async fn calls(&self) -> Vec<&'static str> {
        self.state.lock().await.calls.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state.lock().await.logged_in
    }

    /// Push a notification to every subscribed stream client. Returns the
    /// number of subscribers reached.
    pub fn notify(&self, note: Notification) -> usize {
        self.notes.send(note).unwrap_or(0)
    }

    fn check_pass(&self, pass: &SecretString) -> Result<(), CoreError> {
        if pass.expose_secret() == &self.app_pass {
            Ok(())
        } else {
            Err(CoreError::Password)
        }
    }

    async fn record(&self, call: &'static str) -> tokio::sync::MutexGuard<'_, MockState> {
        {
            let mut state = self.state.lock().await;
            state.calls.push(call);
        }
        if self.stall == Some(call) {
            std::future::pending::<()>().await;
        }
        self.state.lock().await
    }
}

#[async_trait]
impl ClientCore for MockCore {
    async fn asset_balance(&self, asset_id: AssetId) -> Result<WalletBalance, CoreError> {
        let state = self.record("asset_balance").await;
        state
            .wallets
            .get(&asset_id)
            .map(|w| w.balance.clone())
            .ok_or_else(|| CoreError::NotFound(format!("wallet for asset {asset_id}")))
    }

    async fn book(
        &self,
        host: &str,
        base: AssetId,
        quote: AssetId,
    ) -> Result<OrderBook, CoreError> {
        let state = self.record("book").await;
        state
            .books
            .get(&(host.to_string(), base, quote))
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("market {base}-{quote} at {host}")))
    }

    async fn cancel(&self, app_pass: &SecretString, order_id: &[u8]) -> Result<(), CoreError> {
        let mut state = self.record("cancel").await;
        self.check_pass(app_pass)?;
        let id = hex::encode(order_id);
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("order {id}")))?;
        order.status = "canceled".into();
        Ok(())
    }

    async fn close_wallet(&self, asset_id: AssetId) -> Result<(), CoreError> {
        let mut state = self.record("close_wallet").await;
        let wallet = state
            .wallets
            .get_mut(&asset_id)
            .ok_or_else(|| CoreError::NotFound(format!("wallet for asset {asset_id}")))?;
        wallet.open = false;
        Ok(())
    }

    async fn create_wallet(
        &self,
        app_pass: &SecretString,
        _wallet_pass: &SecretString,
        form: WalletForm,
    ) -> Result<(), CoreError> {
        let mut state = self.record("create_wallet").await;
        self.check_pass(app_pass)?;
        if state.wallets.contains_key(&form.asset_id) {
            return Err(CoreError::Rejected(format!(
                "wallet for asset {} already exists",
                form.asset_id
            )));
        }
        let symbol = form
            .config
            .get("symbol")
            .cloned()
            .unwrap_or_else(|| format!("asset{}", form.asset_id));
        state.wallets.insert(form.asset_id, WalletState {
            symbol,
            asset_id: form.asset_id,
            open: true,
            running: true,
            balance: WalletBalance::default(),
            address: format!("addr-{}", form.asset_id),
            units: "atoms".into(),
        });
        Ok(())
    }

    async fn exchanges(&self) -> HashMap<String, Exchange> {
        self.record("exchanges").await.exchanges.clone()
    }

    async fn initialize_client(
        &self,
        app_pass: &SecretString,
        _seed: Option<Vec<u8>>,
    ) -> Result<(), CoreError> {
        let mut state = self.record("initialize_client").await;
        self.check_pass(app_pass)?;
        if state.initialized {
            return Err(CoreError::Rejected("already initialized".into()));
        }
        state.initialized = true;
        Ok(())
    }

    async fn login(&self, app_pass: &SecretString) -> Result<LoginResult, CoreError> {
        let mut state = self.record("login").await;
        self.check_pass(app_pass)?;
        state.logged_in = true;
        Ok(LoginResult {
            notifications: Vec::new(),
            dexes: state.exchanges.keys().cloned().collect(),
        })
    }

    async fn logout(&self) -> Result<(), CoreError> {
        let mut state = self.record("logout").await;
        if !state.logged_in {
            return Err(CoreError::Rejected("not logged in".into()));
        }
        state.logged_in = false;
        Ok(())
    }

    async fn open_wallet(
        &self,
        asset_id: AssetId,
        app_pass: &SecretString,
    ) -> Result<(), CoreError> {
        let mut state = self.record("open_wallet").await;
        self.check_pass(app_pass)?;
        let wallet = state
            .wallets
            .get_mut(&asset_id)
            .ok_or_else(|| CoreError::NotFound(format!("wallet for asset {asset_id}")))?;
        wallet.open = true;
        Ok(())
    }

    async fn get_fee(&self, addr: &str, _cert: Option<&str>) -> Result<u64, CoreError> {
        let _state = self.record("get_fee").await;
        if addr.is_empty() {
            return Err(CoreError::Rejected("no host".into()));
        }
        Ok(self.fee)
    }

    async fn register(&self, form: RegisterForm) -> Result<RegisterResult, CoreError> {
        let _state = self.record("register").await;
        self.check_pass(&form.app_pass)?;
        if form.fee != self.fee {
            return Err(CoreError::Rejected(format!(
                "fee mismatch: expected {}, got {}",
                self.fee, form.fee
            )));
        }
        Ok(RegisterResult {
            fee_id: format!("fee-{}", form.addr),
            req_confirms: 1,
        })
    }

    async fn trade(&self, app_pass: &SecretString, form: TradeForm) -> Result<Order, CoreError> {
        let mut state = self.record("trade").await;
        self.check_pass(app_pass)?;
        if !state.exchanges.contains_key(&form.host) {
            return Err(CoreError::NotFound(format!("exchange {}", form.host)));
        }
        let order = Order {
            id: format!("{:064x}", state.orders.len() + 1),
            host: form.host,
            base: form.base,
            quote: form.quote,
            sell: form.sell,
            qty: form.qty,
            rate: form.rate,
            status: "booked".into(),
        };
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn wallets(&self) -> Vec<WalletState> {
        self.record("wallets").await.wallets.values().cloned().collect()
    }

    async fn wallet_state(&self, asset_id: AssetId) -> Option<WalletState> {
        self.record("wallet_state").await.wallets.get(&asset_id).cloned()
    }

    async fn withdraw(
        &self,
        app_pass: &SecretString,
        asset_id: AssetId,
        value: u64,
        addr: &str,
    ) -> Result<Coin, CoreError> {
        let mut state = self.record("withdraw").await;
        self.check_pass(app_pass)?;
        let wallet = state
            .wallets
            .get_mut(&asset_id)
            .ok_or_else(|| CoreError::NotFound(format!("wallet for asset {asset_id}")))?;
        if wallet.balance.available < value {
            return Err(CoreError::Rejected("insufficient funds".into()));
        }
        wallet.balance.available -= value;
        Ok(Coin {
            id: format!("{addr}:0"),
            value,
        })
    }

    async fn export_seed(&self, app_pass: &SecretString) -> Result<Vec<u8>, CoreError> {
        let _state = self.record("export_seed").await;
        self.check_pass(app_pass)?;
        Ok(self.seed.clone())
    }

    fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notes.subscribe()
    }
}
