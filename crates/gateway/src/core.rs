//! Capability interface: the trading/wallet operations the RPC routes call.
//!
//! The gateway only ever talks to the engine through [`ClientCore`]. The
//! engine itself lives outside this crate; [`NoopCore`] is the stand-in when
//! nothing is attached and [`crate::testing::MockCore`] is the scripted
//! double used by tests.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    secrecy::SecretString,
    serde::{Deserialize, Serialize},
    tokio::sync::broadcast,
};

/// Numeric asset identifier (BIP-44 coin type).
pub type AssetId = u32;

/// Capacity of notification feeds handed to stream clients.
pub const NOTIFICATION_BUFFER: usize = 128;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("trading engine not connected")]
    NotConnected,
    #[error("incorrect password")]
    Password,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Rejected(String),
}

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub available: u64,
    pub immature: u64,
    pub locked: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletState {
    pub symbol: String,
    #[serde(rename = "assetID")]
    pub asset_id: AssetId,
    pub open: bool,
    pub running: bool,
    pub balance: WalletBalance,
    pub address: String,
    pub units: String,
}

/// Settings for a new wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletForm {
    pub asset_id: AssetId,
    pub config: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniOrder {
    pub qty: u64,
    pub rate: u64,
    pub sell: bool,
    pub token: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    pub sells: Vec<MiniOrder>,
    pub buys: Vec<MiniOrder>,
}

impl OrderBook {
    /// Keep at most `n` orders on each side.
    pub fn truncate(&mut self, n: usize) {
        self.sells.truncate(n);
        self.buys.truncate(n);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub name: String,
    pub base_id: AssetId,
    pub base_symbol: String,
    pub quote_id: AssetId,
    pub quote_symbol: String,
    pub lot_size: u64,
    pub epoch_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub host: String,
    pub markets: Vec<Market>,
    pub connected: bool,
    pub registration_fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub subject: String,
    pub details: String,
    pub stamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResult {
    pub notifications: Vec<Notification>,
    pub dexes: Vec<String>,
}

#[derive(Debug)]
pub struct RegisterForm {
    pub addr: String,
    pub app_pass: SecretString,
    pub fee: u64,
    pub cert: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResult {
    pub fee_id: String,
    pub req_confirms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeForm {
    pub host: String,
    pub is_limit: bool,
    pub sell: bool,
    pub base: AssetId,
    pub quote: AssetId,
    pub qty: u64,
    pub rate: u64,
    pub tif_now: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub host: String,
    #[serde(rename = "baseID")]
    pub base: AssetId,
    #[serde(rename = "quoteID")]
    pub quote: AssetId,
    pub sell: bool,
    pub qty: u64,
    pub rate: u64,
    pub status: String,
}

/// A coin created by a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub id: String,
    pub value: u64,
}

// ── Capability trait ─────────────────────────────────────────────────────────

/// Operations the RPC routes may invoke. Implementations must be safe to
/// call from many connections at once.
#[async_trait]
pub trait ClientCore: Send + Sync {
    async fn asset_balance(&self, asset_id: AssetId) -> Result<WalletBalance, CoreError>;
    async fn book(&self, host: &str, base: AssetId, quote: AssetId)
    -> Result<OrderBook, CoreError>;
    async fn cancel(&self, app_pass: &SecretString, order_id: &[u8]) -> Result<(), CoreError>;
    async fn close_wallet(&self, asset_id: AssetId) -> Result<(), CoreError>;
    async fn create_wallet(
        &self,
        app_pass: &SecretString,
        wallet_pass: &SecretString,
        form: WalletForm,
    ) -> Result<(), CoreError>;
    async fn exchanges(&self) -> HashMap<String, Exchange>;
    async fn initialize_client(
        &self,
        app_pass: &SecretString,
        seed: Option<Vec<u8>>,
    ) -> Result<(), CoreError>;
    async fn login(&self, app_pass: &SecretString) -> Result<LoginResult, CoreError>;
    async fn logout(&self) -> Result<(), CoreError>;
    async fn open_wallet(&self, asset_id: AssetId, app_pass: &SecretString)
    -> Result<(), CoreError>;
    async fn get_fee(&self, addr: &str, cert: Option<&str>) -> Result<u64, CoreError>;
    async fn register(&self, form: RegisterForm) -> Result<RegisterResult, CoreError>;
    async fn trade(&self, app_pass: &SecretString, form: TradeForm) -> Result<Order, CoreError>;
    async fn wallets(&self) -> Vec<WalletState>;
    async fn wallet_state(&self, asset_id: AssetId) -> Option<WalletState>;
    async fn withdraw(
        &self,
        app_pass: &SecretString,
        asset_id: AssetId,
        value: u64,
        addr: &str,
    ) -> Result<Coin, CoreError>;
    async fn export_seed(&self, app_pass: &SecretString) -> Result<Vec<u8>, CoreError>;

    /// Subscribe to engine notifications for push over the stream transport.
    fn notifications(&self) -> broadcast::Receiver<Notification>;
}

// ── Noop implementation ──────────────────────────────────────────────────────

/// Core used when no trading engine is attached. Listings are empty and
/// every fallible operation fails with [`CoreError::NotConnected`].
pub struct NoopCore {
    notes: broadcast::Sender<Notification>,
}

impl Default for NoopCore {
    fn default() -> Self {
        let (notes, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self { notes }
    }
}

#[async_trait]
impl ClientCore for NoopCore {
    async fn asset_balance(&self, _asset_id: AssetId) -> Result<WalletBalance, CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn book(
        &self,
        _host: &str,
        _base: AssetId,
        _quote: AssetId,
    ) -> Result<OrderBook, CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn cancel(&self, _app_pass: &SecretString, _order_id: &[u8]) -> Result<(), CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn close_wallet(&self, _asset_id: AssetId) -> Result<(), CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn create_wallet(
        &self,
        _app_pass: &SecretString,
        _wallet_pass: &SecretString,
        _form: WalletForm,
    ) -> Result<(), CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn exchanges(&self) -> HashMap<String, Exchange> {
        HashMap::new()
    }

    async fn initialize_client(
        &self,
        _app_pass: &SecretString,
        _seed: Option<Vec<u8>>,
    ) -> Result<(), CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn login(&self, _app_pass: &SecretString) -> Result<LoginResult, CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn logout(&self) -> Result<(), CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn open_wallet(
        &self,
        _asset_id: AssetId,
        _app_pass: &SecretString,
    ) -> Result<(), CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn get_fee(&self, _addr: &str, _cert: Option<&str>) -> Result<u64, CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn register(&self, _form: RegisterForm) -> Result<RegisterResult, CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn trade(&self, _app_pass: &SecretString, _form: TradeForm) -> Result<Order, CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn wallets(&self) -> Vec<WalletState> {
        Vec::new()
    }

    async fn wallet_state(&self, _asset_id: AssetId) -> Option<WalletState> {
        None
    }

    async fn withdraw(
        &self,
        _app_pass: &SecretString,
        _asset_id: AssetId,
        _value: u64,
        _addr: &str,
    ) -> Result<Coin, CoreError> {
        Err(CoreError::NotConnected)
    }

    async fn export_seed(&self, _app_pass: &SecretString) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::NotConnected)
    }

    fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_core_lists_nothing_and_refuses_work() {
        let core = NoopCore::default();
        assert!(core.wallets().await.is_empty());
        assert!(core.exchanges().await.is_empty());
        assert!(matches!(core.logout().await, Err(CoreError::NotConnected)));
        assert!(core.wallet_state(42).await.is_none());
    }

    #[test]
    fn book_truncates_both_sides() {
        let order = |sell| MiniOrder {
            qty: 1,
            rate: 1,
            sell,
            token: "t".into(),
            epoch: 0,
        };
        let mut book = OrderBook {
            sells: vec![order(true), order(true), order(true)],
            buys: vec![order(false)],
        };
        book.truncate(2);
        assert_eq!(book.sells.len(), 2);
        assert_eq!(book.buys.len(), 1);
    }
}
