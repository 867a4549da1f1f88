//! Gateway: authenticated HTTPS + WebSocket RPC front end for a trading
//! client.
//!
//! Lifecycle:
//! 1. Provision or load the TLS identity
//! 2. Build the credential gate and route table
//! 3. Bind and serve `POST /` (one command per request) and `GET /ws`
//!    (long-lived stream clients)
//! 4. On cancellation, drain command requests and close stream clients
//!
//! Every route reaches the trading engine through [`ClientCore`].

pub mod args;
pub mod auth;
pub mod core;
pub mod error;
pub mod methods;
pub mod server;
pub mod testing;
pub mod tls;
pub mod ws;

pub use {
    crate::core::{ClientCore, CoreError, NoopCore},
    error::GatewayError,
    methods::RouteTable,
    server::{RPC_TIMEOUT, RpcConfig, RpcServer},
    tls::{TlsError, ensure_identity},
    ws::StreamServer,
};
