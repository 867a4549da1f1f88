//! Configuration loading for the RPC gateway: file discovery, format
//! detection and `${ENV}` substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, data_dir, discover_and_load, load_config},
    schema::{DEFAULT_ADDR, GatewayFileConfig},
};
