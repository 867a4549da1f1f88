//! Gateway config file schema.

use std::path::PathBuf;

use {secrecy::SecretString, serde::Deserialize};

use crate::loader::data_dir;

/// Default listen address for the RPC server.
pub const DEFAULT_ADDR: &str = "127.0.0.1:5757";

const DEFAULT_CERT_FILE: &str = "rpc.cert";
const DEFAULT_KEY_FILE: &str = "rpc.key";

/// Root configuration, as read from `rpcgate.{toml,yaml,yml,json}`.
///
/// Every field is optional in the file; command-line flags override what is
/// found here.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GatewayFileConfig {
    /// Listen address. Port `0` binds an ephemeral port.
    pub addr: String,

    /// Basic-auth user name.
    pub user: String,

    /// Basic-auth secret. Required to start the server.
    pub pass: Option<SecretString>,

    /// TLS certificate path. Defaults to `~/.rpcgate/rpc.cert`.
    pub cert: Option<PathBuf>,

    /// TLS private key path. Defaults to `~/.rpcgate/rpc.key`.
    pub key: Option<PathBuf>,

    /// Hostnames / IPs covered by a generated self-signed certificate. Empty
    /// means loopback plus this machine's hostname.
    pub cert_hosts: Vec<String>,
}

impl Default for GatewayFileConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.into(),
            user: String::new(),
            pass: None,
            cert: None,
            key: None,
            cert_hosts: Vec::new(),
        }
    }
}

impl GatewayFileConfig {
    pub fn cert_path(&self) -> PathBuf {
        self.cert
            .clone()
            .unwrap_or_else(|| data_dir().join(DEFAULT_CERT_FILE))
    }

    pub fn key_path(&self) -> PathBuf {
        self.key
            .clone()
            .unwrap_or_else(|| data_dir().join(DEFAULT_KEY_FILE))
    }
}
