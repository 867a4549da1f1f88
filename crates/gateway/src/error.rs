use crate::tls::TlsError;

/// Construction and start-up failures. Nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing RPC password")]
    MissingPassword,
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("can't listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("RPC server already started on {0}")]
    AlreadyStarted(std::net::SocketAddr),
}
