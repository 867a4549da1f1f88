use std::{
    net::{SocketAddr, TcpListener},
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Duration,
};

use {
    axum::{
        Router,
        body::Bytes,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        http::{HeaderMap, HeaderValue, StatusCode, header},
        middleware,
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    axum_server::{Handle, tls_rustls::{RustlsAcceptor, RustlsConfig}},
    hyper_util::rt::TokioTimer,
    secrecy::{ExposeSecret, SecretString},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tower::ServiceBuilder,
    tower_http::{
        catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer, timeout::TimeoutLayer,
    },
    tracing::{Instrument, Span, debug, error, info, info_span},
};

use rpcgate_protocol::Message;

use crate::{
    auth::{self, AuthGate},
    core::ClientCore,
    error::GatewayError,
    methods::RouteTable,
    tls::{default_cert_hosts, ensure_identity, load_tls_config},
    ws::StreamServer,
};

/// Bound on the TLS handshake, reading request headers, and handling one
/// command request.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for in-flight command requests once shutdown begins.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ── Config ───────────────────────────────────────────────────────────────────

/// Everything needed to construct an [`RpcServer`].
pub struct RpcConfig {
    pub core: Arc<dyn ClientCore>,
    /// Listen address, `host:port`.
    pub addr: String,
    pub user: String,
    pub pass: SecretString,
    pub cert: PathBuf,
    pub key: PathBuf,
    /// Names for a generated certificate. Empty means loopback plus hostname.
    pub cert_hosts: Vec<String>,
    /// Parent span for everything the server logs.
    pub span: Span,
}

impl RpcConfig {
    pub fn new(
        core: Arc<dyn ClientCore>,
        addr: impl Into<String>,
        pass: SecretString,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            core,
            addr: addr.into(),
            user: String::new(),
            pass,
            cert: cert.into(),
            key: key.into(),
            cert_hosts: Vec::new(),
            span: info_span!("rpc"),
        }
    }
}

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) auth: Arc<AuthGate>,
    pub(crate) routes: Arc<RouteTable>,
    pub(crate) core: Arc<dyn ClientCore>,
    pub(crate) stream: Arc<StreamServer>,
    pub(crate) span: Span,
}

// ── Server ───────────────────────────────────────────────────────────────────

pub struct RpcServer {
    addr: String,
    bound: OnceLock<SocketAddr>,
    tls: RustlsConfig,
    state: AppState,
}

impl RpcServer {
    /// Validate the configuration, provision the TLS identity if needed,
    /// and build the route table. Nothing is bound until [`Self::connect`].
    pub fn new(cfg: RpcConfig) -> Result<Self, GatewayError> {
        if cfg.pass.expose_secret().is_empty() {
            return Err(GatewayError::MissingPassword);
        }

        let hosts = if cfg.cert_hosts.is_empty() {
            default_cert_hosts()
        } else {
            cfg.cert_hosts
        };
        cfg.span
            .in_scope(|| ensure_identity(&cfg.cert, &cfg.key, &hosts))?;
        let tls = load_tls_config(&cfg.cert, &cfg.key)?;
        let auth = AuthGate::new(&cfg.user, &cfg.pass)?;

        let routes = Arc::new(RouteTable::new());
        let stream = Arc::new(StreamServer::new(
            Arc::clone(&routes),
            Arc::clone(&cfg.core),
            info_span!(parent: &cfg.span, "ws"),
        ));

        Ok(Self {
            addr: cfg.addr,
            bound: OnceLock::new(),
            tls,
            state: AppState {
                auth: Arc::new(auth),
                routes,
                core: cfg.core,
                stream,
                span: cfg.span,
            },
        })
    }

    /// The configured listen address.
    pub fn configured_addr(&self) -> &str {
        &self.addr
    }

    /// The concrete address once [`Self::connect`] has bound it.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.bound.get().copied()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.state.routes
    }

    pub fn stream_server(&self) -> &Arc<StreamServer> {
        &self.state.stream
    }

    /// Router with both endpoints behind the credential gate. Serve it with
    /// `into_make_service_with_connect_info::<SocketAddr>()`.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind and start serving. Cancelling `ctx` drains command requests,
    /// closes stream connections, and lets the returned tracker finish.
    pub fn connect(&self, ctx: CancellationToken) -> Result<TaskTracker, GatewayError> {
        if let Some(addr) = self.bound.get() {
            return Err(GatewayError::AlreadyStarted(*addr));
        }

        let listen_err = |source| GatewayError::Listen {
            addr: self.addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&self.addr).map_err(listen_err)?;
        listener.set_nonblocking(true).map_err(listen_err)?;
        let local = listener.local_addr().map_err(listen_err)?;
        if self.bound.set(local).is_err() {
            return Err(GatewayError::AlreadyStarted(
                self.bound.get().copied().unwrap_or(local),
            ));
        }

        let handle = Handle::new();
        let acceptor = RustlsAcceptor::new(self.tls.clone()).handshake_timeout(RPC_TIMEOUT);
        let mut server = axum_server::from_tcp(listener)
            .acceptor(acceptor)
            .handle(handle.clone());
        server
            .http_builder()
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(RPC_TIMEOUT);
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        let tracker = TaskTracker::new();
        let stopped = CancellationToken::new();
        let span = self.state.span.clone();

        let stream = Arc::clone(&self.state.stream);
        let serve_stopped = stopped.clone();
        tracker.spawn(
            async move {
                if let Err(e) = server.serve(app).await {
                    error!(error = %e, "unexpected RPC server error");
                }
                serve_stopped.cancel();
                stream.shutdown().await;
                info!("RPC server off");
            }
            .instrument(span.clone()),
        );

        let stream = Arc::clone(&self.state.stream);
        tracker.spawn(
            async move {
                tokio::select! {
                    () = ctx.cancelled() => {
                        info!("stopping RPC server");
                        handle.graceful_shutdown(Some(DRAIN_TIMEOUT));
                    }
                    () = stopped.cancelled() => {}
                }
                stream.shutdown().await;
            }
            .instrument(span.clone()),
        );

        tracker.close();
        span.in_scope(|| info!(addr = %local, "RPC server listening"));
        Ok(tracker)
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

fn build_router(state: AppState) -> Router {
    let command = post(handle_json).layer(
        ServiceBuilder::new()
            .layer(SetResponseHeaderLayer::overriding(
                header::CONNECTION,
                HeaderValue::from_static("close"),
            ))
            .layer(TimeoutLayer::new(RPC_TIMEOUT)),
    );

    Router::new()
        .route("/", command)
        .route("/ws", get(ws_upgrade_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn handle_json(State(state): State<AppState>, body: Bytes) -> Response {
    let req: Message = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            state
                .span
                .in_scope(|| debug!(error = %e, "cannot decode command body"));
            return (StatusCode::UNPROCESSABLE_ENTITY, "JSON decode error").into_response();
        },
    };
    if !req.is_request() {
        return (StatusCode::METHOD_NOT_ALLOWED, "Responses not accepted").into_response();
    }

    let payload = state
        .routes
        .dispatch(&req, Arc::clone(&state.core))
        .instrument(state.span.clone())
        .await;

    let encoded = Message::response(req.id, &payload)
        .map_err(|e| e.to_string())
        .and_then(|resp| serde_json::to_vec(&resp).map_err(|e| e.to_string()));
    match encoded {
        Ok(body) => (
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            body,
        )
            .into_response(),
        Err(e) => {
            state
                .span
                .in_scope(|| error!(error = %e, route = %req.route, "cannot encode response"));
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    state
        .stream
        .handle_upgrade(ws, auth::caller_addr(&headers, peer))
}

#[cfg(test)]
mod tests {
    use {super::*, crate::core::NoopCore};

    fn config(dir: &tempfile::TempDir, pass: &str) -> RpcConfig {
        let mut cfg = RpcConfig::new(
            Arc::new(NoopCore::default()),
            "127.0.0.1:0",
            SecretString::new(pass.to_string()),
            dir.path().join("rpc.cert"),
            dir.path().join("rpc.key"),
        );
        cfg.user = "user".into();
        cfg.cert_hosts = vec!["127.0.0.1".into()];
        cfg
    }

    #[test]
    fn empty_password_is_rejected_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let err = RpcServer::new(config(&dir, "")).err().unwrap();
        assert!(matches!(err, GatewayError::MissingPassword));
        assert!(!dir.path().join("rpc.cert").exists());
    }

    #[test]
    fn new_provisions_identity() {
        let dir = tempfile::tempdir().unwrap();
        let server = RpcServer::new(config(&dir, "pass")).unwrap();
        assert!(dir.path().join("rpc.cert").exists());
        assert!(dir.path().join("rpc.key").exists());
        assert!(server.addr().is_none());
        assert_eq!(server.routes().route_names().len(), 19);
    }

    #[test]
    fn lone_cert_file_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rpc.cert"), "x").unwrap();
        let err = RpcServer::new(config(&dir, "pass")).err().unwrap();
        assert!(matches!(err, GatewayError::Tls(_)));
    }

    #[tokio::test]
    async fn second_connect_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let server = RpcServer::new(config(&dir, "pass")).unwrap();
        let ctx = CancellationToken::new();
        let tracker = server.connect(ctx.clone()).unwrap();
        let bound = server.addr().unwrap();
        assert_ne!(bound.port(), 0);

        let err = server.connect(ctx.clone()).unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyStarted(addr) if addr == bound));

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(10), tracker.wait())
            .await
            .unwrap();
        assert!(server.stream_server().is_shut_down());
    }

    #[tokio::test]
    async fn bind_failure_is_a_listen_error() {
        let dir = tempfile::tempdir().unwrap();
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut cfg = config(&dir, "pass");
        cfg.addr = taken.local_addr().unwrap().to_string();
        let server = RpcServer::new(cfg).unwrap();
        let err = server.connect(CancellationToken::new()).unwrap_err();
        assert!(matches!(err, GatewayError::Listen { .. }));
        assert!(server.addr().is_none());
    }
}
