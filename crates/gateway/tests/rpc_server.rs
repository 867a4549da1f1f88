//! End-to-end checks of the HTTPS command endpoint against a live listener.

use std::{io::BufReader, sync::Arc, time::Duration};

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    futures::{SinkExt, StreamExt},
    reqwest::StatusCode,
    rpcgate_gateway::{
        RpcConfig, RpcServer,
        auth::AUTH_CHALLENGE,
        core::{WalletBalance, WalletState},
        testing::MockCore,
    },
    rpcgate_protocol::{ErrorCode, Message, ResponsePayload},
    secrecy::SecretString,
    serde_json::{Value, json},
    tempfile::TempDir,
    tokio::net::TcpStream,
    tokio_tungstenite::{
        Connector, MaybeTlsStream, WebSocketStream,
        tungstenite::{
            Message as WsMessage, client::IntoClientRequest, http::HeaderValue,
            protocol::frame::coding::CloseCode,
        },
    },
    tokio_util::{sync::CancellationToken, task::TaskTracker},
};

struct Running {
    server: RpcServer,
    ctx: CancellationToken,
    tracker: TaskTracker,
    url: String,
    dir: TempDir,
}

fn wallet() -> WalletState {
    WalletState {
        symbol: "dcr".into(),
        asset_id: 42,
        open: true,
        running: true,
        balance: WalletBalance {
            available: 1_000,
            immature: 0,
            locked: 0,
        },
        address: "Dsaddr".into(),
        units: "atoms".into(),
    }
}

fn start() -> Running {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = RpcConfig::new(
        Arc::new(MockCore::new("apppass").with_wallet(wallet())),
        "127.0.0.1:0",
        SecretString::new("pass".to_string()),
        dir.path().join("rpc.cert"),
        dir.path().join("rpc.key"),
    );
    cfg.user = "user".into();
    cfg.cert_hosts = vec!["127.0.0.1".into(), "localhost".into()];

    let server = RpcServer::new(cfg).unwrap();
    let ctx = CancellationToken::new();
    let tracker = server.connect(ctx.clone()).unwrap();
    let url = format!("https://{}/", server.addr().unwrap());
    Running {
        server,
        ctx,
        tracker,
        url,
        dir,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

async fn post(run: &Running, pass: &str, body: String) -> reqwest::Response {
    client()
        .post(&run.url)
        .basic_auth("user", Some(pass))
        .body(body)
        .send()
        .await
        .unwrap()
}

fn request(id: u64, route: &str, params: Value) -> String {
    serde_json::to_string(&Message::request(id, route, &params).unwrap()).unwrap()
}

async fn payload(resp: reqwest::Response) -> (u64, ResponsePayload) {
    let msg: Message = resp.json().await.unwrap();
    assert!(!msg.is_request());
    (msg.id, msg.response_payload().unwrap())
}

/// Open an authenticated `wss://` connection that trusts the generated cert.
async fn open_stream(run: &Running) -> WebSocketStream<MaybeTlsStream<TcpStream>> {
    let pem = std::fs::read(run.dir.path().join("rpc.cert")).unwrap();
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut BufReader::new(pem.as_slice())) {
        roots.add(cert.unwrap()).unwrap();
    }
    let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();

    let url = format!("wss://{}/ws", run.server.addr().unwrap());
    let mut req = url.into_client_request().unwrap();
    let auth = format!("Basic {}", STANDARD.encode("user:pass"));
    req.headers_mut()
        .insert("authorization", HeaderValue::from_str(&auth).unwrap());
    let (ws, _) = tokio_tungstenite::connect_async_tls_with_config(
        req,
        None,
        false,
        Some(Connector::Rustls(Arc::new(tls))),
    )
    .await
    .unwrap();
    ws
}

#[tokio::test]
async fn wallets_round_trip() {
    let run = start();
    let resp = post(&run, "pass", request(1, "wallets", Value::Null)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("connection").unwrap().to_str().unwrap(),
        "close"
    );

    let (id, payload) = payload(resp).await;
    assert_eq!(id, 1);
    assert!(!payload.is_error());
    let wallets = payload.result.unwrap();
    assert_eq!(wallets.as_array().unwrap().len(), 1);
    assert_eq!(wallets[0]["symbol"], "dcr");
    run.ctx.cancel();
}

#[tokio::test]
async fn wrong_password_gets_challenge() {
    let run = start();
    let resp = post(&run, "wrong", request(1, "wallets", Value::Null)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        resp.headers()
            .get("www-authenticate")
            .unwrap()
            .to_str()
            .unwrap(),
        AUTH_CHALLENGE
    );

    let anonymous = client()
        .post(&run.url)
        .body(request(1, "wallets", Value::Null))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    run.ctx.cancel();
}

#[tokio::test]
async fn unknown_route_is_reported_in_payload() {
    let run = start();
    let resp = post(&run, "pass", request(9, "nope", Value::Null)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let (id, payload) = payload(resp).await;
    assert_eq!(id, 9);
    assert!(payload.result.is_none());
    assert_eq!(payload.error.unwrap().code, ErrorCode::UnknownRoute);
    run.ctx.cancel();
}

#[tokio::test]
async fn route_errors_keep_the_request_id() {
    let run = start();
    let resp = post(
        &run,
        "pass",
        request(5, "balance", json!({"args": ["not-an-asset"]})),
    )
    .await;
    let (id, payload) = payload(resp).await;
    assert_eq!(id, 5);
    assert_eq!(payload.error.unwrap().code, ErrorCode::Arguments);
    run.ctx.cancel();
}

#[tokio::test]
async fn response_envelopes_are_refused() {
    let run = start();
    let body = serde_json::to_string(&Message::response(1, &ResponsePayload::ok(json!(1))).unwrap())
        .unwrap();
    let resp = post(&run, "pass", body).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.text().await.unwrap(), "Responses not accepted");
    run.ctx.cancel();
}

#[tokio::test]
async fn garbage_body_is_unprocessable() {
    let run = start();
    for body in ["{{{", r#"{"type": 9, "id": 1}"#] {
        let resp = post(&run, "pass", body.to_string()).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY, "{body}");
        assert_eq!(resp.text().await.unwrap(), "JSON decode error");
    }
    run.ctx.cancel();
}

#[tokio::test]
async fn cancellation_stops_everything() {
    let run = start();
    let resp = post(&run, "pass", request(1, "version", Value::Null)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    run.ctx.cancel();
    tokio::time::timeout(Duration::from_secs(15), run.tracker.wait())
        .await
        .unwrap();
    assert!(run.server.stream_server().is_shut_down());

    let after = client()
        .post(&run.url)
        .basic_auth("user", Some("pass"))
        .body(request(2, "version", Value::Null))
        .send()
        .await;
    assert!(after.is_err());
}

#[tokio::test]
async fn cancellation_closes_stream_clients() {
    let run = start();
    let mut ws = open_stream(&run).await;

    let req = request(3, "version", Value::Null);
    ws.send(WsMessage::Text(req.into())).await.unwrap();
    let reply = loop {
        match ws.next().await.unwrap().unwrap() {
            WsMessage::Text(text) => break serde_json::from_str::<Message>(text.as_str()).unwrap(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    };
    assert_eq!(reply.id, 3);
    assert_eq!(run.server.stream_server().client_count(), 1);

    run.ctx.cancel();
    let closed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Close(frame))) => return frame.map(|f| f.code),
                Some(Ok(_)) => continue,
                None | Some(Err(_)) => return None,
            }
        }
    })
    .await
    .unwrap();
    if let Some(code) = closed {
        assert_eq!(code, CloseCode::Away);
    }
    drop(ws);

    tokio::time::timeout(Duration::from_secs(15), run.tracker.wait())
        .await
        .unwrap();
    assert!(run.server.stream_server().is_shut_down());
    assert_eq!(run.server.stream_server().client_count(), 0);
}
