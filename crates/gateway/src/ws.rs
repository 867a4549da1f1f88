//! Stream transport: authenticated WebSocket clients that send request
//! envelopes and receive responses plus pushed engine notifications.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    axum::{
        extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade, close_code},
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    futures::{SinkExt, StreamExt},
    tokio::{sync::broadcast::error::RecvError, time::Instant},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{Instrument, Span, debug, info, warn},
};

use rpcgate_protocol::{ErrorCode, Message, NOTIFY_ROUTE, ResponsePayload};

use crate::{core::ClientCore, methods::RouteTable};

/// Interval between server pings on an idle connection.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long [`StreamServer::shutdown`] waits for connections to wind down.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct StreamServer {
    routes: Arc<RouteTable>,
    core: Arc<dyn ClientCore>,
    span: Span,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    clients: AtomicUsize,
}

/// Keeps the open-connection count honest even if a connection task unwinds.
struct ClientSlot<'a>(&'a AtomicUsize);

impl<'a> ClientSlot<'a> {
    fn take(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for ClientSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StreamServer {
    pub fn new(routes: Arc<RouteTable>, core: Arc<dyn ClientCore>, span: Span) -> Self {
        Self {
            routes,
            core,
            span,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            clients: AtomicUsize::new(0),
        }
    }

    /// Number of currently open connections.
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Complete an upgrade for an already authenticated caller.
    pub fn handle_upgrade(self: &Arc<Self>, ws: WebSocketUpgrade, peer: String) -> Response {
        if self.shutdown.is_cancelled() {
            return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
        }
        let this = Arc::clone(self);
        let tracker = self.tracker.clone();
        let span = self.span.clone();
        ws.on_upgrade(move |socket| tracker.track_future(this.serve_client(socket, peer).instrument(span)))
    }

    /// Close every connection and wait a bounded time for them to finish.
    /// New upgrades are refused from here on.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            self.span.in_scope(|| {
                warn!(
                    clients = self.client_count(),
                    "stream clients still open after shutdown timeout"
                )
            });
        }
    }

    async fn serve_client(self: Arc<Self>, socket: WebSocket, peer: String) {
        let _slot = ClientSlot::take(&self.clients);
        info!(peer = %peer, clients = self.client_count(), "stream client connected");

        let (mut sink, mut stream) = socket.split();
        let mut notes = self.core.notifications();
        let mut notes_open = true;
        let mut ping = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    let _ = sink.send(going_away()).await;
                    break;
                }
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text.as_str().to_owned(),
                        Some(Ok(WsMessage::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            debug!(peer = %peer, error = %e, "stream read error");
                            break;
                        },
                    };
                    // A slow core call must not hold the connection open past shutdown.
                    let reply = tokio::select! {
                        reply = self.handle_frame(&text) => reply,
                        () = self.shutdown.cancelled() => {
                            debug!(peer = %peer, "dropping in-flight request on shutdown");
                            let _ = sink.send(going_away()).await;
                            break;
                        }
                    };
                    if let Some(reply) = reply
                        && sink.send(reply).await.is_err()
                    {
                        break;
                    }
                }
                note = notes.recv(), if notes_open => {
                    match note {
                        Ok(note) => {
                            let Some(frame) = encode(Message::notification(NOTIFY_ROUTE, &note)) else {
                                continue;
                            };
                            if sink.send(frame).await.is_err() {
                                break;
                            }
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(peer = %peer, skipped, "stream client missed notifications");
                        },
                        Err(RecvError::Closed) => notes_open = false,
                    }
                }
                _ = ping.tick() => {
                    if sink.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }

        info!(peer = %peer, "stream client disconnected");
    }

    /// Produce the reply to one inbound frame, if any.
    async fn handle_frame(&self, text: &str) -> Option<WsMessage> {
        let msg: Message = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "malformed stream message");
                let payload =
                    ResponsePayload::err(ErrorCode::ParseError, "unable to parse message");
                return encode(Message::response(0, &payload));
            },
        };
        if !msg.is_request() {
            debug!(route = %msg.route, "ignoring non-request stream message");
            return None;
        }
        let payload = self.routes.dispatch(&msg, Arc::clone(&self.core)).await;
        encode(Message::response(msg.id, &payload))
    }
}

fn going_away() -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: "server shutting down".into(),
    }))
}

fn encode(msg: Result<Message, rpcgate_protocol::ProtocolError>) -> Option<WsMessage> {
    let text = msg
        .map_err(|e| e.to_string())
        .and_then(|m| serde_json::to_string(&m).map_err(|e| e.to_string()));
    match text {
        Ok(text) => Some(WsMessage::Text(text.into())),
        Err(e) => {
            warn!(error = %e, "cannot encode stream message");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::testing::MockCore, serde_json::json};

    fn server() -> StreamServer {
        StreamServer::new(
            Arc::new(RouteTable::new()),
            Arc::new(MockCore::new("pw")),
            Span::none(),
        )
    }

    fn reply(frame: Option<WsMessage>) -> Message {
        match frame {
            Some(WsMessage::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_gets_response_with_same_id() {
        let srv = server();
        let req = serde_json::to_string(&Message::request(7, "version", &json!(null)).unwrap())
            .unwrap();
        let resp = reply(srv.handle_frame(&req).await);
        assert!(!resp.is_request());
        assert_eq!(resp.id, 7);
        let payload = resp.response_payload().unwrap();
        assert_eq!(payload.result.unwrap()["minor"], 1);
    }

    #[tokio::test]
    async fn garbage_gets_parse_error_with_id_zero() {
        let srv = server();
        let resp = reply(srv.handle_frame("{not json").await);
        assert_eq!(resp.id, 0);
        let err = resp.response_payload().unwrap().error.unwrap();
        assert_eq!(err.code, ErrorCode::ParseError);
    }

    #[tokio::test]
    async fn responses_from_clients_are_ignored() {
        let srv = server();
        let msg = Message::response(3, &ResponsePayload::ok(json!(1))).unwrap();
        let text = serde_json::to_string(&msg).unwrap();
        assert!(srv.handle_frame(&text).await.is_none());
    }

    #[tokio::test]
    async fn shutdown_with_no_clients_returns_at_once() {
        let srv = server();
        assert_eq!(srv.client_count(), 0);
        srv.shutdown().await;
        assert!(srv.is_shut_down());
        // Idempotent.
        srv.shutdown().await;
    }

    #[test]
    fn slot_tracks_count() {
        let count = AtomicUsize::new(0);
        {
            let _a = ClientSlot::take(&count);
            let _b = ClientSlot::take(&count);
            assert_eq!(count.load(Ordering::SeqCst), 2);
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
