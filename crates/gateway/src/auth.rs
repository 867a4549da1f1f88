use std::net::SocketAddr;

use {
    axum::{
        extract::{ConnectInfo, Request, State},
        http::{HeaderMap, HeaderValue, StatusCode, header},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    base64::{Engine, engine::general_purpose::STANDARD},
    secrecy::{ExposeSecret, SecretString},
    sha2::{Digest, Sha256},
    subtle::ConstantTimeEq,
    tracing::{debug, warn},
};

use crate::{error::GatewayError, server::AppState};

/// Challenge sent with every 401.
pub const AUTH_CHALLENGE: &str = r#"Basic realm="rpcgate RPC""#;

// ── Credential gate ──────────────────────────────────────────────────────────

/// Accepts exactly one `Authorization` header value: the Basic encoding of
/// the configured user and secret.
///
/// Only the SHA-256 digest of the expected header is retained. Inbound
/// headers are hashed too, so the comparison always runs over 32 bytes
/// regardless of what the caller sent.
#[derive(Clone)]
pub struct AuthGate {
    digest: [u8; 32],
}

impl AuthGate {
    pub fn new(user: &str, pass: &SecretString) -> Result<Self, GatewayError> {
        if pass.expose_secret().is_empty() {
            return Err(GatewayError::MissingPassword);
        }
        let login = format!("{user}:{}", pass.expose_secret());
        let expected = format!("Basic {}", STANDARD.encode(login));
        Ok(Self {
            digest: Sha256::digest(expected.as_bytes()).into(),
        })
    }

    /// Constant-time check of a raw `Authorization` header value.
    pub fn verify(&self, header_value: &[u8]) -> bool {
        let given: [u8; 32] = Sha256::digest(header_value).into();
        self.digest[..].ct_eq(&given[..]).into()
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}

// ── Caller address ───────────────────────────────────────────────────────────

/// Address to report for a caller: `X-Real-IP`, then the first
/// `X-Forwarded-For` hop, then the socket peer. Used for logging only.
pub fn caller_addr(headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    forwarded("x-real-ip")
        .or_else(|| forwarded("x-forwarded-for"))
        .unwrap_or_else(|| peer.to_string())
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Rejects every request that does not carry the expected credentials, both
/// on the command endpoint and before a WebSocket upgrade.
pub(crate) async fn require_auth(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let caller = caller_addr(request.headers(), peer);
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .is_some_and(|value| state.auth.verify(value.as_bytes()));

    if !authorized {
        state
            .span
            .in_scope(|| warn!(ip = %caller, "authentication failure"));
        return unauthorized();
    }
    state
        .span
        .in_scope(|| debug!(ip = %caller, "authenticated user"));
    next.run(request).await
}

fn unauthorized() -> Response {
    let mut resp = (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    resp.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static(AUTH_CHALLENGE),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    fn gate(user: &str, pass: &str) -> AuthGate {
        AuthGate::new(user, &SecretString::new(pass.to_string())).unwrap()
    }

    #[test]
    fn empty_secret_is_rejected() {
        let err = AuthGate::new("u", &SecretString::new(String::new())).unwrap_err();
        assert!(matches!(err, GatewayError::MissingPassword));
    }

    #[test]
    fn accepts_exact_credentials() {
        assert!(gate("u", "p").verify(basic("u", "p").as_bytes()));
    }

    #[test]
    fn empty_user_is_allowed() {
        assert!(gate("", "p").verify(basic("", "p").as_bytes()));
    }

    #[test]
    fn rejects_any_deviation() {
        let g = gate("u", "p");
        for bad in [
            basic("u", "q"),
            basic("v", "p"),
            basic("u", "p") + " ",
            basic("u", "p").to_lowercase(),
            format!("Bearer {}", STANDARD.encode("u:p")),
            String::new(),
        ] {
            assert!(!g.verify(bad.as_bytes()), "accepted {bad:?}");
        }
    }

    #[test]
    fn debug_does_not_leak_digest() {
        let shown = format!("{:?}", gate("u", "p"));
        assert_eq!(shown, "AuthGate { .. }");
    }

    #[test]
    fn caller_prefers_proxy_headers() {
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(caller_addr(&headers, peer), "10.0.0.1:5000");

        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.2"));
        assert_eq!(caller_addr(&headers, peer), "1.2.3.4");

        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));
        assert_eq!(caller_addr(&headers, peer), "5.6.7.8");
    }
}
