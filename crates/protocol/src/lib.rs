//! Wire envelope shared by the HTTPS command endpoint and the WebSocket stream.
//!
//! Every frame is a JSON object:
//!
//! ```json
//! {"type": 1, "route": "wallets", "id": 7, "payload": {"args": []}}
//! ```
//!
//! `type` is 1 for requests, 2 for responses and 3 for notifications. A
//! response carries a [`ResponsePayload`] with exactly one of `result` or
//! `error` set.

use {
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::Value,
};

// ── Constants ────────────────────────────────────────────────────────────────

/// RPC version. Bump major for breaking changes, minor for backwards
/// compatible features, patch for fixes.
pub const RPC_SEMVER_MAJOR: u32 = 0;
pub const RPC_SEMVER_MINOR: u32 = 1;
pub const RPC_SEMVER_PATCH: u32 = 0;

/// Route used for notifications pushed over the stream transport.
pub const NOTIFY_ROUTE: &str = "notify";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl RpcVersion {
    pub const fn current() -> Self {
        Self {
            major: RPC_SEMVER_MAJOR,
            minor: RPC_SEMVER_MINOR,
            patch: RPC_SEMVER_PATCH,
        }
    }
}

impl std::fmt::Display for RpcVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownType(u8),
    #[error("payload encode: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("payload decode: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Numeric error codes carried inside response payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum ErrorCode {
    Unspecified,
    ParseError,
    UnknownRoute,
    Internal,
    Arguments,
    Init,
    Login,
    Logout,
    CreateWallet,
    OpenWallet,
    WalletExists,
    CloseWallet,
    GetFee,
    Register,
    Trade,
    Cancel,
    Withdraw,
    OrderBook,
    Balance,
    ExportSeed,
    WalletState,
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Unspecified => 0,
            ErrorCode::ParseError => 1,
            ErrorCode::UnknownRoute => 2,
            ErrorCode::Internal => 3,
            ErrorCode::Arguments => 4,
            ErrorCode::Init => 5,
            ErrorCode::Login => 6,
            ErrorCode::Logout => 7,
            ErrorCode::CreateWallet => 8,
            ErrorCode::OpenWallet => 9,
            ErrorCode::WalletExists => 10,
            ErrorCode::CloseWallet => 11,
            ErrorCode::GetFee => 12,
            ErrorCode::Register => 13,
            ErrorCode::Trade => 14,
            ErrorCode::Cancel => 15,
            ErrorCode::Withdraw => 16,
            ErrorCode::OrderBook => 17,
            ErrorCode::Balance => 18,
            ErrorCode::ExportSeed => 19,
            ErrorCode::WalletState => 20,
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            1 => Self::ParseError,
            2 => Self::UnknownRoute,
            3 => Self::Internal,
            4 => Self::Arguments,
            5 => Self::Init,
            6 => Self::Login,
            7 => Self::Logout,
            8 => Self::CreateWallet,
            9 => Self::OpenWallet,
            10 => Self::WalletExists,
            11 => Self::CloseWallet,
            12 => Self::GetFee,
            13 => Self::Register,
            14 => Self::Trade,
            15 => Self::Cancel,
            16 => Self::Withdraw,
            17 => Self::OrderBook,
            18 => Self::Balance,
            19 => Self::ExportSeed,
            20 => Self::WalletState,
            _ => Self::Unspecified,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", i32::from(*self))
    }
}

/// Structured error returned to the caller inside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error code {}: {}", self.code, self.message)
    }
}

// ── Response payload ─────────────────────────────────────────────────────────

/// Outcome of a route handler. Construct through [`ResponsePayload::ok`] or
/// [`ResponsePayload::err`] so that exactly one side is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// A `result` key that is present stays `Some`, even when it holds `null`.
fn present_value<'de, D: serde::Deserializer<'de>>(de: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(de).map(Some)
}

impl ResponsePayload {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(RpcError::new(code, message)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageType {
    Request,
    Response,
    Notification,
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Request => 1,
            MessageType::Response => 2,
            MessageType::Notification => 3,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            3 => Ok(Self::Notification),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub route: String,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    /// Build a request envelope, encoding `params` as the payload.
    pub fn request<T: Serialize>(
        id: u64,
        route: impl Into<String>,
        params: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type: MessageType::Request,
            route: route.into(),
            id,
            payload: serde_json::to_value(params).map_err(ProtocolError::Encode)?,
        })
    }

    /// Build a response envelope for the request with id `id`.
    pub fn response(id: u64, payload: &ResponsePayload) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type: MessageType::Response,
            route: String::new(),
            id,
            payload: serde_json::to_value(payload).map_err(ProtocolError::Encode)?,
        })
    }

    pub fn notification<T: Serialize>(
        route: impl Into<String>,
        body: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type: MessageType::Notification,
            route: route.into(),
            id: 0,
            payload: serde_json::to_value(body).map_err(ProtocolError::Encode)?,
        })
    }

    pub fn is_request(&self) -> bool {
        self.msg_type == MessageType::Request
    }

    /// Decode the payload into `T`. A missing or `null` payload decodes as
    /// `T::default()` rather than failing.
    pub fn decode_payload<T: DeserializeOwned + Default>(&self) -> Result<T, ProtocolError> {
        if self.payload.is_null() {
            return Ok(T::default());
        }
        T::deserialize(&self.payload).map_err(ProtocolError::Decode)
    }

    /// Decode a response payload.
    pub fn response_payload(&self) -> Result<ResponsePayload, ProtocolError> {
        ResponsePayload::deserialize(&self.payload).map_err(ProtocolError::Decode)
    }
}
