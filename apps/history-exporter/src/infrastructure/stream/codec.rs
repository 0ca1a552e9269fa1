//! Frame Codec
//!
//! Encoding and decoding of the streaming API's text frames. Every frame is
//! one WebSocket text message made of space-delimited tokens.
//!
//! # Outbound
//!
//! ```text
//! connect <version> <json>
//! sub <id> <json>
//! unsub <id>
//! ```
//!
//! # Inbound
//!
//! ```text
//! <id> <state> <payload...>
//! ```
//!
//! `state` is `A` (data), `C` (continue) or `E` (error). Unknown state codes
//! still decode; the connection manager treats them as a no-op.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;

use crate::domain::subscription::{SubscriptionId, SubscriptionRequest};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame does not follow the wire format.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// JSON encoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// State code of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameState {
    /// `A`: the response body. Terminal.
    Data,
    /// `C`: more frames follow.
    Continue,
    /// `E`: the server rejected the subscription.
    Error,
    /// Any other code, kept verbatim.
    Unknown(String),
}

impl FrameState {
    /// Interpret a state token.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "A" => Self::Data,
            "C" => Self::Continue,
            "E" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Wire code of this state.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Data => "A",
            Self::Continue => "C",
            Self::Error => "E",
            Self::Unknown(code) => code,
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Continue => "continue",
            Self::Error => "error",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// A decoded inbound frame. Only lives until it has been dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Subscription the frame belongs to.
    pub id: SubscriptionId,
    /// State code.
    pub state: FrameState,
    /// Remaining tokens joined with single spaces.
    pub payload: Bytes,
}

// =============================================================================
// Outbound Frames
// =============================================================================

/// Handshake options sent in the `connect` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    /// Response locale.
    pub locale: String,
    /// Platform identifier.
    pub platform_id: String,
    /// Platform version string.
    pub platform_version: String,
    /// Client identifier.
    pub client_id: String,
    /// Client version string.
    pub client_version: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            locale: "en".to_string(),
            platform_id: "webtrading".to_string(),
            platform_version: "chrome - 120.0.0".to_string(),
            client_id: "app.traderepublic.com".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ConnectOptions {
    /// Default options with the given locale.
    #[must_use]
    pub fn with_locale(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            ..Self::default()
        }
    }
}

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `connect <version> <json>`.
    Connect {
        /// Protocol version.
        version: u32,
        /// JSON-encoded [`ConnectOptions`].
        body: String,
    },
    /// `sub <id> <json>`.
    Subscribe {
        /// Subscription ID.
        id: SubscriptionId,
        /// JSON-encoded [`SubscriptionRequest`].
        body: String,
    },
    /// `unsub <id>`.
    Unsubscribe {
        /// Subscription ID.
        id: SubscriptionId,
    },
}

impl ClientFrame {
    /// Parse an outbound frame.
    ///
    /// The JSON body is kept byte-for-byte, so parsing is the left inverse
    /// of [`ClientFrame::to_string`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedFrame`] if the command is unknown or a
    /// required token is missing or not a number.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let mut parts = text.splitn(3, ' ');
        let command = parts.next().unwrap_or_default();
        let arg = parts
            .next()
            .ok_or_else(|| CodecError::MalformedFrame(format!("missing argument: {text}")))?;

        match command {
            "connect" => Ok(Self::Connect {
                version: arg.parse().map_err(|_| {
                    CodecError::MalformedFrame(format!("invalid protocol version: {arg}"))
                })?,
                body: parts.next().unwrap_or_default().to_string(),
            }),
            "sub" => Ok(Self::Subscribe {
                id: parse_id(arg)?,
                body: parts
                    .next()
                    .ok_or_else(|| {
                        CodecError::MalformedFrame(format!("missing subscribe body: {text}"))
                    })?
                    .to_string(),
            }),
            "unsub" => Ok(Self::Unsubscribe { id: parse_id(arg)? }),
            other => Err(CodecError::MalformedFrame(format!(
                "unknown command: {other}"
            ))),
        }
    }
}

impl fmt::Display for ClientFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { version, body } => write!(f, "connect {version} {body}"),
            Self::Subscribe { id, body } => write!(f, "sub {id} {body}"),
            Self::Unsubscribe { id } => write!(f, "unsub {id}"),
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Stateless codec for the streaming text protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Build the `connect` handshake frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the options cannot be serialized.
    pub fn encode_connect(
        &self,
        version: u32,
        options: &ConnectOptions,
    ) -> Result<String, CodecError> {
        let body = serde_json::to_string(options)?;
        Ok(ClientFrame::Connect { version, body }.to_string())
    }

    /// Build a `sub` frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be serialized.
    pub fn encode_subscribe(
        &self,
        id: SubscriptionId,
        request: &SubscriptionRequest,
    ) -> Result<String, CodecError> {
        let body = request.to_json()?;
        Ok(ClientFrame::Subscribe { id, body }.to_string())
    }

    /// Build an `unsub` frame.
    #[must_use]
    pub fn encode_unsubscribe(&self, id: SubscriptionId) -> String {
        ClientFrame::Unsubscribe { id }.to_string()
    }

    /// Decode an inbound frame.
    ///
    /// The first two whitespace-delimited tokens are the ID and the state
    /// code; the remaining tokens are joined with single spaces to form the
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedFrame`] if fewer than two tokens are
    /// present or the ID is not a non-negative integer.
    pub fn decode(&self, text: &str) -> Result<Frame, CodecError> {
        let mut tokens = text.split_whitespace();

        let (Some(id), Some(state)) = (tokens.next(), tokens.next()) else {
            return Err(CodecError::MalformedFrame(format!(
                "expected `<id> <state> <payload>`, got: {}",
                preview(text)
            )));
        };

        let payload = tokens.collect::<Vec<_>>().join(" ");

        Ok(Frame {
            id: parse_id(id)?,
            state: FrameState::from_code(state),
            payload: Bytes::from(payload),
        })
    }
}

fn parse_id(token: &str) -> Result<SubscriptionId, CodecError> {
    token
        .parse()
        .map_err(|_| CodecError::MalformedFrame(format!("invalid subscription id: {token}")))
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(idx, _)| idx);
    &text[..end]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    #[test]
    fn decode_data_frame() {
        let frame = FrameCodec::new().decode("3 A hello").unwrap();
        assert_eq!(frame.id, 3);
        assert_eq!(frame.state, FrameState::Data);
        assert_eq!(frame.payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn decode_rejoins_payload_with_single_spaces() {
        let frame = FrameCodec::new()
            .decode("12 A {\"items\":  [],   \"cursors\": {}}")
            .unwrap();
        assert_eq!(
            frame.payload,
            Bytes::from_static(b"{\"items\": [], \"cursors\": {}}")
        );
    }

    #[test]
    fn decode_frame_without_payload() {
        let frame = FrameCodec::new().decode("7 C").unwrap();
        assert_eq!(frame.state, FrameState::Continue);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn decode_keeps_unknown_state() {
        let frame = FrameCodec::new().decode("5 D {}").unwrap();
        assert_eq!(frame.state, FrameState::Unknown("D".to_string()));
        assert_eq!(frame.state.code(), "D");
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace only")]
    #[test_case("42" ; "missing state")]
    #[test_case("abc A {}" ; "non numeric id")]
    #[test_case("-1 A {}" ; "negative id")]
    fn decode_rejects_malformed(text: &str) {
        let err = FrameCodec::new().decode(text).unwrap_err();
        assert!(matches!(err, CodecError::MalformedFrame(_)));
    }

    #[test]
    fn encode_connect_frame() {
        let options = ConnectOptions::with_locale("de");
        let text = FrameCodec::new().encode_connect(31, &options).unwrap();
        assert!(text.starts_with("connect 31 {"));
        assert!(text.contains(r#""locale":"de""#));
        assert!(text.contains(r#""platformId":"webtrading""#));
    }

    #[test]
    fn encode_subscribe_frame() {
        let request = SubscriptionRequest::transactions("tok", None);
        let text = FrameCodec::new().encode_subscribe(1, &request).unwrap();
        assert_eq!(text, r#"sub 1 {"type":"timelineTransactions","token":"tok"}"#);
    }

    #[test]
    fn encode_unsubscribe_frame() {
        assert_eq!(FrameCodec::new().encode_unsubscribe(9), "unsub 9");
    }

    #[test]
    fn parse_rejects_unknown_command() {
        let err = ClientFrame::parse("ping 1").unwrap_err();
        assert!(matches!(err, CodecError::MalformedFrame(_)));
    }

    #[test]
    fn parse_unsubscribe() {
        assert_eq!(
            ClientFrame::parse("unsub 4").unwrap(),
            ClientFrame::Unsubscribe { id: 4 }
        );
    }

    proptest! {
        #[test]
        fn parse_is_left_inverse_of_subscribe_encode(
            id in any::<u64>(),
            token in "[ -~]{0,40}",
            after in proptest::option::of("[ -~]{1,20}"),
        ) {
            let request = SubscriptionRequest::transactions(token, after);
            let text = FrameCodec::new().encode_subscribe(id, &request).unwrap();

            let parsed = ClientFrame::parse(&text).unwrap();
            prop_assert_eq!(parsed, ClientFrame::Subscribe { id, body: request.to_json().unwrap() });
        }

        #[test]
        fn parse_is_left_inverse_of_unsubscribe_encode(id in any::<u64>()) {
            let text = FrameCodec::new().encode_unsubscribe(id);
            prop_assert_eq!(ClientFrame::parse(&text).unwrap(), ClientFrame::Unsubscribe { id });
        }
    }
}
