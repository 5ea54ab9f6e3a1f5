//! Wire frames and the length-delimited JSON codec.
//!
//! Each frame is a JSON object tagged by `type`, prefixed with a 3-byte
//! big-endian length. Payloads are arbitrary JSON values (a notification, a
//! count, a status string).

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::errors::{ErrorCode, TetherError};
use crate::ids::StreamId;
use crate::security::CredentialMetadata;

/// Largest frame a 3-byte length prefix can describe.
pub const MAX_FRAME_LENGTH: usize = 0x00FF_FFFF;

/// The four interaction models a stream can follow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interaction {
    /// One request, one response.
    RequestResponse,
    /// One request, acknowledged without a payload.
    FireAndForget,
    /// One request, an unbounded sequence of responses.
    RequestStream,
    /// A sequence of requests and a sequence of responses.
    Channel,
}

impl Interaction {
    /// Build the frame that opens a stream of this kind.
    pub fn request_frame(self, stream_id: StreamId, route: &str, payload: Value) -> Frame {
        let route = route.to_owned();
        match self {
            Self::RequestResponse => Frame::RequestResponse {
                stream_id,
                route,
                payload,
            },
            Self::FireAndForget => Frame::RequestFnf {
                stream_id,
                route,
                payload,
            },
            Self::RequestStream => Frame::RequestStream {
                stream_id,
                route,
                payload,
            },
            Self::Channel => Frame::RequestChannel {
                stream_id,
                route,
                payload,
            },
        }
    }
}

impl std::fmt::Display for Interaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RequestResponse => "request-response",
            Self::FireAndForget => "fire-and-forget",
            Self::RequestStream => "request-stream",
            Self::Channel => "channel",
        };
        f.write_str(name)
    }
}

/// Connection setup sent by the client as its first frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    /// Setup route the client asks to be accepted on.
    pub route: String,
    /// Opaque client identifier.
    pub data: String,
    /// Credential metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CredentialMetadata>,
    /// How often the client will send keepalives.
    pub keepalive_interval_ms: u64,
    /// How long either side waits without traffic before giving up.
    pub max_lifetime_ms: u64,
}

/// A single protocol frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Frame {
    /// Connection setup.
    Setup(SetupPayload),
    /// Setup accepted.
    SetupAck {
        /// Session id assigned by the server (the client id).
        session_id: String,
    },
    /// Open a request-response stream.
    RequestResponse {
        /// New stream.
        stream_id: StreamId,
        /// Route to service it.
        route: String,
        /// Request payload.
        payload: Value,
    },
    /// Open a fire-and-forget stream.
    RequestFnf {
        /// New stream.
        stream_id: StreamId,
        /// Route to service it.
        route: String,
        /// Request payload.
        payload: Value,
    },
    /// Open a request-stream stream.
    RequestStream {
        /// New stream.
        stream_id: StreamId,
        /// Route to service it.
        route: String,
        /// Request payload.
        payload: Value,
    },
    /// Open a channel; `payload` is the first inbound element.
    RequestChannel {
        /// New stream.
        stream_id: StreamId,
        /// Route to service it.
        route: String,
        /// First element of the requester's sequence.
        payload: Value,
    },
    /// One element on a live stream.
    Next {
        /// Target stream.
        stream_id: StreamId,
        /// Element.
        payload: Value,
        /// Whether this element also completes the stream.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        complete: bool,
    },
    /// The sender's side of the stream is done.
    Complete {
        /// Target stream.
        stream_id: StreamId,
    },
    /// Terminal error on a stream, or on the connection when `stream_id` is 0.
    Error {
        /// Target stream.
        stream_id: StreamId,
        /// Error classification.
        code: ErrorCode,
        /// Human-readable message.
        message: String,
    },
    /// Requester no longer wants the stream.
    Cancel {
        /// Target stream.
        stream_id: StreamId,
    },
    /// Liveness check.
    Keepalive {
        /// Whether the receiver should answer.
        respond: bool,
    },
}

impl Frame {
    /// Stream the frame belongs to; connection-level frames report stream 0.
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Setup(_) | Self::SetupAck { .. } | Self::Keepalive { .. } => StreamId::CONNECTION,
            Self::RequestResponse { stream_id, .. }
            | Self::RequestFnf { stream_id, .. }
            | Self::RequestStream { stream_id, .. }
            | Self::RequestChannel { stream_id, .. }
            | Self::Next { stream_id, .. }
            | Self::Complete { stream_id }
            | Self::Error { stream_id, .. }
            | Self::Cancel { stream_id } => *stream_id,
        }
    }

    /// Frame type name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "SETUP",
            Self::SetupAck { .. } => "SETUP_ACK",
            Self::RequestResponse { .. } => "REQUEST_RESPONSE",
            Self::RequestFnf { .. } => "REQUEST_FNF",
            Self::RequestStream { .. } => "REQUEST_STREAM",
            Self::RequestChannel { .. } => "REQUEST_CHANNEL",
            Self::Next { .. } => "NEXT",
            Self::Complete { .. } => "COMPLETE",
            Self::Error { .. } => "ERROR",
            Self::Cancel { .. } => "CANCEL",
            Self::Keepalive { .. } => "KEEPALIVE",
        }
    }

    /// Build an `ERROR` frame from a typed error.
    pub fn error(stream_id: StreamId, err: &TetherError) -> Self {
        Self::Error {
            stream_id,
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// Split a request frame into its parts. `None` for every other frame.
    pub fn into_request(self) -> Option<(Interaction, StreamId, String, Value)> {
        match self {
            Self::RequestResponse {
                stream_id,
                route,
                payload,
            } => Some((Interaction::RequestResponse, stream_id, route, payload)),
            Self::RequestFnf {
                stream_id,
                route,
                payload,
            } => Some((Interaction::FireAndForget, stream_id, route, payload)),
            Self::RequestStream {
                stream_id,
                route,
                payload,
            } => Some((Interaction::RequestStream, stream_id, route, payload)),
            Self::RequestChannel {
                stream_id,
                route,
                payload,
            } => Some((Interaction::Channel, stream_id, route, payload)),
            _ => None,
        }
    }
}

/// Errors raised while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The byte stream failed.
    #[error("frame io: {0}")]
    Io(#[from] std::io::Error),
    /// A frame body was not valid JSON for a [`Frame`].
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CodecError> for TetherError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => Self::Transport(e.to_string()),
            CodecError::Json(e) => Self::Protocol(e.to_string()),
        }
    }
}

/// Length-delimited JSON codec for [`Frame`]s.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    /// Codec rejecting frames longer than `max_frame_length` bytes.
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(3)
                .max_frame_length(max_frame_length.min(MAX_FRAME_LENGTH))
                .new_codec(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_LENGTH)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        match self.inner.decode(src)? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = serde_json::to_vec(&frame)?;
        self.inner.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(frame: Frame) -> BytesMut {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn frames_are_tagged_by_type() {
        let frame = Frame::RequestStream {
            stream_id: StreamId::new(5),
            route: "stream".into(),
            payload: json!({"text": "hi"}),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "REQUEST_STREAM");
        assert_eq!(value["streamId"], 5);
        assert_eq!(value["route"], "stream");
    }

    #[test]
    fn setup_frame_is_flattened() {
        let frame = Frame::Setup(SetupPayload {
            route: "shell-client".into(),
            data: "c-1".into(),
            metadata: None,
            keepalive_interval_ms: 20_000,
            max_lifetime_ms: 90_000,
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "SETUP");
        assert_eq!(value["route"], "shell-client");
        assert_eq!(value["keepaliveIntervalMs"], 20_000);
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn next_omits_complete_flag_when_false() {
        let frame = Frame::Next {
            stream_id: StreamId::new(1),
            payload: json!(3),
            complete: false,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value.get("complete").is_none());

        let parsed: Frame =
            serde_json::from_value(json!({"type": "NEXT", "streamId": 1, "payload": 3})).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn length_prefix_is_three_bytes() {
        let buf = encode(Frame::Keepalive { respond: true });
        let body_len = buf.len() - 3;
        let declared = (usize::from(buf[0]) << 16) | (usize::from(buf[1]) << 8) | usize::from(buf[2]);
        assert_eq!(declared, body_len);
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let buf = encode(Frame::Cancel {
            stream_id: StreamId::new(9),
        });
        let mut codec = FrameCodec::default();
        let mut partial = BytesMut::from(&buf[..buf.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let mut full = buf.clone();
        let frame = codec.decode(&mut full).unwrap().unwrap();
        assert_eq!(frame.stream_id(), StreamId::new(9));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let mut inner = LengthDelimitedCodec::builder()
            .length_field_length(3)
            .new_codec();
        let mut buf = BytesMut::new();
        inner.encode(Bytes::from_static(b"{not json"), &mut buf).unwrap();

        let err = FrameCodec::default().decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
        assert!(matches!(TetherError::from(err), TetherError::Protocol(_)));
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut big = FrameCodec::new(64);
        let frame = Frame::Next {
            stream_id: StreamId::new(1),
            payload: json!("x".repeat(256)),
            complete: false,
        };
        let mut buf = BytesMut::new();
        assert!(big.encode(frame, &mut buf).is_err());
    }

    #[test]
    fn into_request_splits_open_frames() {
        let frame = Interaction::Channel.request_frame(StreamId::new(3), "channel", json!(1));
        let (kind, id, route, payload) = frame.into_request().unwrap();
        assert_eq!(kind, Interaction::Channel);
        assert_eq!(id, StreamId::new(3));
        assert_eq!(route, "channel");
        assert_eq!(payload, json!(1));

        assert!(Frame::Keepalive { respond: false }.into_request().is_none());
    }

    #[test]
    fn error_frame_from_typed_error() {
        let frame = Frame::error(
            StreamId::new(7),
            &TetherError::Authorization {
                route: "stream".into(),
            },
        );
        match frame {
            Frame::Error { code, message, .. } => {
                assert_eq!(code, ErrorCode::Rejected);
                assert_eq!(message, "Denied");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn connection_frames_use_stream_zero() {
        assert!(Frame::Keepalive { respond: true }.stream_id().is_connection());
        assert!(
            Frame::SetupAck {
                session_id: "s".into()
            }
            .stream_id()
            .is_connection()
        );
    }
}
