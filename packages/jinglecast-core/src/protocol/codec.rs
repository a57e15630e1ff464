//! WebSocket wire encoding between coordinator and endpoints.
//!
//! Control messages are JSON text frames tagged by `type`. PREPARE carries
//! raw PCM and travels as a binary frame instead:
//!
//! ```text
//! 0x01 | request id (u64, big endian) | event id (16 bytes) | PCM ...
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Command, EndpointId, EventId};
use crate::protocol_constants::{PREPARE_FRAME_TAG, PREPARE_HEADER_LEN};

/// Transport-neutral WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary frame too short ({0} bytes)")]
    Truncated(usize),

    #[error("unknown binary frame tag 0x{0:02x}")]
    UnknownTag(u8),
}

/// Text messages sent by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Welcome { endpoint_id: EndpointId },
    #[serde(rename_all = "camelCase")]
    Play { request_id: u64, event_id: EventId },
    #[serde(rename_all = "camelCase")]
    Stop { request_id: u64 },
    HeartbeatAck,
}

/// Text messages sent by endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Ack {
        request_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint_id: Option<EndpointId>,
        #[serde(default = "default_success")]
        success: bool,
    },
    Heartbeat,
}

fn default_success() -> bool {
    true
}

/// What an endpoint can receive, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointInbound {
    Welcome(EndpointId),
    Request { request_id: u64, command: Command },
    HeartbeatAck,
}

/// Encodes a correlated command for the wire.
///
/// # Errors
///
/// Fails only if JSON serialization fails.
pub fn encode_request(request_id: u64, command: &Command) -> Result<WireFrame, CodecError> {
    match command {
        Command::Prepare { event_id, pcm } => {
            let mut frame = BytesMut::with_capacity(PREPARE_HEADER_LEN + pcm.len());
            frame.put_u8(PREPARE_FRAME_TAG);
            frame.put_u64(request_id);
            frame.put_slice(event_id.as_bytes());
            frame.put_slice(pcm);
            Ok(WireFrame::Binary(frame.freeze()))
        }
        Command::Play { event_id } => encode_server_message(&ServerMessage::Play {
            request_id,
            event_id: *event_id,
        }),
        Command::Stop => encode_server_message(&ServerMessage::Stop { request_id }),
    }
}

/// Encodes a coordinator text message.
///
/// # Errors
///
/// Fails only if JSON serialization fails.
pub fn encode_server_message(message: &ServerMessage) -> Result<WireFrame, CodecError> {
    Ok(WireFrame::Text(serde_json::to_string(message)?))
}

/// Decodes a frame received by an endpoint.
///
/// # Errors
///
/// Returns a [`CodecError`] for malformed JSON or binary frames.
pub fn decode_server_frame(frame: WireFrame) -> Result<EndpointInbound, CodecError> {
    match frame {
        WireFrame::Text(text) => Ok(match serde_json::from_str(&text)? {
            ServerMessage::Welcome { endpoint_id } => EndpointInbound::Welcome(endpoint_id),
            ServerMessage::Play {
                request_id,
                event_id,
            } => EndpointInbound::Request {
                request_id,
                command: Command::Play { event_id },
            },
            ServerMessage::Stop { request_id } => EndpointInbound::Request {
                request_id,
                command: Command::Stop,
            },
            ServerMessage::HeartbeatAck => EndpointInbound::HeartbeatAck,
        }),
        WireFrame::Binary(mut data) => {
            if data.len() < PREPARE_HEADER_LEN {
                return Err(CodecError::Truncated(data.len()));
            }
            let tag = data.get_u8();
            if tag != PREPARE_FRAME_TAG {
                return Err(CodecError::UnknownTag(tag));
            }
            let request_id = data.get_u64();
            let mut uuid = [0u8; 16];
            data.copy_to_slice(&mut uuid);
            Ok(EndpointInbound::Request {
                request_id,
                command: Command::Prepare {
                    event_id: EventId::from_bytes(uuid),
                    pcm: data,
                },
            })
        }
    }
}

/// Encodes an endpoint text message.
///
/// # Errors
///
/// Fails only if JSON serialization fails.
pub fn encode_client_message(message: &ClientMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decodes a text message received from an endpoint.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for anything that is not a known message.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_frame_layout() {
        let event_id = EventId::new();
        let command = Command::Prepare {
            event_id,
            pcm: Bytes::from_static(&[9, 8, 7]),
        };

        let WireFrame::Binary(frame) = encode_request(0x0102, &command).unwrap() else {
            panic!("prepare must be binary");
        };
        assert_eq!(frame.len(), PREPARE_HEADER_LEN + 3);
        assert_eq!(frame[0], PREPARE_FRAME_TAG);
        assert_eq!(&frame[1..9], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
        assert_eq!(&frame[9..25], event_id.as_bytes());
        assert_eq!(&frame[25..], &[9, 8, 7]);

        let decoded = decode_server_frame(WireFrame::Binary(frame)).unwrap();
        assert_eq!(
            decoded,
            EndpointInbound::Request {
                request_id: 0x0102,
                command
            }
        );
    }

    #[test]
    fn play_is_camel_case_json() {
        let event_id = EventId::new();
        let WireFrame::Text(text) =
            encode_request(7, &Command::Play { event_id }).unwrap()
        else {
            panic!("play must be text");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "PLAY");
        assert_eq!(value["requestId"], 7);
        assert_eq!(value["eventId"], event_id.to_string());
    }

    #[test]
    fn ack_success_defaults_to_true() {
        let ack = decode_client_message(r#"{"type":"ACK","requestId":3}"#).unwrap();
        assert_eq!(
            ack,
            ClientMessage::Ack {
                request_id: 3,
                endpoint_id: None,
                success: true
            }
        );

        let ack = decode_client_message(
            r#"{"type":"ACK","requestId":4,"endpointId":"ws-1","success":false}"#,
        )
        .unwrap();
        assert!(matches!(ack, ClientMessage::Ack { success: false, .. }));
    }

    #[test]
    fn heartbeat_messages() {
        assert_eq!(
            decode_client_message(r#"{"type":"HEARTBEAT"}"#).unwrap(),
            ClientMessage::Heartbeat
        );
        let frame = encode_server_message(&ServerMessage::HeartbeatAck).unwrap();
        assert_eq!(
            decode_server_frame(frame).unwrap(),
            EndpointInbound::HeartbeatAck
        );
    }

    #[test]
    fn malformed_binary_frames_are_rejected() {
        assert!(matches!(
            decode_server_frame(WireFrame::Binary(Bytes::from_static(&[1, 2, 3]))),
            Err(CodecError::Truncated(3))
        ));

        let mut frame = vec![0x7f];
        frame.extend_from_slice(&[0; PREPARE_HEADER_LEN - 1]);
        assert!(matches!(
            decode_server_frame(WireFrame::Binary(Bytes::from(frame))),
            Err(CodecError::UnknownTag(0x7f))
        ));
    }

    #[test]
    fn unknown_client_message_is_an_error() {
        assert!(decode_client_message(r#"{"type":"DANCE"}"#).is_err());
    }
}
