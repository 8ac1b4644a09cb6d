// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Realtime wire protocol.
//!
//! Each WebSocket binary frame carries a 4-byte big-endian length prefix
//! followed by a JSON `HubEnvelope`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::freshness::unix_now;
use crate::pending::MessageKind;
use crate::router::Delivery;

pub const PROTOCOL_VERSION: u8 = 1;
pub const FRAME_HEADER_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short")]
    TooShort,
    #[error("length prefix {declared} does not match body of {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubEnvelope {
    pub version: u8,
    pub message_id: String,
    pub timestamp: i64,
    pub payload: HubPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubPayload {
    /// Sent once after a successful handshake.
    HandshakeAck(HandshakeAck),
    /// A live or replayed message for the connected account.
    Delivery(DeliveryFrame),
    /// Client confirms receipt of a delivery.
    Acknowledgment(Acknowledgment),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeAck {
    pub protocol_version: u8,
    pub server_version: String,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryFrame {
    pub kind: MessageKind,
    /// Id to acknowledge. Matches the pending row for replayed messages.
    pub message_id: String,
    pub payload: Vec<u8>,
    pub payload_signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub message_id: String,
}

fn envelope(payload: HubPayload) -> HubEnvelope {
    HubEnvelope {
        version: PROTOCOL_VERSION,
        message_id: uuid::Uuid::new_v4().to_string(),
        timestamp: unix_now(),
        payload,
    }
}

/// Creates the handshake acknowledgment envelope.
pub fn create_handshake_ack(acknowledge_on_replay: bool) -> HubEnvelope {
    let mut features = vec!["delivery".to_string(), "client_ack".to_string()];
    if acknowledge_on_replay {
        features.push("replay_ack".to_string());
    }
    envelope(HubPayload::HandshakeAck(HandshakeAck {
        protocol_version: PROTOCOL_VERSION,
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        features,
    }))
}

/// Creates a delivery envelope.
pub fn create_delivery(delivery: &Delivery) -> HubEnvelope {
    envelope(HubPayload::Delivery(DeliveryFrame {
        kind: delivery.kind,
        message_id: delivery.message_id.clone(),
        payload: delivery.payload.clone(),
        payload_signature: delivery.payload_signature.clone(),
    }))
}

/// Creates an acknowledgment envelope (client side).
pub fn create_ack(message_id: &str) -> HubEnvelope {
    envelope(HubPayload::Acknowledgment(Acknowledgment {
        message_id: message_id.to_string(),
    }))
}

/// Decodes a message from binary data (with length prefix).
pub fn decode_message(data: &[u8]) -> Result<HubEnvelope, FrameError> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(FrameError::TooShort);
    }
    let mut header = [0u8; FRAME_HEADER_SIZE];
    header.copy_from_slice(&data[..FRAME_HEADER_SIZE]);
    let declared = u32::from_be_bytes(header) as usize;
    let json = &data[FRAME_HEADER_SIZE..];
    if declared != json.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: json.len(),
        });
    }
    Ok(serde_json::from_slice(json)?)
}

/// Encodes a message to binary data (with length prefix).
pub fn encode_message(envelope: &HubEnvelope) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(envelope)?;
    let len = json.len() as u32;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + json.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&json);
    Ok(frame)
}
