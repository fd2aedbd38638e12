//! Ferry wire format — every message that crosses the peer link.
//!
//! A frame is a u32 little-endian byte length followed by exactly one
//! JSON-serialized [`Message`]. The length prefix makes the framing
//! binary-safe; there is no delimiter scanning and no escaping. Chunk
//! content travels base64-encoded inside the JSON envelope.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::limits::MAX_FRAME_SIZE;

/// Result of the password handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Ok,
    Failed,
}

/// One unit of peer traffic, discriminated by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Message {
    /// Operator-facing text from the remote side. `busy` marks the
    /// rejection sent to a superseding inbound connection.
    Notification {
        text: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        busy: bool,
    },
    Ping,
    Pong,
    /// First frame the dialing side sends after connecting.
    AuthRequest { password: String },
    AuthResponse { status: AuthStatus },
    /// Whole-file transfer for files smaller than one chunk.
    Sync { path: String, content: String },
    /// Remove `path` from the remote shared folder.
    Delete { path: String },
    /// One chunk of a larger file.
    FileChunk {
        path: String,
        content: String,
        chunk_num: u64,
        total_size: u64,
        checksum: String,
    },
    /// Receiver asking the sender to re-send a corrupted chunk.
    RetryChunk {
        path: String,
        chunk_num: u64,
        retry: u32,
    },
}

/// Wire-level failure modes, reported distinctly so the connection
/// loop can drop a bad frame without tearing the stream down.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_SIZE}-byte limit")]
    FrameTooLarge(usize),
    #[error("message decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("content is not valid base64: {0}")]
    Content(#[from] base64::DecodeError),
}

impl Message {
    /// Serialize into a length-prefixed frame ready for the stream.
    pub fn to_frame(&self) -> Result<Vec<u8>, WireError> {
        let body = serde_json::to_vec(self)?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge(body.len()));
        }
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode one frame body (the bytes after the length prefix).
    pub fn from_slice(body: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Transport-encode raw chunk bytes for the JSON envelope.
pub fn encode_content(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode transport-encoded chunk content back to raw bytes.
pub fn decode_content(content: &str) -> Result<Vec<u8>, WireError> {
    Ok(BASE64.decode(content)?)
}
