//! # Template Channel Wire Format
//!
//! Frames exchanged between the primary and a relay over one TCP
//! connection. Each frame is a big-endian `u32` length followed by a
//! `bincode` body of at most `MAX_FRAME_LEN` bytes.
//!
//! ## Session
//!
//! ```text
//! relay                         primary
//!   | Hello ------------------->  |
//!   | <-------------- Challenge   |
//!   | AuthResponse ------------>  |
//!   | <------ Welcome | AuthRejected
//!   | <--------------- Template   |   (latest, then every new one)
//!   | TemplateAck ------------->  |
//!   | Heartbeat --------------->  |
//!   | <------------ HeartbeatAck  |
//!   | SubmitBlock ------------->  |
//!   | <------------ SubmitResult  |
//! ```

use crate::entities::{BlockCandidate, BlockTemplate, Region, RelayId};
use crate::errors::WireError;
use crate::node::{SubmitAccepted, SubmitRejected};
use crate::security::CHALLENGE_LEN;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Template channel protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Relay → primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayFrame {
    Hello {
        protocol_version: u16,
        relay_id: RelayId,
        region: Region,
    },
    AuthResponse {
        mac: Vec<u8>,
    },
    Heartbeat {
        nonce: u64,
    },
    TemplateAck {
        sequence: u64,
    },
    SubmitBlock {
        request_id: Uuid,
        candidate: BlockCandidate,
    },
}

/// Primary → relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimaryFrame {
    Challenge {
        challenge: [u8; CHALLENGE_LEN],
    },
    Welcome {
        heartbeat_interval_ms: u64,
    },
    AuthRejected {
        reason: String,
    },
    Template(BlockTemplate),
    HeartbeatAck {
        nonce: u64,
    },
    SubmitResult {
        request_id: Uuid,
        result: Result<SubmitAccepted, SubmitRejected>,
    },
}

impl RelayFrame {
    /// Frame name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayFrame::Hello { .. } => "hello",
            RelayFrame::AuthResponse { .. } => "auth_response",
            RelayFrame::Heartbeat { .. } => "heartbeat",
            RelayFrame::TemplateAck { .. } => "template_ack",
            RelayFrame::SubmitBlock { .. } => "submit_block",
        }
    }
}

impl PrimaryFrame {
    /// Frame name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PrimaryFrame::Challenge { .. } => "challenge",
            PrimaryFrame::Welcome { .. } => "welcome",
            PrimaryFrame::AuthRejected { .. } => "auth_rejected",
            PrimaryFrame::Template(_) => "template",
            PrimaryFrame::HeartbeatAck { .. } => "heartbeat_ack",
            PrimaryFrame::SubmitResult { .. } => "submit_result",
        }
    }
}

/// Read one frame.
///
/// A clean EOF before the length prefix yields `WireError::Closed`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, WireError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(WireError::Closed),
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    bincode::deserialize(&body).map_err(|e| WireError::Malformed(e.to_string()))
}

/// Write one frame and flush.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(frame).map_err(|e| WireError::Malformed(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }

    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
