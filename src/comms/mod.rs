//! Message plumbing between ring members.
//!
//! Control traffic (the token and the done broadcast) travels as small byte
//! frames: a tag byte, then the raw token for a token frame. `network` holds
//! an in-process multi-rank network built on channels, so several processes'
//! worth of workers can share one OS process.
use bytemuck::{bytes_of, pod_read_unaligned};

use crate::{
    consensus::{ActivityLedger, AsyncConsensus, RingTransport, Token},
    RingError,
};

pub mod network;

pub use network::{Endpoint, Envelope, Inbox, Network, Payload};

pub const TAG_TOKEN: u8 = 1;
pub const TAG_FORCE_DONE: u8 = 2;

const TOKEN_FRAME_LEN: usize = 1 + std::mem::size_of::<Token>();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    ReceiveToken(Token),
    ForceDone,
}

impl ControlMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ControlMessage::ReceiveToken(token) => {
                let mut frame = Vec::with_capacity(TOKEN_FRAME_LEN);
                frame.push(TAG_TOKEN);
                frame.extend_from_slice(bytes_of(token));
                frame
            }
            ControlMessage::ForceDone => vec![TAG_FORCE_DONE],
        }
    }

    pub fn decode(frame: &[u8]) -> Result<Self, RingError> {
        let Some((&tag, body)) = frame.split_first() else {
            return Err(RingError::MalformedFrame {
                reason: "empty frame".to_string(),
            });
        };
        match tag {
            TAG_TOKEN if frame.len() == TOKEN_FRAME_LEN => {
                Ok(ControlMessage::ReceiveToken(pod_read_unaligned(body)))
            }
            TAG_TOKEN => Err(RingError::MalformedFrame {
                reason: format!("token frame of {} bytes, expected {}", frame.len(), TOKEN_FRAME_LEN),
            }),
            TAG_FORCE_DONE if body.is_empty() => Ok(ControlMessage::ForceDone),
            TAG_FORCE_DONE => Err(RingError::MalformedFrame {
                reason: format!("force_done frame carries {} trailing bytes", body.len()),
            }),
            other => Err(RingError::MalformedFrame {
                reason: format!("unknown tag {other}"),
            }),
        }
    }

    /// Runs the call this message stands for on `consensus`.
    pub fn apply<T: RingTransport, L: ActivityLedger>(self, consensus: &AsyncConsensus<T, L>) {
        match self {
            ControlMessage::ReceiveToken(token) => consensus.receive_the_token(token),
            ControlMessage::ForceDone => consensus.force_done(),
        }
    }
}
