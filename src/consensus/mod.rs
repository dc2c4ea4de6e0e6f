//! Distributed quiescence detection over a ring of processes.
//!
//! Every process runs one `AsyncConsensus`. Its workers bracket the "is there
//! anything left for me?" check with a critical section and park when the
//! answer is no. Once every worker of a process is parked, the process passes
//! the termination token around the ring, folding in how many application
//! messages it sent and received since the token last came by. A lap on which
//! nobody reported new traffic, with the totals balanced, proves the whole
//! computation quiescent; the process that sees it broadcasts `force_done`.
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::RingError;

pub mod detector;
pub mod ledger;

pub use detector::{AsyncConsensus, CriticalSection};
pub use ledger::CallCounter;

/// 0-based index of a process in the ring.
pub type Rank = u32;

/// The termination token. Plain old data so it crosses the wire as its raw
/// 24 bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Token {
    pub total_calls_sent: u64,
    pub total_calls_received: u64,
    /// Rank of the last process whose report changed the totals.
    pub last_change: Rank,
    _pad: u32,
}

impl Token {
    pub fn new(last_change: Rank) -> Self {
        Self {
            last_change,
            ..Self::default()
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.total_calls_sent == self.total_calls_received
    }
}

unsafe impl Pod for Token {}
unsafe impl Zeroable for Token {}

/// Monotonic counts of application messages, maintained by the messaging
/// layer and only read here.
pub trait ActivityLedger: Send + Sync {
    fn calls_sent(&self) -> u64;
    fn calls_received(&self) -> u64;
}

impl<L: ActivityLedger + ?Sized> ActivityLedger for Arc<L> {
    fn calls_sent(&self) -> u64 {
        (**self).calls_sent()
    }

    fn calls_received(&self) -> u64 {
        (**self).calls_received()
    }
}

/// Fire-and-forget delivery of control traffic between ring members.
pub trait RingTransport: Send + Sync {
    fn self_rank(&self) -> Rank;
    fn num_processes(&self) -> Rank;
    /// Delivers `token` to `to`, where it lands in `receive_the_token`.
    fn send_token(&self, to: Rank, token: Token) -> Result<(), RingError>;
    /// Tells `to` the run is over.
    fn send_force_done(&self, to: Rank) -> Result<(), RingError>;
}

impl<T: RingTransport + ?Sized> RingTransport for Arc<T> {
    fn self_rank(&self) -> Rank {
        (**self).self_rank()
    }

    fn num_processes(&self) -> Rank {
        (**self).num_processes()
    }

    fn send_token(&self, to: Rank, token: Token) -> Result<(), RingError> {
        (**self).send_token(to, token)
    }

    fn send_force_done(&self, to: Rank) -> Result<(), RingError> {
        (**self).send_force_done(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_24_plain_bytes() {
        assert_eq!(std::mem::size_of::<Token>(), 24);
        let mut token = Token::new(2);
        token.total_calls_sent = 5;
        token.total_calls_received = 5;
        assert!(token.is_balanced());
        let bytes = bytemuck::bytes_of(&token);
        assert_eq!(&bytes[..8], &5u64.to_ne_bytes());
        assert_eq!(&bytes[16..20], &2u32.to_ne_bytes());
        assert_eq!(&bytes[20..], &[0; 4]);
    }
}
