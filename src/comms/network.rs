//! In-process network: one unbounded inbox per rank.
//!
//! Each rank gets an `Endpoint` for sending (application messages and, as the
//! detector's `RingTransport`, control frames) and a single `Inbox` whose
//! dispatcher loop feeds control frames to the local `AsyncConsensus` and
//! application messages to a callback. Only application messages touch the
//! per-rank `CallCounter`.
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    consensus::{ActivityLedger, AsyncConsensus, CallCounter, Rank, RingTransport, Token},
    RingError,
};

use super::ControlMessage;

#[derive(Debug)]
pub enum Payload<A> {
    Control(Vec<u8>),
    Application(A),
    /// Stops the receiving dispatcher.
    Shutdown,
}

#[derive(Debug)]
pub struct Envelope<A> {
    pub from: Rank,
    pub to: Rank,
    pub payload: Payload<A>,
}

pub struct Network<A> {
    senders: Vec<Sender<Envelope<A>>>,
    inboxes: Mutex<Vec<Option<Receiver<Envelope<A>>>>>,
    ledgers: Vec<Arc<CallCounter>>,
}

impl<A: Send> Network<A> {
    pub fn new(num_processes: Rank) -> Self {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..num_processes).map(|_| unbounded()).unzip();
        Self {
            senders,
            inboxes: Mutex::new(receivers.into_iter().map(Some).collect()),
            ledgers: (0..num_processes).map(|_| Arc::new(CallCounter::new())).collect(),
        }
    }

    pub fn num_processes(&self) -> Rank {
        self.senders.len() as Rank
    }

    fn check_rank(&self, rank: Rank) -> Result<usize, RingError> {
        if rank >= self.num_processes() {
            return Err(RingError::RankOutOfRange {
                rank,
                num_processes: self.num_processes(),
            });
        }
        Ok(rank as usize)
    }

    /// The activity ledger of `rank`.
    pub fn ledger(&self, rank: Rank) -> Result<Arc<CallCounter>, RingError> {
        let idx = self.check_rank(rank)?;
        Ok(Arc::clone(&self.ledgers[idx]))
    }

    pub fn endpoint(&self, rank: Rank) -> Result<Endpoint<A>, RingError> {
        let idx = self.check_rank(rank)?;
        Ok(Endpoint {
            rank,
            senders: self.senders.clone(),
            ledger: Arc::clone(&self.ledgers[idx]),
        })
    }

    /// Hands out the receiving side of `rank`. Each inbox can be taken once.
    pub fn take_inbox(&self, rank: Rank) -> Result<Inbox<A>, RingError> {
        let idx = self.check_rank(rank)?;
        let receiver = self.inboxes.lock()[idx]
            .take()
            .ok_or(RingError::InboxTaken { rank })?;
        Ok(Inbox {
            rank,
            receiver,
            ledger: Arc::clone(&self.ledgers[idx]),
        })
    }
}

/// Sending half for one rank.
pub struct Endpoint<A> {
    rank: Rank,
    senders: Vec<Sender<Envelope<A>>>,
    ledger: Arc<CallCounter>,
}

impl<A> Clone for Endpoint<A> {
    fn clone(&self) -> Self {
        Self {
            rank: self.rank,
            senders: self.senders.clone(),
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl<A: Send> Endpoint<A> {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn ledger(&self) -> &Arc<CallCounter> {
        &self.ledger
    }

    fn sender(&self, to: Rank) -> Result<&Sender<Envelope<A>>, RingError> {
        self.senders
            .get(to as usize)
            .ok_or(RingError::RankOutOfRange {
                rank: to,
                num_processes: self.senders.len() as Rank,
            })
    }

    fn post(&self, to: Rank, payload: Payload<A>) -> Result<(), RingError> {
        let envelope = Envelope {
            from: self.rank,
            to,
            payload,
        };
        self.sender(to)?
            .send(envelope)
            .map_err(|_| RingError::Disconnected { rank: to })
    }

    /// Sends an application message, counting it as sent before it leaves.
    pub fn send(&self, to: Rank, message: A) -> Result<(), RingError> {
        self.sender(to)?;
        self.ledger.record_send();
        self.post(to, Payload::Application(message))
    }

    /// Stops the dispatcher of `to`.
    pub fn shutdown(&self, to: Rank) -> Result<(), RingError> {
        self.post(to, Payload::Shutdown)
    }
}

impl<A: Send> RingTransport for Endpoint<A> {
    fn self_rank(&self) -> Rank {
        self.rank
    }

    fn num_processes(&self) -> Rank {
        self.senders.len() as Rank
    }

    fn send_token(&self, to: Rank, token: Token) -> Result<(), RingError> {
        self.post(to, Payload::Control(ControlMessage::ReceiveToken(token).encode()))
    }

    fn send_force_done(&self, to: Rank) -> Result<(), RingError> {
        self.post(to, Payload::Control(ControlMessage::ForceDone.encode()))
    }
}

/// Receiving half for one rank.
pub struct Inbox<A> {
    rank: Rank,
    receiver: Receiver<Envelope<A>>,
    ledger: Arc<CallCounter>,
}

impl<A> Inbox<A> {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Dispatcher loop. Control frames go to `consensus`; application
    /// messages are counted as received and passed to `on_message` with the
    /// sender's rank. Returns on `Shutdown`, when every sender is gone, or on
    /// a frame that does not decode.
    pub fn serve<T, L, F>(self, consensus: &AsyncConsensus<T, L>, mut on_message: F) -> Result<(), RingError>
    where
        T: RingTransport,
        L: ActivityLedger,
        F: FnMut(Rank, A),
    {
        debug!("{}: dispatcher started", self.rank);
        for envelope in self.receiver.iter() {
            debug_assert_eq!(envelope.to, self.rank);
            match envelope.payload {
                Payload::Control(frame) => match ControlMessage::decode(&frame) {
                    Ok(message) => message.apply(consensus),
                    Err(err) => {
                        warn!("{}: dropping frame from {}: {}", self.rank, envelope.from, err);
                        return Err(err);
                    }
                },
                Payload::Application(message) => {
                    self.ledger.record_receive();
                    on_message(envelope.from, message);
                }
                Payload::Shutdown => break,
            }
        }
        debug!("{}: dispatcher stopped", self.rank);
        Ok(())
    }
}
