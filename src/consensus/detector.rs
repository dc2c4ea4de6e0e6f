//! Worker bookkeeping and the token protocol for one process.
//!
//! A worker that runs out of work calls `begin_critical_section`, looks at
//! its queues one last time, and then either cancels the section (found
//! work) or ends it, which parks the worker until `cancel`/`cancel_one` hands
//! it new work or the run is declared done. All counters live behind one
//! process-wide mutex; `trying_to_sleep` and `critical` are read outside it
//! so that producers only take the lock when someone might be parked.
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering::SeqCst};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info};

use crate::RingError;

use super::{ActivityLedger, Rank, RingTransport, Token};

#[derive(Debug)]
struct ConsensusState {
    /// Workers not parked.
    numactive: usize,
    ncpus: usize,
    done: bool,
    sleeping: Vec<bool>,
    has_token: bool,
    token: Token,
    /// Ledger readings folded into the token on its last visit.
    last_calls_sent: u64,
    last_calls_received: u64,
}

impl ConsensusState {
    fn new(workers: usize, rank: Rank, num_processes: Rank) -> Self {
        Self {
            numactive: workers,
            ncpus: workers,
            done: false,
            sleeping: vec![false; workers],
            has_token: rank == 0,
            token: Token::new(num_processes - 1),
            last_calls_sent: 0,
            last_calls_received: 0,
        }
    }
}

/// Control messages produced under the lock and sent once it is released.
#[derive(Debug)]
enum Outgoing {
    Token { to: Rank, token: Token },
    Done { to: Rank },
}

pub struct AsyncConsensus<T: RingTransport, L: ActivityLedger> {
    transport: T,
    ledger: L,
    rank: Rank,
    num_processes: Rank,
    state: Mutex<ConsensusState>,
    wakeups: Vec<Condvar>,
    trying_to_sleep: AtomicUsize,
    critical: Vec<AtomicBool>,
}

impl<T: RingTransport, L: ActivityLedger> AsyncConsensus<T, L> {
    /// Detector for `workers` workers on the process `transport` speaks for.
    /// Rank 0 starts out holding the token.
    pub fn new(transport: T, ledger: L, workers: usize) -> Result<Self, RingError> {
        if workers == 0 {
            return Err(RingError::NoWorkers);
        }
        let rank = transport.self_rank();
        let num_processes = transport.num_processes();
        if rank >= num_processes {
            return Err(RingError::RankOutOfRange {
                rank,
                num_processes,
            });
        }
        Ok(Self {
            transport,
            ledger,
            rank,
            num_processes,
            state: Mutex::new(ConsensusState::new(workers, rank, num_processes)),
            wakeups: (0..workers).map(|_| Condvar::new()).collect(),
            trying_to_sleep: AtomicUsize::new(0),
            critical: (0..workers).map(|_| AtomicBool::new(false)).collect(),
        })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn num_workers(&self) -> usize {
        self.wakeups.len()
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    pub fn num_active(&self) -> usize {
        self.state.lock().numactive
    }

    pub fn has_token(&self) -> bool {
        self.state.lock().has_token
    }

    /// Re-initializes every counter and flag for a new run. No worker may be
    /// inside a critical section.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let workers = state.ncpus;
        *state = ConsensusState::new(workers, self.rank, self.num_processes);
        self.trying_to_sleep.store(0, SeqCst);
        for flag in &self.critical {
            flag.store(false, SeqCst);
        }
        debug!("{}: consensus reset", self.rank);
    }

    /// Changes the number of participating workers, resetting the detector.
    pub fn set_worker_count(&mut self, workers: usize) -> Result<(), RingError> {
        if workers == 0 {
            return Err(RingError::NoWorkers);
        }
        *self.state.get_mut() = ConsensusState::new(workers, self.rank, self.num_processes);
        self.wakeups = (0..workers).map(|_| Condvar::new()).collect();
        self.critical = (0..workers).map(|_| AtomicBool::new(false)).collect();
        *self.trying_to_sleep.get_mut() = 0;
        Ok(())
    }

    /// Enters the sleep/wake decision section for `worker`. The caller must
    /// look for work once more after this returns and then either `end` or
    /// `cancel` the section.
    pub fn begin_critical_section(&self, worker: usize) -> CriticalSection<'_, T, L> {
        self.trying_to_sleep.fetch_add(1, SeqCst);
        self.critical[worker].store(true, SeqCst);
        // pairs with the fence in `cancel`
        fence(SeqCst);
        CriticalSection {
            consensus: self,
            worker,
            state: self.state.lock(),
        }
    }

    pub fn end_critical_section(&self, section: CriticalSection<'_, T, L>) -> bool {
        section.end()
    }

    pub fn cancel_critical_section(&self, section: CriticalSection<'_, T, L>) {
        section.cancel()
    }

    /// Wakes every parked worker, e.g. because new work arrived.
    pub fn cancel(&self) {
        fence(SeqCst);
        if self.trying_to_sleep.load(SeqCst) == 0 {
            return;
        }
        let mut state = self.state.lock();
        let was_idle = state.numactive == 0;
        if self.wake_all(&mut state) && was_idle && !state.done {
            info!("{}: waking", self.rank);
        }
    }

    /// Wakes `worker` alone if it is parked.
    pub fn cancel_one(&self, worker: usize) {
        if !self.critical[worker].load(SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        if state.sleeping[worker] {
            if state.numactive == 0 && !state.done {
                info!("{}: waking", self.rank);
            }
            state.sleeping[worker] = false;
            state.numactive += 1;
            self.wakeups[worker].notify_one();
        }
    }

    /// Installs an incoming token; passes it straight on when every local
    /// worker is already parked.
    pub fn receive_the_token(&self, token: Token) {
        let outgoing = {
            let mut state = self.state.lock();
            state.has_token = true;
            state.token = token;
            info!("{}: token received", self.rank);
            if state.numactive == 0 {
                self.pass_the_token(&mut state)
            } else {
                Vec::new()
            }
        };
        self.dispatch(outgoing);
    }

    /// Marks the run finished and releases every parked worker. Idempotent.
    pub fn force_done(&self) {
        self.state.lock().done = true;
        debug!("{}: force done", self.rank);
        self.cancel();
    }

    /// Releases every parked worker. Returns whether any was parked.
    fn wake_all(&self, state: &mut ConsensusState) -> bool {
        let mut woke = false;
        for (worker, sleeping) in state.sleeping.iter_mut().enumerate() {
            if *sleeping {
                *sleeping = false;
                state.numactive += 1;
                self.wakeups[worker].notify_one();
                woke = true;
            }
        }
        woke
    }

    /// Called with the lock held and the token local. Either completes the
    /// run or moves the token on to the next rank.
    fn pass_the_token(&self, state: &mut ConsensusState) -> Vec<Outgoing> {
        debug_assert!(state.has_token);
        let sent = self.ledger.calls_sent();
        let received = self.ledger.calls_received();
        let changed = sent != state.last_calls_sent || received != state.last_calls_received;

        if !changed && state.token.last_change == self.rank && state.token.is_balanced() {
            info!(
                "completed token: {} {}",
                state.token.total_calls_received, state.token.total_calls_sent
            );
            state.done = true;
            self.wake_all(state);
            return (0..self.num_processes)
                .filter(|&to| to != self.rank)
                .map(|to| Outgoing::Done { to })
                .collect();
        }

        if changed {
            state.token.total_calls_sent += sent - state.last_calls_sent;
            state.token.total_calls_received += received - state.last_calls_received;
            state.token.last_change = self.rank;
            state.last_calls_sent = sent;
            state.last_calls_received = received;
        }
        state.has_token = false;
        let to = (self.rank + 1) % self.num_processes;
        info!(
            "passing token {} --> {}: {} {}",
            self.rank, to, state.token.total_calls_received, state.token.total_calls_sent
        );
        vec![Outgoing::Token {
            to,
            token: state.token,
        }]
    }

    fn dispatch(&self, outgoing: Vec<Outgoing>) {
        for message in outgoing {
            let sent = match message {
                Outgoing::Token { to, token } => self.transport.send_token(to, token),
                Outgoing::Done { to } => self.transport.send_force_done(to),
            };
            if let Err(err) = sent {
                error!("{}: control message lost: {}", self.rank, err);
            }
        }
    }
}

/// Held while a worker decides whether to park; owns the process-wide lock.
/// Dropping it without calling `end` cancels it.
pub struct CriticalSection<'a, T: RingTransport, L: ActivityLedger> {
    consensus: &'a AsyncConsensus<T, L>,
    worker: usize,
    state: MutexGuard<'a, ConsensusState>,
}

impl<T: RingTransport, L: ActivityLedger> CriticalSection<'_, T, L> {
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Parks the worker until woken or done. Returns whether the whole run
    /// is done; `false` means new work may have arrived.
    pub fn end(mut self) -> bool {
        let consensus = self.consensus;
        if self.state.done {
            return true;
        }
        self.state.numactive -= 1;
        self.state.sleeping[self.worker] = true;
        if self.state.numactive == 0 {
            info!("{}: termination possible", consensus.rank);
            if self.state.has_token {
                let outgoing = consensus.pass_the_token(&mut self.state);
                MutexGuard::unlocked(&mut self.state, || consensus.dispatch(outgoing));
            }
        }
        while self.state.sleeping[self.worker] && !self.state.done {
            consensus.wakeups[self.worker].wait(&mut self.state);
        }
        self.state.done
    }

    /// Leaves the section without parking.
    pub fn cancel(self) {}
}

impl<T: RingTransport, L: ActivityLedger> Drop for CriticalSection<'_, T, L> {
    fn drop(&mut self) {
        self.consensus.critical[self.worker].store(false, SeqCst);
        self.consensus.trying_to_sleep.fetch_sub(1, SeqCst);
    }
}
