//! Fork records, one per edge, packed into a single byte each so that the
//! lock-free engine can move a fork with one compare-and-swap.
//!
//! bit 0: owner (0 = source, 1 = target)
//! bit 1: dirty
//! bit 2: request from the source side
//! bit 3: request from the target side
use std::sync::atomic::{AtomicU8, Ordering::SeqCst};

use crate::graph::{EdgeId, GraphTopology, VertexId};

use super::Owner;

pub const OWNER_BIT: u8 = 1;
pub const DIRTY_BIT: u8 = 2;
pub const REQUEST_SOURCE: u8 = 4;
pub const REQUEST_TARGET: u8 = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ForkState {
    pub owner: Owner,
    pub dirty: bool,
    /// Pending claims, indexed by `Owner::index`.
    pub requests: [bool; 2],
}

impl ForkState {
    /// A freshly arranged fork: dirty, nobody asking for it.
    pub fn new(owner: Owner) -> Self {
        Self {
            owner,
            dirty: true,
            requests: [false; 2],
        }
    }

    pub fn request_bit(side: Owner) -> u8 {
        match side {
            Owner::Source => REQUEST_SOURCE,
            Owner::Target => REQUEST_TARGET,
        }
    }

    pub fn to_bits(self) -> u8 {
        let mut bits = match self.owner {
            Owner::Source => 0,
            Owner::Target => OWNER_BIT,
        };
        if self.dirty {
            bits |= DIRTY_BIT;
        }
        if self.requests[Owner::Source.index()] {
            bits |= REQUEST_SOURCE;
        }
        if self.requests[Owner::Target.index()] {
            bits |= REQUEST_TARGET;
        }
        bits
    }

    pub fn from_bits(bits: u8) -> Self {
        let owner = if bits & OWNER_BIT == 0 {
            Owner::Source
        } else {
            Owner::Target
        };
        Self {
            owner,
            dirty: bits & DIRTY_BIT != 0,
            requests: [bits & REQUEST_SOURCE != 0, bits & REQUEST_TARGET != 0],
        }
    }

    pub fn requested_by(&self, side: Owner) -> bool {
        self.requests[side.index()]
    }

    /// Whether the current owner has to give the fork up, ignoring whether
    /// it is eating: dirty, and the other side asked for it.
    pub fn yields(&self) -> bool {
        self.dirty && self.requested_by(self.owner.other())
    }

    /// The fork after it moved to the other side. It arrives clean, the new
    /// owner's claim is consumed, and the old owner's claim is kept when set
    /// or when `old_owner_wants_back`.
    pub fn handed_over(self, old_owner_wants_back: bool) -> Self {
        let from = self.owner;
        let to = from.other();
        let mut requests = [false; 2];
        requests[from.index()] = self.requests[from.index()] || old_owner_wants_back;
        Self {
            owner: to,
            dirty: false,
            requests,
        }
    }
}

/// Dense fork storage indexed by edge id.
#[derive(Debug, Default)]
pub struct ForkTable {
    forks: Vec<AtomicU8>,
}

impl ForkTable {
    pub fn new(num_edges: usize) -> Self {
        let forks = (0..num_edges)
            .map(|_| AtomicU8::new(ForkState::new(Owner::Source).to_bits()))
            .collect();
        Self { forks }
    }

    pub fn len(&self) -> usize {
        self.forks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forks.is_empty()
    }

    pub fn load(&self, edge: EdgeId) -> ForkState {
        ForkState::from_bits(self.forks[edge].load(SeqCst))
    }

    pub fn store(&self, edge: EdgeId, fork: ForkState) {
        self.forks[edge].store(fork.to_bits(), SeqCst);
    }

    /// Replaces `current` with `new`; on failure returns what was found.
    pub fn compare_exchange(
        &self,
        edge: EdgeId,
        current: ForkState,
        new: ForkState,
    ) -> Result<(), ForkState> {
        self.forks[edge]
            .compare_exchange(current.to_bits(), new.to_bits(), SeqCst, SeqCst)
            .map(|_| ())
            .map_err(ForkState::from_bits)
    }

    /// Places a claim from `side` unless `side` already owns the fork.
    /// Returns the fork carrying the claim, or `None` if it is ours.
    pub fn request(&self, edge: EdgeId, side: Owner) -> Option<ForkState> {
        let claim = ForkState::request_bit(side);
        let mut bits = self.forks[edge].load(SeqCst);
        loop {
            let fork = ForkState::from_bits(bits);
            if fork.owner == side {
                return None;
            }
            if bits & claim != 0 {
                return Some(fork);
            }
            match self.forks[edge].compare_exchange(bits, bits | claim, SeqCst, SeqCst) {
                Ok(_) => return Some(ForkState::from_bits(bits | claim)),
                Err(found) => bits = found,
            }
        }
    }

    /// Marks the fork dirty if `side` still owns it. Returns the fork after
    /// the update, or `None` once it belongs to the other side.
    pub fn dirty_if_owned(&self, edge: EdgeId, side: Owner) -> Option<ForkState> {
        let mut bits = self.forks[edge].load(SeqCst);
        loop {
            let fork = ForkState::from_bits(bits);
            if fork.owner != side {
                return None;
            }
            if fork.dirty {
                return Some(fork);
            }
            match self.forks[edge].compare_exchange(bits, bits | DIRTY_BIT, SeqCst, SeqCst) {
                Ok(_) => return Some(ForkState { dirty: true, ..fork }),
                Err(found) => bits = found,
            }
        }
    }

    /// Hands every fork, dirty, to the endpoint with the smaller key (the
    /// source on ties) and returns how many forks each vertex now holds.
    pub fn arrange<G, K>(&self, graph: &G, key: K) -> Vec<u32>
    where
        G: GraphTopology,
        K: Fn(VertexId) -> u64,
    {
        let mut held = vec![0u32; graph.num_vertices()];
        for v in 0..graph.num_vertices() as VertexId {
            for edge in graph.in_edges(v) {
                let owner = if key(edge.source) > key(edge.target) {
                    Owner::Target
                } else {
                    Owner::Source
                };
                self.store(graph.edge_id(&edge), ForkState::new(owner));
                held[owner.of(&edge) as usize] += 1;
            }
        }
        held
    }
}
