//! Chandy-Misra "dining philosophers" exclusion over the edges of a graph.
//!
//! Every edge carries a fork and every vertex is a philosopher. A vertex may
//! run (eat) only while it holds the forks of all of its incident edges, so no
//! two adjacent vertices ever run at the same time. Forks are handed over only
//! when dirty (used since the last hand-over) and requested, which keeps the
//! precedence graph acyclic and rules out deadlock.
//!
//! Two engines implement `ExclusionProtocol`:
//! - `ChandyMisra`, serializing each edge step by locking both endpoints in
//!   vertex id order,
//! - `ChandyMisraLockFree`, retrying compare-and-swap on the packed fork byte
//!   and on a packed per-vertex state word.
use std::fmt::Display;

use crate::graph::{Edge, EdgeId, GraphTopology, VertexId};

pub mod check;
pub mod forks;
pub mod lockfree;
pub mod locking;

pub use check::{complete_consistency_check, no_locks_consistency_check};
pub use forks::{ForkState, ForkTable};
pub use lockfree::ChandyMisraLockFree;
pub use locking::ChandyMisra;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PhilosopherState {
    Thinking = 0,
    Hungry = 1,
    Eating = 2,
}

impl PhilosopherState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PhilosopherState::Thinking,
            1 => PhilosopherState::Hungry,
            2 => PhilosopherState::Eating,
            _ => unreachable!("invalid philosopher state {raw}"),
        }
    }
}

impl Display for PhilosopherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhilosopherState::Thinking => write!(f, "thinking"),
            PhilosopherState::Hungry => write!(f, "hungry"),
            PhilosopherState::Eating => write!(f, "eating"),
        }
    }
}

/// Endpoint of an edge, from the fork's point of view.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Owner {
    Source = 0,
    Target = 1,
}

impl Owner {
    pub fn other(self) -> Self {
        match self {
            Owner::Source => Owner::Target,
            Owner::Target => Owner::Source,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// The vertex standing at this side of `edge`.
    pub fn of(self, edge: &Edge) -> VertexId {
        match self {
            Owner::Source => edge.source,
            Owner::Target => edge.target,
        }
    }
}

/// Snapshot of one philosopher record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Philosopher {
    pub state: PhilosopherState,
    pub forks_acquired: u32,
    pub num_edges: u32,
}

impl Philosopher {
    pub fn is_satisfied(&self) -> bool {
        self.forks_acquired == self.num_edges
    }
}

/// Edge-scoped mutual exclusion as consumed by an engine's scheduler.
///
/// Calls for one vertex must not overlap: the scheduler owns a vertex from
/// `make_hungry` until it either stays hungry or, once eating, until it calls
/// `stops_eating`/`cancel_eating`. Calls for different vertices may run
/// concurrently from any thread.
pub trait ExclusionProtocol: Send + Sync {
    type Graph: GraphTopology;

    fn graph(&self) -> &Self::Graph;

    /// THINKING -> HUNGRY, contending for every missing fork. Returns the
    /// vertex if it went straight on to EATING.
    fn make_hungry(&self, vertex: VertexId) -> Option<VertexId>;

    /// EATING -> THINKING. Dirties and releases requested forks; returns the
    /// neighbors that became EATING as a result.
    fn stops_eating(&self, vertex: VertexId) -> Vec<VertexId>;

    /// EATING -> HUNGRY without dirtying. Returns promoted neighbors, plus
    /// `vertex` itself if it still holds every fork. No-op when not eating.
    fn cancel_eating(&self, vertex: VertexId) -> Vec<VertexId>;

    fn philosopher(&self, vertex: VertexId) -> Philosopher;

    fn fork(&self, edge: EdgeId) -> ForkState;

    /// Resets every philosopher to THINKING and hands each fork, dirty, to the
    /// endpoint with the smaller id.
    fn compute_initial_fork_arrangement(&mut self);
}

/// Incident edges of `vertex`, each paired with the side `vertex` stands on.
pub(crate) fn incident_edges<G: GraphTopology>(
    graph: &G,
    vertex: VertexId,
) -> impl Iterator<Item = (Edge, Owner)> + '_ {
    graph
        .in_edges(vertex)
        .map(|edge| (edge, Owner::Target))
        .chain(graph.out_edges(vertex).map(|edge| (edge, Owner::Source)))
}
