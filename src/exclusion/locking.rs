//! Lock-based Chandy-Misra.
//!
//! Each philosopher record sits behind its own mutex. A fork is only read or
//! written while the mutexes of both of its endpoints are held, and the pair is
//! always taken lower vertex id first, so the two-lock dance cannot produce a
//! circular wait.
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::graph::{Edge, EdgeId, GraphTopology, VertexId};

use super::{
    forks::{ForkState, ForkTable},
    incident_edges, ExclusionProtocol, Owner, Philosopher, PhilosopherState,
};

/// Philosopher record plus the flag that keeps neighbors from promoting a
/// vertex while its own `make_hungry`/`cancel_eating` is still walking edges.
#[derive(Debug)]
struct Seat {
    state: PhilosopherState,
    forks_acquired: u32,
    num_edges: u32,
    acquiring: bool,
}

impl Seat {
    fn new(forks_acquired: u32, num_edges: u32) -> Self {
        Self {
            state: PhilosopherState::Thinking,
            forks_acquired,
            num_edges,
            acquiring: false,
        }
    }

    fn is_satisfied(&self) -> bool {
        self.forks_acquired == self.num_edges
    }

    /// Ends an acquisition walk: eat if every fork is here.
    fn settle(&mut self) -> bool {
        self.acquiring = false;
        if self.state == PhilosopherState::Hungry && self.is_satisfied() {
            self.state = PhilosopherState::Eating;
            return true;
        }
        false
    }

    /// Promotion on behalf of a neighbor that just released a fork.
    fn promote(&mut self) -> bool {
        if !self.acquiring && self.state == PhilosopherState::Hungry && self.is_satisfied() {
            self.state = PhilosopherState::Eating;
            return true;
        }
        false
    }

    fn snapshot(&self) -> Philosopher {
        Philosopher {
            state: self.state,
            forks_acquired: self.forks_acquired,
            num_edges: self.num_edges,
        }
    }
}

pub struct ChandyMisra<G: GraphTopology> {
    graph: Arc<G>,
    pub(super) forks: ForkTable,
    seats: Vec<Mutex<Seat>>,
}

impl<G: GraphTopology> ChandyMisra<G> {
    pub fn new(graph: Arc<G>) -> Self {
        let forks = ForkTable::new(graph.num_edges());
        let seats = (0..graph.num_vertices())
            .map(|_| Mutex::new(Seat::new(0, 0)))
            .collect();
        let mut cm = Self {
            graph,
            forks,
            seats,
        };
        cm.compute_initial_fork_arrangement();
        cm
    }

    /// Like `compute_initial_fork_arrangement`, but ranks vertices by `key`
    /// instead of by id.
    pub fn compute_initial_fork_arrangement_by<K: Fn(VertexId) -> u64>(&mut self, key: K) {
        let held = self.forks.arrange(self.graph.as_ref(), key);
        for (v, seat) in self.seats.iter_mut().enumerate() {
            let v = v as VertexId;
            let num_edges = self.graph.num_in_edges(v) + self.graph.num_out_edges(v);
            *seat.get_mut() = Seat::new(held[v as usize], num_edges as u32);
        }
    }

    fn lock(&self, vertex: VertexId) -> MutexGuard<'_, Seat> {
        self.seats[vertex as usize].lock()
    }

    /// Locks `a` and `b`, smaller id first. Guards come back as `(a, b)`.
    fn lock_pair(&self, a: VertexId, b: VertexId) -> (MutexGuard<'_, Seat>, MutexGuard<'_, Seat>) {
        debug_assert_ne!(a, b, "edge endpoints must differ");
        if a < b {
            let first = self.lock(a);
            (first, self.lock(b))
        } else {
            let first = self.lock(b);
            (self.lock(a), first)
        }
    }

    /// Moves the fork from its owner to the other endpoint if it is dirty and
    /// requested. Both endpoint records must be locked.
    fn hand_over(&self, edge: EdgeId, fork: ForkState, owner: &mut Seat, requester: &mut Seat) -> bool {
        if !fork.yields() {
            return false;
        }
        let wants_back = owner.state == PhilosopherState::Hungry;
        self.forks.store(edge, fork.handed_over(wants_back));
        owner.forks_acquired -= 1;
        requester.forks_acquired += 1;
        true
    }

    /// Shared step of `stops_eating` and `cancel_eating` for one edge: release
    /// the fork if owed and promote the neighbor if that completed its set.
    fn release_edge(&self, vertex: VertexId, edge: Edge, side: Owner, dirty_first: bool) -> Option<VertexId> {
        let other = side.other().of(&edge);
        let (mut me, mut them) = self.lock_pair(vertex, other);
        let mut fork = self.forks.load(edge.id);
        if fork.owner == side {
            if dirty_first && !fork.dirty {
                fork.dirty = true;
                self.forks.store(edge.id, fork);
            }
            if fork.dirty {
                self.hand_over(edge.id, fork, &mut me, &mut them);
            }
        }
        them.promote().then_some(other)
    }
}

impl<G: GraphTopology> ExclusionProtocol for ChandyMisra<G> {
    type Graph = G;

    fn graph(&self) -> &G {
        &self.graph
    }

    fn make_hungry(&self, vertex: VertexId) -> Option<VertexId> {
        {
            let mut me = self.lock(vertex);
            debug_assert_eq!(me.state, PhilosopherState::Thinking);
            me.state = PhilosopherState::Hungry;
            me.acquiring = true;
        }

        for (edge, side) in incident_edges(self.graph.as_ref(), vertex) {
            let other = side.other().of(&edge);
            let (mut me, mut them) = self.lock_pair(vertex, other);
            let mut fork = self.forks.load(edge.id);
            if fork.owner == side {
                continue;
            }
            fork.requests[side.index()] = true;
            self.forks.store(edge.id, fork);
            if them.state != PhilosopherState::Eating {
                self.hand_over(edge.id, fork, &mut them, &mut me);
            }
        }

        self.lock(vertex).settle().then_some(vertex)
    }

    fn stops_eating(&self, vertex: VertexId) -> Vec<VertexId> {
        {
            let mut me = self.lock(vertex);
            debug_assert_eq!(me.state, PhilosopherState::Eating);
            me.state = PhilosopherState::Thinking;
        }
        incident_edges(self.graph.as_ref(), vertex)
            .filter_map(|(edge, side)| self.release_edge(vertex, edge, side, true))
            .collect()
    }

    fn cancel_eating(&self, vertex: VertexId) -> Vec<VertexId> {
        {
            let mut me = self.lock(vertex);
            if me.state != PhilosopherState::Eating {
                return Vec::new();
            }
            me.state = PhilosopherState::Hungry;
            me.acquiring = true;
        }
        let mut promoted: Vec<VertexId> = incident_edges(self.graph.as_ref(), vertex)
            .filter_map(|(edge, side)| self.release_edge(vertex, edge, side, false))
            .collect();

        if self.lock(vertex).settle() {
            promoted.push(vertex);
        }
        promoted
    }

    fn philosopher(&self, vertex: VertexId) -> Philosopher {
        self.lock(vertex).snapshot()
    }

    fn fork(&self, edge: EdgeId) -> ForkState {
        self.forks.load(edge)
    }

    fn compute_initial_fork_arrangement(&mut self) {
        self.compute_initial_fork_arrangement_by(u64::from);
    }
}
