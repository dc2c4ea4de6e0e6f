//! Lock-free Chandy-Misra.
//!
//! A fork moves with a single compare-and-swap on its byte. Each philosopher
//! keeps its state, its fork count and an "acquiring" flag in one `AtomicU64`,
//! so "give up a fork unless eating" and "start eating once every fork is
//! here" are single atomic steps as well. The count is decremented before a
//! fork leaves and incremented after it arrives, so it never exceeds what the
//! vertex actually owns.
use std::sync::{
    atomic::{AtomicU64, Ordering::SeqCst},
    Arc,
};

use crate::graph::{Edge, EdgeId, GraphTopology, VertexId};

use super::{
    forks::{ForkState, ForkTable},
    incident_edges, ExclusionProtocol, Owner, Philosopher, PhilosopherState,
};

const COUNT_MASK: u64 = 0xFFFF_FFFF;
const STATE_SHIFT: u32 = 32;
const STATE_MASK: u64 = 0xFF << STATE_SHIFT;
const ACQUIRING: u64 = 1 << 40;

/// Unpacked view of a philosopher word.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Word(u64);

impl Word {
    fn new(state: PhilosopherState, count: u32, acquiring: bool) -> Self {
        let mut raw = ((state as u64) << STATE_SHIFT) | u64::from(count);
        if acquiring {
            raw |= ACQUIRING;
        }
        Word(raw)
    }

    fn state(self) -> PhilosopherState {
        PhilosopherState::from_u8(((self.0 & STATE_MASK) >> STATE_SHIFT) as u8)
    }

    fn count(self) -> u32 {
        (self.0 & COUNT_MASK) as u32
    }

    fn acquiring(self) -> bool {
        self.0 & ACQUIRING != 0
    }
}

#[derive(Debug)]
struct Seat {
    word: AtomicU64,
    num_edges: u32,
}

impl Seat {
    fn new(forks_acquired: u32, num_edges: u32) -> Self {
        Self {
            word: AtomicU64::new(Word::new(PhilosopherState::Thinking, forks_acquired, false).0),
            num_edges,
        }
    }

    fn load(&self) -> Word {
        Word(self.word.load(SeqCst))
    }

    fn update<F>(&self, mut f: F) -> Result<Word, Word>
    where
        F: FnMut(Word) -> Option<Word>,
    {
        self.word
            .fetch_update(SeqCst, SeqCst, |raw| f(Word(raw)).map(|w| w.0))
            .map(Word)
            .map_err(Word)
    }

    /// Takes one fork off the count unless the vertex is eating. Returns the
    /// state the vertex was in when the fork was taken, or the word that
    /// refused it: eating, or a count already drained by a racing transfer.
    fn take_fork(&self) -> Result<PhilosopherState, Word> {
        self.update(|w| {
            if w.state() == PhilosopherState::Eating {
                return None;
            }
            let count = w.count().checked_sub(1)?;
            Some(Word::new(w.state(), count, w.acquiring()))
        })
        .map(Word::state)
    }

    fn give_fork(&self) {
        self.word.fetch_add(1, SeqCst);
    }

    /// HUNGRY -> EATING for a vertex whose forks are all here, unless the
    /// vertex is still walking its own edges.
    fn try_eat(&self) -> bool {
        self.update(|w| {
            (w.state() == PhilosopherState::Hungry
                && !w.acquiring()
                && w.count() == self.num_edges)
                .then(|| Word::new(PhilosopherState::Eating, w.count(), false))
        })
        .is_ok()
    }

    /// Ends an acquisition walk, eating if every fork arrived meanwhile.
    fn settle(&self) -> bool {
        let num_edges = self.num_edges;
        let satisfied =
            |w: Word| w.state() == PhilosopherState::Hungry && w.count() == num_edges;
        let prev = self.update(|w| {
            let state = if satisfied(w) {
                PhilosopherState::Eating
            } else {
                w.state()
            };
            Some(Word::new(state, w.count(), false))
        });
        matches!(prev, Ok(w) if satisfied(w))
    }
}

pub struct ChandyMisraLockFree<G: GraphTopology> {
    graph: Arc<G>,
    forks: ForkTable,
    seats: Vec<Seat>,
}

impl<G: GraphTopology> ChandyMisraLockFree<G> {
    pub fn new(graph: Arc<G>) -> Self {
        let forks = ForkTable::new(graph.num_edges());
        let seats = (0..graph.num_vertices()).map(|_| Seat::new(0, 0)).collect();
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
            let num_edges = self.graph.num_in_edges(v as VertexId)
                + self.graph.num_out_edges(v as VertexId);
            *seat = Seat::new(held[v], num_edges as u32);
        }
    }

    fn seat(&self, vertex: VertexId) -> &Seat {
        &self.seats[vertex as usize]
    }

    /// Moves the fork of `edge` away from `from_side` if it is dirty, the
    /// other side asked for it, and the vertex at `from_side` is not eating.
    fn try_transfer(&self, edge: &Edge, from_side: Owner) -> bool {
        let from = self.seat(from_side.of(edge));
        let to = self.seat(from_side.other().of(edge));
        loop {
            let fork = self.forks.load(edge.id);
            if fork.owner != from_side || !fork.yields() {
                return false;
            }
            let from_state = match from.take_fork() {
                Ok(state) => state,
                Err(w) if w.state() == PhilosopherState::Eating => return false,
                Err(_) => {
                    std::hint::spin_loop();
                    continue;
                }
            };
            let moved = fork.handed_over(from_state == PhilosopherState::Hungry);
            if self.forks.compare_exchange(edge.id, fork, moved).is_ok() {
                to.give_fork();
                // the old owner may have turned hungry after we read its state
                if !moved.requested_by(from_side) && from.load().state() == PhilosopherState::Hungry {
                    self.forks.request(edge.id, from_side);
                }
                return true;
            }
            // somebody else moved it first
            from.give_fork();
        }
    }

    fn promote(&self, vertex: VertexId, promoted: &mut Vec<VertexId>) {
        if self.seat(vertex).try_eat() {
            promoted.push(vertex);
        }
    }
}

impl<G: GraphTopology> ExclusionProtocol for ChandyMisraLockFree<G> {
    type Graph = G;

    fn graph(&self) -> &G {
        &self.graph
    }

    fn make_hungry(&self, vertex: VertexId) -> Option<VertexId> {
        let seat = self.seat(vertex);
        let _ = seat.update(|w| {
            debug_assert_eq!(w.state(), PhilosopherState::Thinking);
            Some(Word::new(PhilosopherState::Hungry, w.count(), true))
        });

        for (edge, side) in incident_edges(self.graph.as_ref(), vertex) {
            if self.forks.request(edge.id, side).is_some() {
                self.try_transfer(&edge, side.other());
            }
        }

        seat.settle().then_some(vertex)
    }

    fn stops_eating(&self, vertex: VertexId) -> Vec<VertexId> {
        let _ = self.seat(vertex).update(|w| {
            debug_assert_eq!(w.state(), PhilosopherState::Eating);
            Some(Word::new(PhilosopherState::Thinking, w.count(), false))
        });

        let mut promoted = Vec::new();
        for (edge, side) in incident_edges(self.graph.as_ref(), vertex) {
            if self.forks.dirty_if_owned(edge.id, side).is_some() {
                self.try_transfer(&edge, side);
            }
            self.promote(side.other().of(&edge), &mut promoted);
        }
        promoted
    }

    fn cancel_eating(&self, vertex: VertexId) -> Vec<VertexId> {
        let seat = self.seat(vertex);
        let demoted = seat.update(|w| {
            (w.state() == PhilosopherState::Eating)
                .then(|| Word::new(PhilosopherState::Hungry, w.count(), true))
        });
        if demoted.is_err() {
            return Vec::new();
        }

        let mut promoted = Vec::new();
        for (edge, side) in incident_edges(self.graph.as_ref(), vertex) {
            self.try_transfer(&edge, side);
            self.promote(side.other().of(&edge), &mut promoted);
        }
        if seat.settle() {
            promoted.push(vertex);
        }
        promoted
    }

    fn philosopher(&self, vertex: VertexId) -> Philosopher {
        let seat = self.seat(vertex);
        let word = seat.load();
        Philosopher {
            state: word.state(),
            forks_acquired: word.count(),
            num_edges: seat.num_edges,
        }
    }

    fn fork(&self, edge: EdgeId) -> ForkState {
        self.forks.load(edge)
    }

    fn compute_initial_fork_arrangement(&mut self) {
        self.compute_initial_fork_arrangement_by(u64::from);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        thread,
        time::{Duration, Instant},
    };

    use crossbeam_channel::unbounded;

    use super::*;
    use crate::{
        exclusion::{complete_consistency_check, testing},
        graph::LocalGraph,
    };

    fn ring(n: usize) -> ChandyMisraLockFree<LocalGraph> {
        ChandyMisraLockFree::new(Arc::new(LocalGraph::ring(n).unwrap()))
    }

    #[test]
    fn test_word_layout() {
        let word = Word::new(PhilosopherState::Hungry, 7, true);
        assert_eq!(word.state(), PhilosopherState::Hungry);
        assert_eq!(word.count(), 7);
        assert!(word.acquiring());
        assert_eq!(Word(word.0 + 1).count(), 8);
        assert!(!Word::new(PhilosopherState::Eating, 0, false).acquiring());
    }

    #[test]
    fn test_initial_arrangement() {
        let cm = ring(4);
        let held: Vec<_> = (0..4).map(|v| cm.philosopher(v).forks_acquired).collect();
        assert_eq!(held, vec![2, 1, 1, 0]);
        complete_consistency_check(&cm).unwrap();
    }

    #[test]
    fn test_ring_of_four() {
        testing::ring_of_four(&ring(4));
    }

    #[test]
    fn test_sequential_and_drain_on_random_graph() {
        let cm = ChandyMisraLockFree::new(Arc::new(testing::random_graph(30, 120, 11)));
        testing::sequential_meals(&cm);
        for _ in 0..10 {
            testing::all_hungry_drain(&cm);
        }
    }

    #[test]
    fn test_fuzz_interleavings() {
        for seed in 10..18 {
            let cm = ChandyMisraLockFree::new(Arc::new(testing::random_graph(20, 150, seed)));
            testing::fuzz_interleavings(&cm, seed, 2_000);
        }
    }

    #[test]
    fn test_isolated_vertex() {
        let graph = LocalGraph::from_edges(4, &[(0, 1), (1, 2)]).unwrap();
        testing::lonely_vertex_eats(&ChandyMisraLockFree::new(Arc::new(graph)), 3);
    }

    #[test]
    fn test_cancel_eating() {
        testing::cancel_keeps_forks(&ring(4));
    }

    #[test]
    fn test_alternate_priorities() {
        let mut cm = ring(4);
        cm.compute_initial_fork_arrangement_by(|v| 100 - u64::from(v));
        assert_eq!(cm.philosopher(0).forks_acquired, 0);
        assert_eq!(cm.make_hungry(3), Some(3));
        assert_eq!(cm.make_hungry(0), None);
        complete_consistency_check(&cm).unwrap();
    }

    #[test]
    fn test_threaded_meals_never_overlap() {
        // every vertex eats a fixed number of meals; workers pull ready
        // vertices from a shared channel and check nobody adjacent is eating
        const MEALS: usize = 20;
        let graph = Arc::new(testing::random_graph(40, 100, 3));
        let cm = Arc::new(ChandyMisraLockFree::new(Arc::clone(&graph)));
        let n = graph.num_vertices();
        let eating: Arc<Vec<AtomicBool>> = Arc::new((0..n).map(|_| AtomicBool::new(false)).collect());
        let meals: Arc<Vec<AtomicUsize>> = Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect());
        let (tx, rx) = unbounded::<VertexId>();

        for v in 0..n as VertexId {
            if let Some(v) = cm.make_hungry(v) {
                tx.send(v).unwrap();
            }
        }

        let deadline = Instant::now() + Duration::from_secs(30);
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let (cm, graph, eating, meals) = (
                    Arc::clone(&cm),
                    Arc::clone(&graph),
                    Arc::clone(&eating),
                    Arc::clone(&meals),
                );
                let (tx, rx) = (tx.clone(), rx.clone());
                thread::spawn(move || loop {
                    assert!(Instant::now() < deadline, "meals did not finish in time");
                    if meals.iter().all(|m| m.load(Ordering::SeqCst) >= MEALS) {
                        return;
                    }
                    let Ok(v) = rx.recv_timeout(Duration::from_millis(10)) else {
                        continue;
                    };
                    assert!(!eating[v as usize].swap(true, Ordering::SeqCst));
                    for edge in graph.in_edges(v).chain(graph.out_edges(v)) {
                        assert!(!eating[edge.other(v) as usize].load(Ordering::SeqCst));
                    }
                    let eaten = meals[v as usize].fetch_add(1, Ordering::SeqCst) + 1;
                    eating[v as usize].store(false, Ordering::SeqCst);
                    for u in cm.stops_eating(v) {
                        tx.send(u).unwrap();
                    }
                    if eaten < MEALS {
                        if let Some(v) = cm.make_hungry(v) {
                            tx.send(v).unwrap();
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        complete_consistency_check(cm.as_ref()).unwrap();
    }

    #[test]
    fn test_adjacent_pair_races() {
        for _ in 0..200 {
            let cm = Arc::new(ChandyMisraLockFree::new(Arc::new(
                LocalGraph::from_edges(2, &[(1, 0)]).unwrap(),
            )));
            let handles: Vec<_> = (0..2)
                .map(|v| {
                    let cm = Arc::clone(&cm);
                    thread::spawn(move || cm.make_hungry(v))
                })
                .collect();
            let ready: Vec<_> = handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect();
            assert_eq!(ready.len(), 1);
            complete_consistency_check(cm.as_ref()).unwrap();
        }
    }
}
