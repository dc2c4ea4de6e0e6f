//! Many threads scheduling vertices through the exclusion engines. Every
//! vertex has to eat a fixed number of meals, no two neighbors may ever eat at
//! the same time, and the table must be at rest afterwards.
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use forkring::{
    exclusion::{complete_consistency_check, no_locks_consistency_check},
    ChandyMisra, ChandyMisraLockFree, ExclusionProtocol, GraphTopology, LocalGraph, VertexId,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const MEALS: usize = 25;
const THREADS: usize = 6;

fn random_graph(num_vertices: usize, density_per_mille: u32, seed: u64) -> LocalGraph {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut graph = LocalGraph::new(num_vertices);
    for i in 0..num_vertices as VertexId {
        for j in (i + 1)..num_vertices as VertexId {
            if rng.gen_range(0..1000) < density_per_mille {
                if rng.gen_bool(0.5) {
                    graph.add_edge(i, j).unwrap();
                } else {
                    graph.add_edge(j, i).unwrap();
                }
            }
        }
    }
    graph
}

struct Table<'a, P: ExclusionProtocol> {
    cm: &'a P,
    eating: Vec<AtomicBool>,
    meals: Vec<AtomicUsize>,
    ready: (Sender<VertexId>, Receiver<VertexId>),
}

impl<P: ExclusionProtocol> Table<'_, P> {
    fn all_fed(&self) -> bool {
        self.meals.iter().all(|m| m.load(SeqCst) >= MEALS)
    }

    fn schedule(&self, vertices: impl IntoIterator<Item = VertexId>) {
        for v in vertices {
            self.ready.0.send(v).unwrap();
        }
    }

    /// Marks `v` as eating and checks no neighbor is.
    fn sit(&self, v: VertexId) {
        assert!(!self.eating[v as usize].swap(true, SeqCst), "vertex {v} scheduled twice");
        let graph = self.cm.graph();
        for edge in graph.in_edges(v).chain(graph.out_edges(v)) {
            let u = edge.other(v);
            assert!(!self.eating[u as usize].load(SeqCst), "neighbors {v} and {u} eat together");
        }
    }

    fn stand(&self, v: VertexId) {
        self.eating[v as usize].store(false, SeqCst);
    }
}

fn worker<P: ExclusionProtocol>(table: &Table<'_, P>, seed: u64, cancel_rate: f64, deadline: Instant) {
    let mut rng = StdRng::seed_from_u64(seed);
    while !table.all_fed() {
        assert!(Instant::now() < deadline, "meals did not finish in time");
        let Ok(v) = table.ready.1.recv_timeout(Duration::from_millis(5)) else {
            continue;
        };
        table.sit(v);
        if rng.gen_bool(cancel_rate) {
            // preempted before finishing the meal
            table.stand(v);
            table.schedule(table.cm.cancel_eating(v));
            continue;
        }
        let eaten = table.meals[v as usize].fetch_add(1, SeqCst) + 1;
        table.stand(v);
        table.schedule(table.cm.stops_eating(v));
        if eaten < MEALS {
            table.schedule(table.cm.make_hungry(v));
        }
    }
}

fn feast<P: ExclusionProtocol>(cm: &P, cancel_rate: f64) {
    let n = cm.graph().num_vertices();
    let table = Table {
        cm,
        eating: (0..n).map(|_| AtomicBool::new(false)).collect(),
        meals: (0..n).map(|_| AtomicUsize::new(0)).collect(),
        ready: unbounded(),
    };
    for v in 0..n as VertexId {
        table.schedule(cm.make_hungry(v));
    }
    let deadline = Instant::now() + Duration::from_secs(60);
    thread::scope(|s| {
        for t in 0..THREADS {
            let table = &table;
            s.spawn(move || worker(table, t as u64, cancel_rate, deadline));
        }
    });
    assert!(table.ready.1.is_empty());
    complete_consistency_check(cm).unwrap();
    no_locks_consistency_check(cm).unwrap();
}

#[test]
fn test_locking_feast() {
    let graph = Arc::new(random_graph(60, 80, 1));
    feast(&ChandyMisra::new(graph), 0.0);
}

#[test]
fn test_lockfree_feast() {
    let graph = Arc::new(random_graph(60, 80, 2));
    feast(&ChandyMisraLockFree::new(graph), 0.0);
}

#[test]
fn test_locking_feast_with_preemption() {
    let graph = Arc::new(random_graph(40, 120, 3));
    feast(&ChandyMisra::new(graph), 0.2);
}

#[test]
fn test_lockfree_feast_with_preemption() {
    let graph = Arc::new(random_graph(40, 120, 4));
    feast(&ChandyMisraLockFree::new(graph), 0.2);
}

#[test]
fn test_dense_ring_of_cliques() {
    // complete graph: only one vertex can ever eat at a time
    let pairs: Vec<_> = (0..8u32)
        .flat_map(|i| ((i + 1)..8).map(move |j| (i, j)))
        .collect();
    let graph = Arc::new(LocalGraph::from_edges(8, &pairs).unwrap());
    feast(&ChandyMisra::new(Arc::clone(&graph)), 0.1);
    feast(&ChandyMisraLockFree::new(graph), 0.1);
}
