//! Whole-table consistency checks.
//!
//! Both checks read every record without synchronizing against the
//! protocol, so they are only meaningful while no `make_hungry`,
//! `stops_eating` or `cancel_eating` call is in flight.
use crate::{
    graph::{GraphTopology, VertexId},
    RingError,
};

use super::{incident_edges, ExclusionProtocol, PhilosopherState};

/// Checks every philosopher against the forks it holds.
///
/// - the fork count matches the forks actually owned,
/// - a thinking vertex holds no clean fork,
/// - a hungry vertex is not yet satisfied, and every fork it is missing sits
///   with a neighbor that is eating or, if the neighbor is hungry, is clean,
/// - an eating vertex holds every fork and no neighbor eats with it.
pub fn complete_consistency_check<P>(cm: &P) -> Result<(), RingError>
where
    P: ExclusionProtocol + ?Sized,
{
    let graph = cm.graph();
    for vertex in 0..graph.num_vertices() as VertexId {
        let me = cm.philosopher(vertex);
        let mut owned = 0;
        let mut clean = 0;
        for (edge, side) in incident_edges(graph, vertex) {
            let fork = cm.fork(graph.edge_id(&edge));
            if fork.owner == side {
                owned += 1;
                if !fork.dirty {
                    clean += 1;
                }
            }
        }
        if owned != me.forks_acquired {
            return Err(RingError::ForkCountMismatch {
                vertex,
                counted: me.forks_acquired,
                owned,
            });
        }

        match me.state {
            PhilosopherState::Thinking => {
                if clean > 0 {
                    return Err(RingError::CleanForkWhileThinking { vertex, clean });
                }
            }
            PhilosopherState::Hungry => {
                if me.is_satisfied() {
                    return Err(RingError::HungryButSatisfied { vertex });
                }
                for (edge, side) in incident_edges(graph, vertex) {
                    let id = graph.edge_id(&edge);
                    let fork = cm.fork(id);
                    if fork.owner == side {
                        continue;
                    }
                    let neighbor = side.other().of(&edge);
                    let holder = cm.philosopher(neighbor).state;
                    let idle = holder == PhilosopherState::Thinking
                        || (holder == PhilosopherState::Hungry && fork.dirty);
                    if idle {
                        return Err(RingError::StarvedByIdleNeighbor {
                            vertex,
                            neighbor,
                            edge: id,
                        });
                    }
                }
            }
            PhilosopherState::Eating => {
                if !me.is_satisfied() {
                    return Err(RingError::EatingWithoutForks {
                        vertex,
                        held: me.forks_acquired,
                        needed: me.num_edges,
                    });
                }
                for (edge, side) in incident_edges(graph, vertex) {
                    let neighbor = side.other().of(&edge);
                    if cm.philosopher(neighbor).state == PhilosopherState::Eating {
                        return Err(RingError::AdjacentEaters(vertex, neighbor));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Checks the table is at rest: every fork dirty, every philosopher
/// thinking.
pub fn no_locks_consistency_check<P>(cm: &P) -> Result<(), RingError>
where
    P: ExclusionProtocol + ?Sized,
{
    let graph = cm.graph();
    for edge in 0..graph.num_edges() {
        if !cm.fork(edge).dirty {
            return Err(RingError::ForkNotDirty(edge));
        }
    }
    for vertex in 0..graph.num_vertices() as VertexId {
        if cm.philosopher(vertex).state != PhilosopherState::Thinking {
            return Err(RingError::PhilosopherNotThinking(vertex));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        exclusion::{ChandyMisra, ForkState, Owner},
        graph::LocalGraph,
    };

    fn pair() -> ChandyMisra<LocalGraph> {
        ChandyMisra::new(Arc::new(LocalGraph::from_edges(2, &[(0, 1)]).unwrap()))
    }

    #[test]
    fn test_fresh_table_passes_both() {
        let cm = ChandyMisra::new(Arc::new(LocalGraph::ring(6).unwrap()));
        complete_consistency_check(&cm).unwrap();
        no_locks_consistency_check(&cm).unwrap();
    }

    #[test]
    fn test_eating_vertex_is_not_at_rest() {
        let cm = pair();
        assert_eq!(cm.make_hungry(0), Some(0));
        complete_consistency_check(&cm).unwrap();
        assert_eq!(
            no_locks_consistency_check(&cm),
            Err(RingError::PhilosopherNotThinking(0))
        );
    }

    #[test]
    fn test_clean_fork_is_not_at_rest() {
        let cm = pair();
        // 1 steals the dirty fork from a thinking 0 and eats
        assert_eq!(cm.make_hungry(1), Some(1));
        assert_eq!(cm.fork(0).owner, Owner::Target);
        assert_eq!(no_locks_consistency_check(&cm), Err(RingError::ForkNotDirty(0)));
        assert!(cm.stops_eating(1).is_empty());
        no_locks_consistency_check(&cm).unwrap();
    }

    #[test]
    fn test_detects_miscounted_fork() {
        let cm = pair();
        cm.forks.store(0, ForkState::new(Owner::Target));
        assert_eq!(
            complete_consistency_check(&cm),
            Err(RingError::ForkCountMismatch {
                vertex: 0,
                counted: 1,
                owned: 0
            })
        );
    }

    #[test]
    fn test_detects_clean_fork_while_thinking() {
        let cm = pair();
        let mut fork = ForkState::new(Owner::Source);
        fork.dirty = false;
        cm.forks.store(0, fork);
        assert_eq!(
            complete_consistency_check(&cm),
            Err(RingError::CleanForkWhileThinking { vertex: 0, clean: 1 })
        );
    }
}
