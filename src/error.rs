use thiserror::Error;

use crate::{consensus::Rank, graph::{EdgeId, VertexId}};

/// Error type for everything around the protocols. The protocol operations
/// themselves never fail; these cover construction, checking and transport.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("edge {edge} is a self loop on vertex {vertex}")]
    SelfLoop { vertex: VertexId, edge: EdgeId },
    #[error("vertex {vertex} out of range, graph has {num_vertices} vertices")]
    VertexOutOfRange {
        vertex: VertexId,
        num_vertices: usize,
    },
    #[error("at least one worker must take part in consensus")]
    NoWorkers,
    #[error("rank {rank} out of range for a ring of {num_processes} processes")]
    RankOutOfRange { rank: Rank, num_processes: Rank },
    #[error("vertex {vertex} counts {counted} forks but owns {owned}")]
    ForkCountMismatch {
        vertex: VertexId,
        counted: u32,
        owned: u32,
    },
    #[error("thinking vertex {vertex} holds {clean} clean forks")]
    CleanForkWhileThinking { vertex: VertexId, clean: u32 },
    #[error("hungry vertex {vertex} already holds all of its forks")]
    HungryButSatisfied { vertex: VertexId },
    #[error("hungry vertex {vertex} waits on fork {edge} held by idle neighbor {neighbor}")]
    StarvedByIdleNeighbor {
        vertex: VertexId,
        neighbor: VertexId,
        edge: EdgeId,
    },
    #[error("eating vertex {vertex} holds {held} of {needed} forks")]
    EatingWithoutForks {
        vertex: VertexId,
        held: u32,
        needed: u32,
    },
    #[error("adjacent vertices {0} and {1} are both eating")]
    AdjacentEaters(VertexId, VertexId),
    #[error("fork {0} is clean at quiescence")]
    ForkNotDirty(EdgeId),
    #[error("vertex {0} is not thinking at quiescence")]
    PhilosopherNotThinking(VertexId),
    #[error("malformed control frame: {reason}")]
    MalformedFrame { reason: String },
    #[error("process {rank} is no longer reachable")]
    Disconnected { rank: Rank },
    #[error("inbox for process {rank} was already taken")]
    InboxTaken { rank: Rank },
}
