//! `forkring`: the concurrency substrate of an asynchronous, distributed
//! graph engine.
//!
//! - `exclusion`: Chandy-Misra dining philosophers over graph edges, so that
//!   no two adjacent vertices run at once. Lock-based and lock-free engines.
//! - `consensus`: token-ring termination detection that lets a ring of
//!   processes agree nobody has work left.
//! - `comms`: control frame codec and an in-process network for running
//!   several ranks in one OS process.
//! - `substrate`: one engine plus one detector per process.
pub mod comms;
pub mod config;
pub mod consensus;
pub mod error;
pub mod exclusion;
pub mod graph;
pub mod substrate;

pub use config::{ExclusionVariant, SubstrateConfig};
pub use consensus::{ActivityLedger, AsyncConsensus, CallCounter, Rank, RingTransport, Token};
pub use error::RingError;
pub use exclusion::{ChandyMisra, ChandyMisraLockFree, ExclusionProtocol, PhilosopherState};
pub use graph::{Edge, EdgeId, GraphTopology, LocalGraph, VertexId};
pub use substrate::Substrate;
