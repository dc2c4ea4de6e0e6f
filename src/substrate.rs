//! The per-process context: one exclusion engine over the local graph plus
//! one quiescence detector, rebuilt together between runs.
use std::sync::Arc;

use tracing::debug;

use crate::{
    config::{ExclusionVariant, SubstrateConfig},
    consensus::{ActivityLedger, AsyncConsensus, RingTransport},
    exclusion::{ChandyMisra, ChandyMisraLockFree, ExclusionProtocol},
    graph::GraphTopology,
    RingError,
};

pub struct Substrate<G, T, L>
where
    G: GraphTopology + 'static,
    T: RingTransport,
    L: ActivityLedger,
{
    config: SubstrateConfig,
    exclusion: Box<dyn ExclusionProtocol<Graph = G>>,
    consensus: AsyncConsensus<T, L>,
}

impl<G, T, L> Substrate<G, T, L>
where
    G: GraphTopology + 'static,
    T: RingTransport,
    L: ActivityLedger,
{
    pub fn new(config: SubstrateConfig, graph: Arc<G>, transport: T, ledger: L) -> Result<Self, RingError> {
        config.validate()?;
        let exclusion: Box<dyn ExclusionProtocol<Graph = G>> = match config.exclusion {
            ExclusionVariant::Locking => Box::new(ChandyMisra::new(graph)),
            ExclusionVariant::LockFree => Box::new(ChandyMisraLockFree::new(graph)),
        };
        let consensus = AsyncConsensus::new(transport, ledger, config.workers)?;
        debug!(
            "{}: substrate up, {} workers, {} exclusion",
            consensus.rank(),
            config.workers,
            config.exclusion
        );
        Ok(Self {
            config,
            exclusion,
            consensus,
        })
    }

    pub fn config(&self) -> &SubstrateConfig {
        &self.config
    }

    pub fn exclusion(&self) -> &dyn ExclusionProtocol<Graph = G> {
        self.exclusion.as_ref()
    }

    pub fn consensus(&self) -> &AsyncConsensus<T, L> {
        &self.consensus
    }

    /// Puts both protocols back to their initial state for a new run.
    pub fn reset(&mut self) {
        self.exclusion.compute_initial_fork_arrangement();
        self.consensus.reset();
    }
}
