use std::fmt::Display;

use typed_builder::TypedBuilder;

use crate::RingError;

/// Which Chandy-Misra engine guards the edges.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ExclusionVariant {
    /// Per-vertex mutexes, taken pairwise in vertex id order.
    #[default]
    Locking,
    /// Compare-and-swap on packed fork and philosopher words.
    LockFree,
}

impl Display for ExclusionVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExclusionVariant::Locking => write!(f, "locking"),
            ExclusionVariant::LockFree => write!(f, "lock-free"),
        }
    }
}

/// Per-process settings for a `Substrate`.
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
pub struct SubstrateConfig {
    /// Worker threads that take part in quiescence detection.
    #[builder(default = 1)]
    pub workers: usize,
    #[builder(default)]
    pub exclusion: ExclusionVariant,
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SubstrateConfig {
    pub fn validate(&self) -> Result<(), RingError> {
        if self.workers == 0 {
            return Err(RingError::NoWorkers);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SubstrateConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.exclusion, ExclusionVariant::Locking);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_validation() {
        let config = SubstrateConfig::builder()
            .workers(4)
            .exclusion(ExclusionVariant::LockFree)
            .build();
        assert_eq!(config.exclusion.to_string(), "lock-free");
        assert!(config.validate().is_ok());

        let idle = SubstrateConfig::builder().workers(0).build();
        assert_eq!(idle.validate(), Err(RingError::NoWorkers));
    }
}
