//! Durability mode: when a [`crate::log::ReplicatedLog`] fsyncs its segment.

/// Controls when a replicated log's active segment is fsynced.
///
/// Orthogonal to replication: even `Cache` mode still replicates `propose`
/// calls to the in-memory state machine and returns the applied result,
/// it just accepts a wider crash-data-loss window in exchange for speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// Never fsync. Fast, loses everything proposed since the last clean
    /// shutdown on crash. Useful for tests and ephemeral shards.
    Cache,
    /// fsync after every `propose`. Maximum durability, highest latency.
    Always,
    /// fsync every `batch_size` proposals or every `interval_ms`,
    /// whichever comes first.
    Standard {
        /// Maximum time between fsyncs, in milliseconds.
        interval_ms: u64,
        /// Maximum proposals accepted between fsyncs.
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Recommended default: fsync at least every 100ms or 1000 proposals.
    pub fn standard_default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 100,
            batch_size: 1000,
        }
    }

    /// Whether this mode ever defers an fsync past the triggering write.
    pub fn is_batched(&self) -> bool {
        matches!(self, DurabilityMode::Standard { .. })
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::standard_default()
    }
}
