//! Shard-local UHS element and the audit summary built from it.

use crate::types::Epoch;
use serde::{Deserialize, Serialize};

/// A single entry in a shard's unspent-hash-set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UhsElement {
    /// Epoch in which this output was created.
    pub creation_epoch: Epoch,
    /// Epoch in which this output was deleted, if it has been spent.
    /// Invariant: absent iff the output is unspent.
    pub deletion_epoch: Option<Epoch>,
    /// Opaque value commitment, carried through for audit.
    pub value_commitment: Vec<u8>,
    /// Nested hash used to recompute and verify the element's identifier.
    pub nested_hash: [u8; 32],
}

impl UhsElement {
    /// Whether this element is visible (unspent) at `epoch`.
    pub fn visible_at(&self, epoch: Epoch) -> bool {
        self.creation_epoch <= epoch
            && self.deletion_epoch.map(|d| d > epoch).unwrap_or(true)
    }

    /// Whether this element is currently unspent.
    pub fn is_unspent(&self) -> bool {
        self.deletion_epoch.is_none()
    }
}

/// Result of an audit pass over a shard at a given epoch: either the total
/// value visible at that epoch, or a failure naming the mismatched id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditResult {
    /// Audit succeeded; carries the summed value commitments (opaque total,
    /// produced by the batched range-proof verifier collaborator).
    Total(u128),
    /// An entry's id did not match its recomputed identifier.
    Mismatch {
        /// Hex-encoded id of the offending entry.
        id: String,
    },
}

/// A settled block: the set of dtx ids an epoch applied. Kept as a pure
/// read-side audit/export artifact, not required for settlement itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettledBlock {
    /// The epoch this block represents.
    pub epoch: Epoch,
    /// dtx ids settled at this epoch, in application order.
    pub dtx_ids: Vec<crate::types::TxId>,
}
