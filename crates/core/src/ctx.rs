//! Compact transaction (CTX): the client-submitted unit of settlement.

use crate::error::AdmissionError;
use crate::types::{Attestation, SentinelKey, TxId, UhsId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A newly created output: a fresh `UhsId` plus the opaque value data the
/// core never interprets but must carry through to storage and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtxOutput {
    /// The output's identifying hash.
    pub id: UhsId,
    /// Opaque value commitment (e.g. a Pedersen commitment), unverified here.
    pub value_commitment: Vec<u8>,
    /// Optional opaque range proof, unverified here.
    pub range_proof: Option<Vec<u8>>,
}

/// Compact transaction: hashes of inputs and outputs plus attestations.
///
/// Invariants (checked by [`Ctx::validate`]):
/// - `inputs` are pairwise distinct.
/// - `id` does not equal any input or output id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ctx {
    /// Digest over the canonical inputs and outputs.
    pub id: TxId,
    /// Ordered sequence of UHS ids being spent.
    pub inputs: Vec<UhsId>,
    /// Ordered sequence of newly created outputs.
    pub outputs: Vec<CtxOutput>,
    /// Sentinel attestations authorizing admission.
    pub attestations: Vec<Attestation>,
}

impl Ctx {
    /// Check the structural invariants named in the data model. Does not
    /// check attestation validity — that is [`Ctx::check_attestations`].
    pub fn validate(&self) -> Result<(), AdmissionError> {
        let mut seen = HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if !seen.insert(*input) {
                return Err(AdmissionError::Malformed(
                    "duplicate input in ctx".into(),
                ));
            }
            if input.0 == self.id.0 {
                return Err(AdmissionError::Malformed(
                    "ctx id aliases one of its own inputs".into(),
                ));
            }
        }
        for output in &self.outputs {
            if output.id.0 == self.id.0 {
                return Err(AdmissionError::Malformed(
                    "ctx id aliases one of its own outputs".into(),
                ));
            }
        }
        Ok(())
    }

    /// Verify attestations meet the configured threshold against the
    /// admissible sentinel key set. Signature verification itself is an
    /// external collaborator reached through `verify_fn`; the core only
    /// enforces the counting and key-membership rules.
    pub fn check_attestations(
        &self,
        sentinel_keys: &HashSet<SentinelKey>,
        threshold: usize,
        verify_fn: impl Fn(&Attestation, &TxId) -> bool,
    ) -> Result<(), AdmissionError> {
        let mut valid = 0usize;
        let mut seen_keys = HashSet::new();
        for att in &self.attestations {
            if !sentinel_keys.contains(&att.key) {
                continue;
            }
            if !seen_keys.insert(att.key) {
                continue; // no double counting of the same sentinel.
            }
            if verify_fn(att, &self.id) {
                valid += 1;
            }
        }
        if valid < threshold {
            return Err(AdmissionError::InsufficientAttestations {
                got: valid,
                need: threshold,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: [u8; 32], inputs: Vec<[u8; 32]>) -> Ctx {
        Ctx {
            id: TxId::new(id),
            inputs: inputs.into_iter().map(UhsId::new).collect(),
            outputs: vec![],
            attestations: vec![],
        }
    }

    #[test]
    fn rejects_duplicate_inputs() {
        let c = ctx([1; 32], vec![[2; 32], [2; 32]]);
        assert!(matches!(c.validate(), Err(AdmissionError::Malformed(_))));
    }

    #[test]
    fn rejects_id_aliasing_input() {
        let c = ctx([2; 32], vec![[2; 32]]);
        assert!(c.validate().is_err());
    }

    #[test]
    fn valid_ctx_passes() {
        let c = ctx([1; 32], vec![[2; 32], [3; 32]]);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn attestation_threshold_enforced() {
        let key_a: SentinelKey = [9; 32];
        let key_b: SentinelKey = [8; 32];
        let mut sentinel_keys = HashSet::new();
        sentinel_keys.insert(key_a);
        sentinel_keys.insert(key_b);

        let mut c = ctx([1; 32], vec![[2; 32]]);
        c.attestations.push(Attestation {
            key: key_a,
            signature: vec![],
        });

        // one attestation, threshold two -> rejected.
        assert!(c
            .check_attestations(&sentinel_keys, 2, |_, _| true)
            .is_err());

        c.attestations.push(Attestation {
            key: key_b,
            signature: vec![],
        });
        assert!(c
            .check_attestations(&sentinel_keys, 2, |_, _| true)
            .is_ok());
    }

    #[test]
    fn attestation_from_unknown_sentinel_not_counted() {
        let sentinel_keys: HashSet<SentinelKey> = [[1u8; 32]].into_iter().collect();
        let mut c = ctx([1; 32], vec![[2; 32]]);
        c.attestations.push(Attestation {
            key: [99; 32],
            signature: vec![],
        });
        assert!(c
            .check_attestations(&sentinel_keys, 1, |_, _| true)
            .is_err());
    }
}
