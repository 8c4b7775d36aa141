//! Primitive identifiers shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte cryptographic digest identifying one unspent output.
///
/// The set of all `UhsId`s is partitioned across shards by the first byte
/// (an inclusive prefix range per shard, see [`ShardRange`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UhsId(pub [u8; 32]);

impl UhsId {
    /// Construct from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        UhsId(bytes)
    }

    /// First byte of the digest, used for shard assignment.
    pub fn prefix(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Debug for UhsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UhsId({})", hex_prefix(&self.0))
    }
}

impl fmt::Display for UhsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

fn hex_prefix(bytes: &[u8; 32]) -> String {
    bytes[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

/// 32-byte identifier for a compact transaction or distributed transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    /// Construct from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        TxId(bytes)
    }

    /// Generate a fresh random id, used by the coordinator to name a dtx.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        TxId(bytes)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", hex_prefix(&self.0))
    }
}

/// An inclusive `[low, high]` range over the first byte of a `UhsId`,
/// identifying the slice of the keyspace one shard cluster owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRange {
    /// Inclusive lower bound of the first byte.
    pub low: u8,
    /// Inclusive upper bound of the first byte.
    pub high: u8,
}

impl ShardRange {
    /// Whether `id` falls within this shard's range.
    pub fn contains(&self, id: &UhsId) -> bool {
        let p = id.prefix();
        p >= self.low && p <= self.high
    }
}

/// A public key identifying a sentinel authorized to attest CTXs.
pub type SentinelKey = [u8; 32];

/// A single (public key, signature) attestation over a CTX id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    /// Sentinel public key.
    pub key: SentinelKey,
    /// Signature over the CTX id, opaque to the core.
    pub signature: Vec<u8>,
}

/// Monotone epoch counter, set when a block of dtxs is applied; used for
/// audit and pruning.
pub type Epoch = u64;

/// Opaque key used by the runtime locking shard. Keys are caller-defined
/// byte buffers with no structure the core interprets.
pub type RuntimeKey = Vec<u8>;

/// Opaque value stored for a [`RuntimeKey`].
pub type RuntimeValue = Vec<u8>;

/// Monotone ticket number assigned by the external ticket machine. The
/// core only consumes the supply; it never allocates numbers itself.
pub type TicketNumber = u64;

/// Identifies the broker that owns a ticket, for recovery queries.
pub type BrokerId = u64;
