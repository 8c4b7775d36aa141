//! Facade crate re-exporting every member of the settlement workspace, for
//! callers that want the whole engine behind one dependency rather than
//! picking individual crates.

pub use settlement_api as api;
pub use settlement_concurrency as concurrency;
pub use settlement_core as core;
pub use settlement_durability as durability;
pub use settlement_engine as engine;
pub use settlement_executor as executor;
pub use settlement_storage as storage;
pub use settlement_wire as wire;
