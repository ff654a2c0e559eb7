//! Durable stage-completion ledger for meshledger.
//!
//! - [`schema`]: the fixed column contract
//! - [`store`]: self-healing CSV storage with atomic whole-file writes
//! - [`gate`]: per-item stage lifecycle (`should_run`, `start`, `complete`, `fail`)
//! - [`lock`]: cross-process single-writer lock

pub mod gate;
pub mod lock;
pub mod record;
pub mod schema;
pub mod store;

pub use gate::StageGate;
pub use lock::{LedgerLock, LockMetadata};
pub use record::Record;
pub use schema::{Schema, SCHEMA_VERSION};
pub use store::{Anomaly, LedgerStore, LoadReport};
