//! Storage for the self-extension pipeline.
//!
//! - an append-only lifecycle event ledger, hash-chained with blake3
//! - the single promotion-control record (pause switch)
//!
//! Design stance:
//! - The ledger exposes no update or delete path. A new lifecycle state is
//!   always a new row under the same run id.
//! - Appends normalize their input instead of rejecting it; the only
//!   failure is the underlying write.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod chain;
mod error;
pub mod memory;
mod normalize;
#[cfg(feature = "sqlite")]
pub mod sqlite;
mod traits;

pub use chain::verify_chain;
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStore;
pub use normalize::{DEFAULT_ACTOR, UNKNOWN_RUN_ID};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use traits::{LifecycleLedger, PromotionControlStore, QueryWindow, SelfExtensionStorage};
