//! # selfext-rollback
//!
//! Reacts to health-window verdicts on promoted changes.
//!
//! - **pass**: record `health_window_passed` and move the known-good
//!   baseline to the verified commit.
//! - **fail**: record `health_window_failed`, then run a rollback as its own
//!   run (`rollback_started` → `rolled_back` | `rollback_failed`) whose
//!   correlation id points at the failed run.
//!
//! The baseline is recovered from the ledger at start-up, so a restarted
//! process rolls back to the same target.

#![deny(unsafe_code)]

pub mod baseline;
pub mod coordinator;
pub mod error;
pub mod restorer;

pub use baseline::{HealthVerdict, KnownGoodBaseline};
pub use coordinator::{HealthOutcome, RollbackCoordinator};
pub use error::{RollbackError, RollbackResult};
pub use restorer::{BaselineRestorer, GitBaselineRestorer, RestoreReport, SimulatedRestorer};
