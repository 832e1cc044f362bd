//! # selfext-pipeline
//!
//! Orchestrates one self-extension attempt end to end and exposes the
//! operator's view of it.
//!
//! ```text
//!  ChangeProposal ──► stage_change ──► StagingDeployer ──► tested | failed
//!                                                              │
//!  status contexts ──► promote ──► gate + pause ──► promoted | promotion_blocked
//!                                                              │
//!  health verdict ──► record_health_window ──► baseline | rollback run
//! ```
//!
//! Every transition is appended to the lifecycle ledger under the run's id.
//! Ledger write failures are returned to the caller; they never undo the
//! action already taken.

#![deny(unsafe_code)]

pub mod builder;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod status;

pub use builder::SelfExtensionPipelineBuilder;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{PromotionReport, SelfExtensionPipeline, StageReport};
pub use registry::{ToolEntry, ToolRegistry};
pub use status::OperatorStatus;
