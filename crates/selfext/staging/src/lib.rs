//! # selfext-staging
//!
//! Stages one candidate change on an isolated, provenance-tagged branch and
//! either fast-forwards it into the original branch or abandons it.
//!
//! ```text
//! original ──► precondition ──► branch ──► commit ──► compile ──► sandbox
//!    ▲                                                    │          │
//!    │             ff-only merge + delete branch ◄── pass ┘          │
//!    └──────────── checkout original + force delete ◄── fail ────────┘
//! ```
//!
//! The repository is back on its original branch when [`StagingDeployer::stage`]
//! returns, whatever the outcome, and the staging branch is gone.

#![deny(unsafe_code)]

pub mod deployer;
pub mod error;
pub mod git;
pub mod outcome;

pub use deployer::StagingDeployer;
pub use error::{StagingError, StagingResult};
pub use git::{GitRepository, StatusEntry};
pub use outcome::{StageFailure, StageOutcome};
