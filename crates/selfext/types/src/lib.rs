//! # selfext-types
//!
//! Shared data model for the self-extension pipeline.
//!
//! Every crate in the pipeline speaks in these types:
//!
//! ```text
//! ChangeProposal + ExecutionContext
//!     │
//!     ▼
//! compile → sandbox (SandboxResult) → stage → gate/control → promote
//!     │                                                   │
//!     └──────────── LifecycleAppend → ledger ◄────────────┘
//! ```
//!
//! The lifecycle vocabulary is a closed enum ([`LifecycleEventType`]) so an
//! unknown event or status string can never be silently accepted.

#![deny(unsafe_code)]

pub mod context;
pub mod control;
pub mod error;
pub mod event;
pub mod proposal;
pub mod sandbox;
pub mod status;

pub use context::{ContextId, ExecutionContext};
pub use control::{PromotionControlState, PromotionControlUpdate};
pub use error::TypesError;
pub use event::{LifecycleAppend, LifecycleEvent, LifecycleEventType, LifecycleReceipt};
pub use proposal::ChangeProposal;
pub use sandbox::SandboxResult;
pub use status::StatusContext;
