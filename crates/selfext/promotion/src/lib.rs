//! # selfext-promotion
//!
//! Decides whether a staged, tested change may be promoted.
//!
//! ```text
//! status contexts ──► evaluate() ──► PromotionGateResult ─┐
//!                                                         ├─► decide() ──► Promote
//! PromotionControl (operator pause) ──► control state ────┘               Paused { reason }
//!                                                                          Blocked { reasons }
//! ```
//!
//! The gate fails closed: a state outside the known vocabularies counts as
//! pending. A pause overrides a fully green gate.

#![deny(unsafe_code)]

pub mod control;
pub mod decision;
pub mod error;
pub mod gate;

pub use control::{PromotionControl, CONTROL_RUN_ID};
pub use decision::{decide, PromotionDecision};
pub use error::{PromotionError, PromotionResult};
pub use gate::{
    classify, evaluate, normalize_context, ContextVerdict, PromotionGateResult,
    DEFAULT_REQUIRED_CONTEXTS,
};
