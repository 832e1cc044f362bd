//! # selfext-sandbox
//!
//! Runs a compiled candidate tool in a dedicated child process with a hard
//! timeout and reports a [`SandboxResult`](selfext_types::SandboxResult).
//!
//! ```text
//! ┌───────────────┐  spawn   ┌──────────────────────────────┐
//! │ ProcessSandbox│ ───────► │ harness (own process group)  │
//! │               │          │   loads module, calls        │
//! │   Settlement  │ ◄─────── │   execute(input, signal)     │
//! │   ▲       ▲   │  1 line  └──────────────────────────────┘
//! │ worker  timer │
//! └───────────────┘
//! ```
//!
//! The worker (child reported or exited) and the timer race for a single
//! [`Settlement`]. Whoever loses is dropped; the process group is killed
//! and both scratch files are removed on every path.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod harness;
pub mod process;
pub mod sandbox;
pub mod settle;
pub mod simulated;

pub use config::{SandboxConfig, SandboxRuntime, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_MS};
pub use error::SandboxError;
pub use process::ProcessSandbox;
pub use sandbox::Sandbox;
pub use settle::Settlement;
pub use simulated::{SimulatedRun, SimulatedSandbox};
