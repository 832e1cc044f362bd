//! # selfext-compiler
//!
//! Turns candidate tool source into a directly executable module.
//!
//! The [`Compiler`] trait is the seam the staging deployer uses. Failures are
//! reported as one [`CompilationError`] carrying *every* diagnostic line, not
//! just the first. No implementation here touches the filesystem: source goes
//! in over a pipe and the module comes back in memory.
//!
//! ## Implementations
//!
//! - [`CommandCompiler`]: pipes source through an external tool
//!   (`sh -n` syntax check, `esbuild` for TypeScript, or anything similar)
//! - [`PassthroughCompiler`]: trusted, already-executable source
//! - [`SimulatedCompiler`]: configurable results for tests

#![deny(unsafe_code)]

pub mod command;
pub mod compiler;
pub mod error;
pub mod simulated;

pub use command::{CommandCompiler, CompilerOutput};
pub use compiler::{CompiledModule, Compiler};
pub use error::CompilationError;
pub use simulated::{PassthroughCompiler, SimulatedCompiler};
