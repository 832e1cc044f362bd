//! # selfext-provenance
//!
//! Provenance tagging for self-extension attempts.
//!
//! Two pure, deterministic derivations from an [`ExecutionContext`]:
//!
//! - [`build_branch_name`]: the staging branch
//!   `jarvis/self-extension/<tool>/g<goal>-c<cycle>-s<subgoal>-<fingerprint>`,
//!   where the fingerprint is keyed on `(tool, file, content hash)` so that a
//!   re-attempt of identical content lands on the identical branch.
//! - [`build_commit_metadata`]: a key-sorted JSON envelope embedded in the
//!   staging commit, byte-stable so it can be re-derived and compared later.
//!
//! [`ExecutionContext`]: selfext_types::ExecutionContext

#![deny(unsafe_code)]

pub mod branch;
pub mod canonical;
pub mod error;
pub mod metadata;
pub mod slug;

pub use branch::{build_branch_name, content_hash, fingerprint, BranchName, BRANCH_PREFIX};
pub use canonical::canonical_json;
pub use error::{ProvenanceError, ProvenanceResult};
pub use metadata::{
    build_commit_metadata, commit_message, parse_commit_metadata, CommitMetadata,
    METADATA_TRAILER, SCHEMA_VERSION,
};
pub use slug::{slugify, TOKEN_MAX_LEN};
