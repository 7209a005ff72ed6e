//! The common graph model every ecosystem is normalized into.
//!
//! - [`key`]: `name(version)` identities with per-ecosystem normalization.
//! - [`relation`]: the adjacency table built by the parsers.
//! - [`purl`]: canonical identifiers, memoized per run.
//! - [`assembler`]: two-pass join of metadata, edges and purls.
//! - [`export`]: purl-level directed graph written as DOT.

pub mod assembler;
pub mod export;
pub mod key;
pub mod purl;
pub mod relation;

pub use assembler::{assemble, PackageEntry};
pub use key::PackageKey;
pub use relation::RelationTree;
