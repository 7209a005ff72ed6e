//! Parsers that rebuild a [`RelationTree`](crate::graph::RelationTree) from
//! tool output or lock files.
//!
//! - [`branch_tree`]: indented `+---` / `\---` trees (maven, gradle).
//! - [`edge_list`]: one `parent child` pair per line (`go mod graph`).
//! - [`json_tree`]: nested JSON trees (npm, pnpm, pipdeptree, swift, cargo).
//! - [`manifest`]: lock files and manifests read directly.

pub mod branch_tree;
pub mod edge_list;
pub mod json_tree;
pub mod manifest;
