//! Report renderers for scan results.
//!
//! - [`terminal`]: summary box per ecosystem plus a table of rows; respects
//!   `--verbose` / `--quiet`.
//! - [`render_json`]: the flat array of [`ReportRow`]s.

pub mod terminal;

use std::path::Path;

use anyhow::{Context, Result};

use crate::models::{Classification, DependencyItem, Ecosystem, ReportRow};

/// Outcome of one ecosystem's analysis.
#[derive(Debug)]
pub struct EcosystemReport {
    pub ecosystem: Ecosystem,
    pub items: Vec<DependencyItem>,
    /// Set when the analyzer failed; `items` is empty then.
    pub error: Option<String>,
}

impl EcosystemReport {
    pub fn succeeded(ecosystem: Ecosystem, items: Vec<DependencyItem>) -> Self {
        EcosystemReport {
            ecosystem,
            items,
            error: None,
        }
    }

    pub fn failed(ecosystem: Ecosystem, error: impl std::fmt::Display) -> Self {
        EcosystemReport {
            ecosystem,
            items: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.items
            .iter()
            .filter(|i| i.classification == Some(classification))
            .count()
    }

    pub fn edge_count(&self) -> usize {
        self.items.iter().map(|i| i.depends_on.len()).sum()
    }
}

/// Every row of every successful ecosystem, in scan order.
pub fn rows(reports: &[EcosystemReport]) -> Vec<ReportRow> {
    reports
        .iter()
        .flat_map(|r| r.items.iter())
        .flat_map(DependencyItem::rows)
        .collect()
}

pub fn render_json(reports: &[EcosystemReport]) -> Result<String> {
    serde_json::to_string_pretty(&rows(reports)).context("serializing report rows")
}

/// Write `content` to `output`, or to stdout when no file is given.
pub fn emit(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("writing report to {}", path.display())),
        None => {
            println!("{content}");
            Ok(())
        }
    }
}
