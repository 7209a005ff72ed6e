use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use super::EcosystemReport;
use crate::models::{Classification, DependencyItem};

/// Render the terminal report.
///
/// Quiet mode prints one summary line. Otherwise a summary box is followed
/// by a table of root and direct packages, or of every row with `verbose`.
pub fn render(reports: &[EcosystemReport], path: &Path, verbose: bool, quiet: bool) -> String {
    let mut out = String::new();
    let total: usize = reports.iter().map(|r| r.items.len()).sum();
    let failed = reports.iter().filter(|r| r.error.is_some()).count();

    if quiet {
        let _ = writeln!(
            out,
            "Packages: {}  Ecosystems: {}  Failed: {}",
            total,
            (reports.len() - failed).to_string().green(),
            failed.to_string().red(),
        );
        return out;
    }

    let _ = writeln!(out, "\n {} v{}", "dep-checkr".bold(), env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out, " Scanned: {}\n", path.display());

    let _ = writeln!(out, " ┌────────────────────────────────────────────────────────────┐");
    let _ = writeln!(out, " │  {:<56} │", "SUMMARY".bold());
    let _ = writeln!(out, " │  {:<56} │", format!("Total packages : {total}"));
    for report in reports {
        let line = match &report.error {
            Some(_) => format!("{}  {:<10} failed", "✗".red(), report.ecosystem.as_str()),
            None => format!(
                "{}  {:<10} {:>4} packages  {:>3} direct  {:>4} edges  {}",
                "✓".green(),
                report.ecosystem.as_str(),
                report.items.len(),
                report.count(Classification::Direct),
                report.edge_count(),
                top_licenses(&report.items),
            ),
        };
        let _ = writeln!(out, " │  {:<56} │", line);
    }
    let _ = writeln!(out, " └────────────────────────────────────────────────────────────┘\n");

    for report in reports {
        if let Some(error) = &report.error {
            let _ = writeln!(out, " {} {}: {}", "[FAILED]".red().bold(), report.ecosystem, error);
        }
    }
    if failed > 0 {
        out.push('\n');
    }

    let shown: Vec<&DependencyItem> = reports
        .iter()
        .flat_map(|r| r.items.iter())
        .filter(|i| {
            verbose
                || matches!(
                    i.classification,
                    None | Some(Classification::Root) | Some(Classification::Direct)
                )
        })
        .collect();
    if !shown.is_empty() {
        let heading = if verbose { "All packages:" } else { "Direct packages:" };
        let _ = writeln!(out, " {} {}\n", "[DEPS]".cyan().bold(), heading);
        let _ = writeln!(out, "{}", render_table(&shown));
    }

    out
}

fn render_table(items: &[&DependencyItem]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Ecosystem").add_attribute(Attribute::Bold),
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Version").add_attribute(Attribute::Bold),
            Cell::new("License").add_attribute(Attribute::Bold),
            Cell::new("Comment").add_attribute(Attribute::Bold),
            Cell::new("Deps").add_attribute(Attribute::Bold),
        ]);

    for item in items {
        let tag_color = match item.classification {
            Some(Classification::Root) => Color::Cyan,
            Some(Classification::Local) => Color::Magenta,
            Some(Classification::Direct) => Color::Green,
            Some(Classification::Transitive) | None => Color::Reset,
        };
        for row in item.rows() {
            let license = if row.license.is_empty() {
                Cell::new("unknown").fg(Color::DarkGrey)
            } else {
                Cell::new(&row.license)
            };
            let name = if row.exclude {
                Cell::new(format!("{} (excluded)", row.name)).fg(Color::DarkGrey)
            } else {
                Cell::new(&row.name)
            };
            table.add_row(vec![
                Cell::new(item.ecosystem.to_string()),
                name,
                Cell::new(&row.version),
                license,
                Cell::new(&row.comment).fg(tag_color),
                Cell::new(row.depends_on.len()).set_alignment(CellAlignment::Right),
            ]);
        }
    }

    table
}

fn top_licenses(items: &[DependencyItem]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for oss in items.iter().flat_map(|i| i.oss_items.iter()) {
        let lic = if oss.license.is_empty() { "unknown" } else { oss.license.as_str() };
        *counts.entry(lic).or_insert(0) += 1;
    }

    let mut pairs: Vec<(&str, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let summary: Vec<String> = pairs
        .iter()
        .take(2)
        .map(|(lic, cnt)| format!("{lic} ({cnt})"))
        .collect();

    if summary.is_empty() {
        String::new()
    } else {
        format!("[{}]", summary.join(", "))
    }
}
