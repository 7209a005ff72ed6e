//! `dep-checkr`: reconstruct the dependency graph of every package manager
//! in a project and report each package with its license and edges.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]) and install logging ([`logging`]).
//! 2. Load config ([`config::load_config`]); CLI flags override it.
//! 3. Detect ecosystems ([`detector::detect_ecosystems`]) unless `-m` names them.
//! 4. Analyze each ecosystem in turn ([`analyzer`]); a failure is recorded
//!    and the scan moves on.
//! 5. Optionally write the purl graph as DOT ([`graph::export`]).
//! 6. Render the requested report ([`report`]).
//! 7. Exit `1` when nothing was detected or every ecosystem failed.

mod analyzer;
mod cli;
mod config;
mod detector;
mod error;
mod graph;
mod license;
mod logging;
mod models;
mod parser;
mod report;
mod runner;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::{info, warn};

use analyzer::{analyzer_for, ScanContext};
use cli::{Cli, ReportFormat};
use config::load_config;
use detector::detect_ecosystems;
use graph::export::DependencyGraph;
use models::Ecosystem;
use report::EcosystemReport;
use runner::ToolRunner;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.log_level, cli.verbose)?;

    // Resolve project path
    let path = cli
        .path
        .canonicalize()
        .unwrap_or_else(|_| cli.path.clone());

    let mut config = load_config(&path, cli.config.as_deref())?;
    if let Some(secs) = cli.timeout {
        config.scan.timeout_secs = secs;
    }
    if cli.no_direct {
        config.scan.direct = false;
    }

    let excluded: Vec<Ecosystem> = cli.exclude.iter().map(Into::into).collect();

    // Explicit managers skip detection and are analyzed in PATH itself
    let (root, ecosystems) = if cli.managers.is_empty() {
        match detect_ecosystems(&path, &config.scan.exclude_dirs, &config.gradle.android_app) {
            Some(detection) => (detection.root, detection.ecosystems),
            None => (path.clone(), Vec::new()),
        }
    } else {
        let mut chosen: Vec<Ecosystem> = Vec::new();
        for eco in cli.managers.iter().map(Ecosystem::from) {
            if !chosen.contains(&eco) {
                chosen.push(eco);
            }
        }
        (path.clone(), chosen)
    };
    let ecosystems: Vec<Ecosystem> = ecosystems
        .into_iter()
        .filter(|e| !excluded.contains(e))
        .collect();

    if ecosystems.is_empty() {
        eprintln!(
            "No supported package manager manifests found in {}",
            path.display()
        );
        std::process::exit(1);
    }
    info!(root = %root.display(), ?ecosystems, "starting scan");

    let ctx = ScanContext {
        runner: ToolRunner::new(config.scan.timeout(), cli.quiet),
        classify: config.scan.direct,
        root,
        config,
    };

    // Analyze each ecosystem; one failure never aborts the others
    let mut reports = Vec::with_capacity(ecosystems.len());
    for analyzer in ecosystems.into_iter().map(analyzer_for) {
        let ecosystem = analyzer.ecosystem();
        let report = match analyzer.analyze(&ctx).await {
            Ok(items) => {
                if !cli.quiet {
                    eprintln!(
                        "  {} {} {} dependencies",
                        "→".cyan(),
                        ecosystem,
                        items.len()
                    );
                }
                EcosystemReport::succeeded(ecosystem, items)
            }
            Err(e) => {
                warn!(%ecosystem, error = %e, "analysis failed");
                if !cli.quiet {
                    eprintln!("  {} {} {}", "✗".red(), ecosystem, e);
                }
                EcosystemReport::failed(ecosystem, e)
            }
        };
        reports.push(report);
    }

    if let Some(graph_path) = &cli.graph {
        let graph = DependencyGraph::from_items(reports.iter().flat_map(|r| r.items.iter()));
        graph.write_dot(graph_path)?;
        if !cli.quiet {
            eprintln!(
                "  {} graph {} nodes {} edges → {}",
                "→".cyan(),
                graph.node_count(),
                graph.edge_count(),
                graph_path.display()
            );
        }
    }

    // Files never get ANSI escapes
    if cli.output.is_some() {
        colored::control::set_override(false);
    }

    let content = match cli.report {
        ReportFormat::Terminal => report::terminal::render(&reports, &ctx.root, cli.verbose, cli.quiet),
        ReportFormat::Json => report::render_json(&reports)?,
    };
    report::emit(&content, cli.output.as_deref())?;

    if reports.iter().all(|r| r.error.is_some()) {
        std::process::exit(1);
    }

    Ok(())
}
