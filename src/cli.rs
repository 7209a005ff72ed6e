use std::path::PathBuf;

use clap::Parser;

use crate::logging::LogLevel;
use crate::models::Ecosystem;

#[derive(Parser, Debug)]
#[command(
    name = "dep-checkr",
    about = "Reconstruct dependency graphs of a project and report every package",
    version
)]
pub struct Cli {
    /// Project path to scan
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Package manager to analyze (repeatable); skips auto-detection
    #[arg(short = 'm', long = "manager", value_name = "MANAGER")]
    pub managers: Vec<EcosystemArg>,

    /// Exclude a package manager from scanning (repeatable)
    #[arg(long, value_name = "MANAGER")]
    pub exclude: Vec<EcosystemArg>,

    /// Config file [default: ./.dep-checkr/config.toml, fallback ~/.config/dep-checkr/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Report format
    #[arg(long, default_value = "terminal", value_name = "FORMAT")]
    pub report: ReportFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write the dependency graph as Graphviz DOT
    #[arg(long, value_name = "FILE")]
    pub graph: Option<PathBuf>,

    /// Skip classification and `depends_on` resolution
    #[arg(long)]
    pub no_direct: bool,

    /// Timeout in seconds for each external tool
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Diagnostic log level (`RUST_LOG` overrides)
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    pub log_level: LogLevel,

    /// Show every row in the terminal report and debug logs
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print the summary
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Terminal,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EcosystemArg {
    Npm,
    Yarn,
    Pnpm,
    Pypi,
    Maven,
    Gradle,
    Android,
    Go,
    Cargo,
    Nuget,
    Cocoapods,
    Swift,
    Carthage,
    Pub,
    Helm,
    Unity,
}

impl From<&EcosystemArg> for Ecosystem {
    fn from(arg: &EcosystemArg) -> Self {
        match arg {
            EcosystemArg::Npm => Ecosystem::Npm,
            EcosystemArg::Yarn => Ecosystem::Yarn,
            EcosystemArg::Pnpm => Ecosystem::Pnpm,
            EcosystemArg::Pypi => Ecosystem::Pypi,
            EcosystemArg::Maven => Ecosystem::Maven,
            EcosystemArg::Gradle => Ecosystem::Gradle,
            EcosystemArg::Android => Ecosystem::Android,
            EcosystemArg::Go => Ecosystem::Go,
            EcosystemArg::Cargo => Ecosystem::Cargo,
            EcosystemArg::Nuget => Ecosystem::Nuget,
            EcosystemArg::Cocoapods => Ecosystem::Cocoapods,
            EcosystemArg::Swift => Ecosystem::Swift,
            EcosystemArg::Carthage => Ecosystem::Carthage,
            EcosystemArg::Pub => Ecosystem::Pub,
            EcosystemArg::Helm => Ecosystem::Helm,
            EcosystemArg::Unity => Ecosystem::Unity,
        }
    }
}
