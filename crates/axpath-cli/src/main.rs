//! axpath CLI
//!
//! Parse, lint, resolve and generate element paths. Resolution runs against a
//! JSON tree snapshot, so the tool works without accessibility permissions.
//!
//! Usage:
//!   axpath parse 'macos://ui/AXApplication[@bundleIdentifier="com.apple.calculator"]/AXWindow'
//!   axpath validate --strict 'macos://ui/AXApplication[@title="Calculator"]/AXGroup'
//!   axpath resolve --snapshot desktop.json --trace '<path>'
//!   axpath paths --snapshot desktop.json --bundle-id com.apple.calculator --depth 4

use anyhow::{Context, Result};
use axpath::{AccessibilityProvider, EngineConfig, PathEngine, Scope, SnapshotProvider};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "axpath")]
#[command(about = "Element paths for the desktop accessibility tree")]
struct Cli {
    /// Engine configuration file (JSON)
    #[clap(long, global = true, env = "AXPATH_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[clap(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a path and print its structure as JSON
    Parse { path: String },
    /// Check a path for syntax errors and fragile constructs
    Validate {
        path: String,
        /// Treat every warning as an error
        #[clap(long)]
        strict: bool,
    },
    /// Resolve a path against a tree snapshot
    Resolve {
        path: String,
        /// Snapshot file (JSON)
        #[clap(long, short)]
        snapshot: PathBuf,
        /// Print the per-segment trace
        #[clap(long)]
        trace: bool,
        /// Emit JSON instead of text
        #[clap(long)]
        json: bool,
    },
    /// Generate a path for every element of a tree snapshot
    Paths {
        /// Snapshot file (JSON)
        #[clap(long, short)]
        snapshot: PathBuf,
        /// Only the application with this bundle identifier
        #[clap(long)]
        bundle_id: Option<String>,
        /// Levels to descend below each application
        #[clap(long, default_value_t = 8)]
        depth: usize,
    },
}

#[derive(Serialize)]
struct Resolved {
    element: Option<axpath::ElementHandle>,
    role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<axpath::ResolutionTrace>,
}

impl Resolved {
    /// Report for `--json`. A failed resolution still carries its trace.
    fn new(
        outcome: Result<axpath::ElementHandle, axpath::ResolutionError>,
        provider: &SnapshotProvider,
        role_attribute: &str,
        trace: Option<axpath::ResolutionTrace>,
    ) -> Result<Self> {
        let (element, role, error) = match outcome {
            Ok(element) => {
                let role = provider
                    .attribute(element, role_attribute)
                    .context("Failed to read the resolved element's role")?;
                (Some(element), role, None)
            }
            Err(e) => (None, None, Some(e.to_string())),
        };
        Ok(Self {
            element,
            role,
            error,
            trace,
        })
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};
    let default = if verbose { "axpath=debug" } else { "axpath=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn load_engine(config: EngineConfig, snapshot: &Path) -> Result<(PathEngine, Arc<SnapshotProvider>)> {
    let provider = Arc::new(
        SnapshotProvider::from_file(snapshot)
            .with_context(|| format!("Failed to load snapshot {}", snapshot.display()))?,
    );
    debug!(applications = provider.roots().len(), "snapshot loaded");
    let engine = PathEngine::new(provider.clone(), config).context("Invalid engine configuration")?;
    Ok((engine, provider))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Parse { path } => {
            let parser = axpath::PathParser::new(config.prefix.clone());
            let parsed = parser
                .parse(&path)
                .with_context(|| format!("Failed to parse {path}"))?;
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Commands::Validate { path, strict } => {
            let engine = PathEngine::new(Arc::new(SnapshotProvider::new(Vec::new())), config)
                .context("Invalid engine configuration")?;
            let result = engine.validate(&path, strict);
            for warning in &result.warnings {
                eprintln!("warning: {warning}");
            }
            if !result.is_valid {
                eprintln!("❌ {path} is not valid");
                std::process::exit(1);
            }
            println!("✅ valid");
        }
        Commands::Resolve {
            path,
            snapshot,
            trace,
            json,
        } => {
            let (engine, provider) = load_engine(config, &snapshot)?;
            let parsed = engine
                .parse(&path)
                .with_context(|| format!("Failed to parse {path}"))?;
            let (outcome, report) = engine.resolve_with_trace(&parsed, Scope::Desktop).await;

            if json {
                let resolved = Resolved::new(
                    outcome,
                    &provider,
                    &engine.config().role_attribute,
                    trace.then_some(report),
                )?;
                println!("{}", serde_json::to_string_pretty(&resolved)?);
                if resolved.error.is_some() {
                    std::process::exit(1);
                }
                return Ok(());
            }

            if trace {
                eprint!("{}", report.render());
            }
            let element = outcome.with_context(|| format!("Failed to resolve {path}"))?;
            let role = provider
                .attribute(element, &engine.config().role_attribute)
                .context("Failed to read the resolved element's role")?;
            println!("{element} {}", role.unwrap_or_default());
        }
        Commands::Paths {
            snapshot,
            bundle_id,
            depth,
        } => {
            let (engine, provider) = load_engine(config, &snapshot)?;
            let roots = match &bundle_id {
                Some(id) => provider
                    .applications_by_bundle_id(id)
                    .context("Failed to look up application")?,
                None => provider.roots().to_vec(),
            };
            if roots.is_empty() {
                anyhow::bail!("No application in {} matches", snapshot.display());
            }
            for root in roots {
                for element in engine
                    .discover(root, &[], depth)
                    .await
                    .context("Failed to generate paths")?
                {
                    println!("{}", element.path);
                }
            }
        }
    }

    Ok(())
}
