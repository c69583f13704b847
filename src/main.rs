//! crabrl-dts CLI - resolve the taxonomy set of an XBRL document

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use colored::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use crabrl_dts::linkbase::LABEL_ROLE;
use crabrl_dts::xlink::Href;
use crabrl_dts::{CacheMode, DocumentFragment, DtsConfig, FragmentSet, LinkKind, Network};

/// Discoverable taxonomy set resolver
#[derive(ClapParser)]
#[command(name = "crabrl-dts")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache root directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Serve from the cache only
    #[arg(long, global = true, conflicts_with = "no_store")]
    offline: bool,

    /// Fetch cache misses without persisting them
    #[arg(long, global = true)]
    no_store: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a document and summarize its taxonomy set
    Load {
        /// Input file or URL
        input: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,

        /// Show statistics
        #[arg(short, long)]
        stats: bool,

        /// Skip linkbase loading
        #[arg(long)]
        no_linkbases: bool,
    },

    /// Print a presentation network as a tree
    Tree {
        /// Input file or URL
        input: String,

        /// Extended link role
        #[arg(short, long)]
        role: Option<String>,

        /// Label language
        #[arg(short, long, default_value = "en")]
        lang: String,
    },
}

#[derive(Serialize)]
struct FragmentSummary<'a> {
    uri: &'a str,
    schemas: Vec<&'a str>,
    linkbases: Vec<&'a str>,
    relationships: usize,
    warnings: Vec<String>,
}

impl<'a> FragmentSummary<'a> {
    fn of(fragment: &'a DocumentFragment) -> Self {
        Self {
            uri: fragment.uri().as_str(),
            schemas: fragment.schemas().iter().map(|s| s.target_namespace()).collect(),
            linkbases: fragment
                .linkbases()
                .iter()
                .map(|l| l.source_uri().as_str())
                .collect(),
            relationships: fragment.relationship_count(),
            warnings: fragment.warnings().map(|w| w.to_string()).collect(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;
    let registry = config
        .build_registry()
        .context("Failed to set up resource resolution")?;

    match cli.command {
        Commands::Load {
            input,
            json,
            stats,
            no_linkbases,
        } => {
            let loader = config
                .loader(&registry)?
                .with_linkbase_loading(config.load.linkbases && !no_linkbases);

            let start = Instant::now();
            let set = loader
                .load_from_uri(&input)
                .with_context(|| format!("Failed to load {}", input))?;
            let elapsed = start.elapsed();

            if json {
                let summary: Vec<_> = set.iter().map(FragmentSummary::of).collect();
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            print_summary(&input, &set);
            if stats {
                println!("  Time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
            }
        }

        Commands::Tree { input, role, lang } => {
            let loader = config.loader(&registry)?;
            let set = loader
                .load_from_uri(&input)
                .with_context(|| format!("Failed to load {}", input))?;
            let fragment = set
                .first()
                .with_context(|| format!("{} has no document fragments", input))?;

            let roles = fragment.roles(LinkKind::Presentation);
            let roles: Vec<&str> = match &role {
                Some(role) => vec![role.as_str()],
                None => roles,
            };
            if roles.is_empty() {
                println!("{} no presentation networks", "✗".red().bold());
            }
            for role in roles {
                let network = fragment
                    .network(LinkKind::Presentation, role)
                    .with_context(|| format!("No presentation network for role {}", role))?;
                println!("{}", role.bold());
                for root in network.roots() {
                    print_tree(fragment, &network, root, None, &lang, 1, &mut HashSet::new());
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "crabrl_dts=debug"
    } else {
        "crabrl_dts=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<DtsConfig> {
    let config = match &cli.config {
        Some(path) => DtsConfig::load_from_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => DtsConfig::default(),
    };
    let mut config = config.apply_environment_overrides()?;

    if let Some(dir) = &cli.cache_dir {
        config.cache.directory = Some(dir.clone());
    }
    if cli.offline {
        config.cache.mode = CacheMode::Offline;
    } else if cli.no_store {
        config.cache.mode = CacheMode::NoStore;
    }
    Ok(config)
}

fn print_summary(input: &str, set: &FragmentSet) {
    println!("{} {}", "✓".green().bold(), input);
    for fragment in set {
        if set.len() > 1 {
            println!("  Fragment: {}", fragment.uri());
        }
        println!("  Schemas: {}", fragment.schemas().len());
        for schema in fragment.schemas() {
            println!("    {} ({})", schema.target_namespace(), schema.source_uri());
        }
        println!("  Linkbases: {}", fragment.linkbases().len());
        println!("  Relationships: {}", fragment.relationship_count());

        let warnings: Vec<_> = fragment.warnings().collect();
        if !warnings.is_empty() {
            println!("  Warnings: {}", warnings.len());
            for warning in warnings.iter().take(5) {
                println!("  {} {}", "WARNING:".yellow(), warning);
            }
            if warnings.len() > 5 {
                println!("  ... and {} more warnings", warnings.len() - 5);
            }
        }
    }
}

fn print_tree<'a>(
    fragment: &DocumentFragment,
    network: &'a Network,
    concept: &'a Href,
    preferred_label: Option<&str>,
    lang: &str,
    depth: usize,
    path: &mut HashSet<&'a Href>,
) {
    let role = preferred_label.unwrap_or(LABEL_ROLE);
    let label = fragment
        .label(concept, role, lang)
        .unwrap_or(concept.fragment.as_str());
    println!("{}{}", "  ".repeat(depth), label);

    if !path.insert(concept) {
        println!("{}{}", "  ".repeat(depth + 1), "(cycle)".dimmed());
        return;
    }
    for rel in network.children(concept) {
        if let Some(child) = rel.to.concept() {
            print_tree(
                fragment,
                network,
                child,
                rel.preferred_label.as_deref(),
                lang,
                depth + 1,
                path,
            );
        }
    }
    path.remove(concept);
}
