//! Entigraph CLI - Inspect schemas, save plans and reference cycles
//!
//! # Usage
//!
//! ```bash
//! # Write a workspace config
//! entigraph init --collection-policy always-saved
//!
//! # Validate a schema and show derived property traits
//! entigraph check --schema schema.json
//!
//! # Show the save order for a graph root
//! entigraph plan --schema schema.json --graph graph.json --root study
//!
//! # List reference cycles reachable from a root
//! entigraph cycles --schema schema.json --graph graph.json --root study --all
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use entigraph_config::{
    CollectionSavePolicy, ConfigLoader, ConfigOverrides, EngineConfig, LogFormat,
};
use entigraph_core::{
    selectors, EntityId, EntityType, GraphDocument, LoadedGraph, MetadataRegistry, Property,
    ReferenceVisitor, SaveOrderResolver, SavePlan, SchemaDocument,
};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

/// Entigraph - Object-graph save ordering and diagnostics
#[derive(Parser, Debug)]
#[command(name = "entigraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Workspace directory holding `.entigraph/config.toml`
    #[arg(long, short = 'c', global = true, env = "ENTIGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output and diagnostic traversal logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Collection save policy (inverse-owned, dependent-self-saved, always-saved)
    #[arg(long, global = true, value_parser = parse_collection_policy)]
    collection_policy: Option<CollectionSavePolicy>,
}

/// Parse a collection save policy from string
fn parse_collection_policy(s: &str) -> Result<CollectionSavePolicy, String> {
    s.parse()
        .map_err(|e: entigraph_config::ConfigError| e.to_string())
}

impl GlobalOptions {
    /// Convert global options to config overrides
    fn to_config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            debug: self.verbose.then_some(true),
            log_level: self.verbose.then(|| "debug".to_string()),
            collection_policy: self.collection_policy,
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default `.entigraph/config.toml`
    Init(InitArgs),

    /// Validate a schema and print derived property traits
    Check(CheckArgs),

    /// Print the save order for a root entity
    Plan(PlanArgs),

    /// Print reference cycles reachable from a root entity
    Cycles(CyclesArgs),
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Write `~/.entigraph/config.toml` instead of the workspace config
    #[arg(long)]
    global: bool,

    /// Overwrite an existing config file
    #[arg(long, short = 'f')]
    force: bool,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Schema document (JSON)
    #[arg(long)]
    schema: PathBuf,
}

/// Schema, graph and root shared by graph commands
#[derive(Args, Debug)]
struct GraphInput {
    /// Schema document (JSON)
    #[arg(long)]
    schema: PathBuf,

    /// Graph document (JSON)
    #[arg(long)]
    graph: PathBuf,

    /// Label of the root entity
    #[arg(long)]
    root: String,
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[command(flatten)]
    input: GraphInput,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct CyclesArgs {
    #[command(flatten)]
    input: GraphInput,

    /// Follow every reference, not only dependents
    #[arg(long)]
    all: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.global)?;
    init_logging(&config)?;
    debug!(config = ?config, "Loaded configuration");

    match cli.command {
        Commands::Init(args) => init(args, &cli.global),
        Commands::Check(args) => check(args, &config),
        Commands::Plan(args) => plan(args, &config),
        Commands::Cycles(args) => cycles(args, &config),
    }
}

fn workspace_dir(global: &GlobalOptions) -> Result<PathBuf> {
    match global.config {
        Some(ref dir) => Ok(dir.clone()),
        None => std::env::current_dir().context("Failed to get current directory"),
    }
}

/// Load configuration (global -> local -> CLI overrides).
fn load_config(global: &GlobalOptions) -> Result<EngineConfig> {
    let workspace = workspace_dir(global)?;
    let overrides = global.to_config_overrides();
    ConfigLoader::new()
        .load(&workspace, Some(&overrides))
        .context("Failed to load configuration")
}

fn init_logging(config: &EngineConfig) -> Result<()> {
    let level: Level = config
        .logging
        .level
        .parse()
        .with_context(|| format!("Invalid log level '{}'", config.logging.level))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Text => {
            tracing::subscriber::set_global_default(builder.with_ansi(true).finish())?
        }
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

fn load_registry(path: &Path, config: &EngineConfig) -> Result<Arc<MetadataRegistry>> {
    let registry = SchemaDocument::from_path(path)
        .with_context(|| format!("Failed to read schema {}", path.display()))?
        .build(config.save.collection_policy)
        .with_context(|| format!("Invalid schema {}", path.display()))?;
    Ok(Arc::new(registry))
}

fn load_graph(input: &GraphInput, config: &EngineConfig) -> Result<LoadedGraph> {
    let registry = load_registry(&input.schema, config)?;
    GraphDocument::from_path(&input.graph)
        .with_context(|| format!("Failed to read graph {}", input.graph.display()))?
        .load(registry)
        .with_context(|| format!("Invalid graph {}", input.graph.display()))
}

// ============================================================================
// Commands
// ============================================================================

fn init(args: InitArgs, global: &GlobalOptions) -> Result<()> {
    let loader = ConfigLoader::new();
    let workspace = workspace_dir(global)?;
    let path = if args.global {
        loader
            .global_config_path()
            .context("Could not determine home directory")?
    } else {
        loader.local_config_path(&workspace)
    };
    if path.exists() && !args.force {
        anyhow::bail!(
            "Config already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    let mut config = EngineConfig::default();
    if let Some(policy) = global.collection_policy {
        config.save.collection_policy = policy;
    }
    let written = if args.global {
        loader.init_global(&config)
    } else {
        loader.init_local(&workspace, &config)
    }
    .context("Failed to write configuration")?;

    println!("Created {}", written.display());
    Ok(())
}

fn check(args: CheckArgs, config: &EngineConfig) -> Result<()> {
    let registry = load_registry(&args.schema, config)?;
    println!(
        "{} types (collection policy: {})",
        registry.len(),
        registry.collection_policy()
    );
    for ty in registry.types() {
        println!();
        println!("{}", type_header(ty));
        for property in ty.properties() {
            println!("  {}", property_line(property));
        }
    }
    Ok(())
}

fn type_header(ty: &EntityType) -> String {
    let mut markers = Vec::new();
    if ty.is_abstract() {
        markers.push("abstract".to_string());
    }
    if ty.is_save_proxy() {
        markers.push("save-proxy".to_string());
    }
    if let Some(identifier) = ty.identifier_property() {
        markers.push(format!("identifier={}", identifier.name()));
    }
    for key in ty.secondary_keys() {
        let names: Vec<&str> = key.iter().map(|&s| ty.property_at(s).name()).collect();
        markers.push(format!("key=({})", names.join(", ")));
    }
    if markers.is_empty() {
        ty.name().to_string()
    } else {
        format!("{} [{}]", ty.name(), markers.join(", "))
    }
}

fn property_line(property: &Property) -> String {
    let traits: Vec<&str> = [
        (property.is_cascaded(), "cascaded"),
        (property.is_fetched(), "fetched"),
        (property.is_saved(), "saved"),
        (property.is_creatable(), "creatable"),
        (property.is_updatable(), "updatable"),
        (property.is_savable_prerequisite(), "prerequisite"),
        (property.is_fetch_saved(), "fetch-saved"),
        (property.is_autogenerated(), "autogenerated"),
        (property.is_mandatory(), "mandatory"),
    ]
    .into_iter()
    .filter_map(|(on, name)| on.then_some(name))
    .collect();

    let collection = if property.is_collection() { "*" } else { "" };
    let inverse = property
        .inverse()
        .map(|i| format!(" <-> {}", i))
        .unwrap_or_default();
    format!(
        "{}{} ({}){}: {}",
        property.name(),
        collection,
        property.kind().as_str(),
        inverse,
        traits.join(" ")
    )
}

fn plan(args: PlanArgs, config: &EngineConfig) -> Result<()> {
    let mut loaded = load_graph(&args.input, config)?;
    let root = loaded.id(&args.input.root)?;
    if config.save.apply_defaults {
        loaded.graph.apply_defaults(root);
    }
    let plan = SaveOrderResolver::new()
        .validate(config.save.validate)
        .debug(config.debug)
        .plan(&loaded.graph, root)
        .context("Failed to plan save")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&loaded, &plan))?);
        return Ok(());
    }

    for (n, step) in plan.steps.iter().enumerate() {
        let attributes: Vec<&str> = step.template.names().collect();
        println!(
            "{:>3}. {} {} ({:?}) [{}]",
            n + 1,
            step.operation,
            entity_label(&loaded, step.entity),
            step.phase,
            attributes.join(", ")
        );
    }
    Ok(())
}

fn plan_json(loaded: &LoadedGraph, plan: &SavePlan) -> serde_json::Value {
    let steps: Vec<serde_json::Value> = plan
        .steps
        .iter()
        .map(|step| {
            serde_json::json!({
                "entity": entity_label(loaded, step.entity),
                "operation": step.operation,
                "phase": step.phase,
                "attributes": step.template.names().collect::<Vec<_>>(),
            })
        })
        .collect();
    serde_json::json!({ "root": entity_label(loaded, plan.root), "steps": steps })
}

fn cycles(args: CyclesArgs, config: &EngineConfig) -> Result<()> {
    let loaded = load_graph(&args.input, config)?;
    let root = loaded.id(&args.input.root)?;

    let traversal = if args.all {
        ReferenceVisitor::new(selectors::references)
            .debug(config.debug)
            .visit(&loaded.graph, root)
    } else {
        ReferenceVisitor::new(selectors::dependents)
            .debug(config.debug)
            .visit(&loaded.graph, root)
    };

    if !traversal.has_cycles() {
        println!("No cycles ({} entities visited)", traversal.order.len());
        return Ok(());
    }
    for cycle in &traversal.cycles {
        let path: Vec<String> = cycle.iter().map(|&id| entity_label(&loaded, id)).collect();
        println!("{}", path.join(" -> "));
    }
    Ok(())
}

/// Document label, falling back to the graph description
fn entity_label(loaded: &LoadedGraph, id: EntityId) -> String {
    match loaded.label_of(id) {
        Some(label) => label.to_string(),
        None => loaded.graph.describe(id),
    }
}
