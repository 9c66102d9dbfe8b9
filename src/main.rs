use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

use warden::authz::engine::Engine;
use warden::authz::hooks::Hooks;
use warden::authz::link::TableResolver;
use warden::authz::loader::load_facts;
use warden::authz::types::{Forest, NodeRef, ResourceIdx};
use warden::authz::{web, PolicyTree};
use warden::settings::Settings;
use warden::storage::{CacheMode, FileStore, PolicyCache};

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Hierarchical authorization policy compiler"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "warden.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile policy metadata and store the snapshot
    Compile {
        /// Directory of `.kdl` metadata files (overrides policy.facts_dir)
        #[arg(long)]
        facts: Option<PathBuf>,
    },
    /// Print the policy tree
    Tree,
    /// Serve the read-only introspection API
    Serve,
    /// Show which policy node a link destination resolves to
    ResolveLink {
        /// Destination such as "Admin:edit" or "Admin:removeUser!"
        destination: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let mut settings = Settings::load(&cli.config)?;
    tracing::debug!(?settings, "Loaded configuration");

    match cli.command {
        Command::Compile { facts } => {
            if let Some(dir) = facts {
                settings.policy.facts_dir = dir;
            }
            settings.cache.mode = CacheMode::Compile;
            let tree = init_tree(&settings)?;
            println!(
                "compiled {} resources and {} operations into `{}`",
                tree.forest().resources.len(),
                tree.forest().operations.len(),
                settings.cache.namespace
            );
        }
        Command::Tree => {
            let tree = init_tree(&settings)?;
            print_forest(tree.forest());
        }
        Command::Serve => {
            let tree = Arc::new(init_tree(&settings)?);
            let addr = settings.listen_addr();
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .into_diagnostic()?;
            tracing::info!(%addr, "Policy introspection API listening");
            axum::serve(listener, web::router(tree))
                .await
                .into_diagnostic()?;
        }
        Command::ResolveLink { destination } => {
            let tree = Arc::new(init_tree(&settings)?);
            let mut engine = Engine::new(tree.clone(), Hooks::new());
            if !settings.links.presenters.is_empty() {
                engine = engine.with_resolver(TableResolver::new(settings.links.presenter_table()));
            }
            let forest = tree.forest();
            match engine.node_for_destination(&destination)? {
                Some(NodeRef::Resource(idx)) => {
                    let node = forest.resource(idx);
                    println!("resource {} ({}) [{}]", node.name, node.class_name, node.id);
                }
                Some(NodeRef::Operation(idx)) => {
                    let node = forest.operation(idx);
                    let owner = forest.resource(node.resource);
                    println!(
                        "operation {} ({}::{}) [{}]",
                        node.name, owner.class_name, node.method_name, node.id
                    );
                }
                None => println!("no policy applies to `{destination}`"),
            }
        }
    }

    Ok(())
}

fn init_tree(settings: &Settings) -> Result<PolicyTree> {
    let cache = PolicyCache::new(
        FileStore::new(&settings.cache.dir),
        settings.cache.namespace.clone(),
        settings.cache.mode,
    );
    let facts_dir = settings.policy.facts_dir.clone();
    let tree = cache.initialize(|| load_facts(&facts_dir))?;
    Ok(tree)
}

fn print_forest(forest: &Forest) {
    fn print_resource(forest: &Forest, idx: ResourceIdx, indent: usize) {
        let node = forest.resource(idx);
        let pad = "  ".repeat(indent);
        println!("{pad}{} ({}) [{}]", node.name, node.class_name, node.id);
        for &op in &node.operations {
            let op = forest.operation(op);
            println!("{pad}  - {} {} [{}]", op.kind, op.method_suffix, op.id);
        }
        for &child in &node.children {
            print_resource(forest, child, indent + 1);
        }
    }

    if forest.is_empty() {
        println!("(empty policy tree)");
    }
    for &root in &forest.roots {
        print_resource(forest, root, 0);
    }
}
