// crates/relaycli/src/main.rs

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use relaycore::{Context, Destination, LogRecord, LogStatus, MessageSender, ProcessRole, Task};
use relaynodes::{register_all, Capabilities, Element, MemoryBrowser};
use relayruntime::{Engine, EngineConfig, Switchboard};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay dispatch engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a task file against an in-memory browser
    Run {
        /// Path to task JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Engine configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Page contents served by the in-memory browser, as {url: [element]}
        #[arg(short, long)]
        sites: Option<PathBuf>,

        /// Process the task is started from; a popup forwards every step
        /// to background
        #[arg(short, long, value_enum, default_value = "background")]
        role: EntryRole,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Print the log tree as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available node types
    Nodes,

    /// Create a new example task
    Init {
        /// Output file path
        #[arg(short, long, default_value = "task.json")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EntryRole {
    Background,
    Popup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            config,
            sites,
            role,
            verbose,
            json,
        } => {
            // Initialize logging; RUST_LOG wins when set
            let level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
                )
                .init();

            run_task(file, config, sites, role, json).await?;
        }

        Commands::Nodes => {
            list_nodes()?;
        }

        Commands::Init { output } => {
            create_example_task(output)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn load_sites(path: Option<PathBuf>) -> Result<HashMap<String, Vec<Element>>> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading sites {}", path.display()))?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(HashMap::new()),
    }
}

/// Engine the task is started from. Background is always running; a
/// popup talks to it over the switchboard.
fn entry_engine(
    role: EntryRole,
    board: &Arc<Switchboard>,
    background: Engine,
    config: &EngineConfig,
) -> Result<Engine> {
    match role {
        EntryRole::Background => Ok(background),
        EntryRole::Popup => {
            let popup = Engine::builder(EngineConfig {
                role: ProcessRole::Popup,
                ..config.clone()
            })
            .transport(Arc::new(board.endpoint(MessageSender::default())))
            .build();
            register_all(&popup, &Capabilities::default())?;
            Ok(popup)
        }
    }
}

async fn run_task(
    file: PathBuf,
    config: Option<PathBuf>,
    sites: Option<PathBuf>,
    role: EntryRole,
    json: bool,
) -> Result<()> {
    println!("🚀 Loading task from: {}", file.display());

    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("reading task {}", file.display()))?;
    let task_raw: serde_json::Value = serde_json::from_str(&raw)?;
    let config = load_config(config)?;
    tracing::debug!("Engine config: {:?}", config);

    let board = Switchboard::new();
    let browser = load_sites(sites)?
        .into_iter()
        .fold(
            MemoryBrowser::new(Arc::clone(&board), config.clone()),
            |browser, (url, elements)| browser.with_site(url, elements),
        );
    let browser = Arc::new(browser);
    let background = browser.background_engine()?;
    let engine = entry_engine(role, &board, background, &config)?;

    if let Ok(task) = serde_json::from_value::<Task>(task_raw.clone()) {
        println!("📋 Task: {}", task.metadata.name);
        println!("   Steps: {}", task.data.nodes.len());
        println!("   Started from: {}", engine.role());
        println!();
    }

    let context = Context::new().shared();
    let root = engine
        .execute_task_raw(task_raw, None, Some(Arc::clone(&context)))
        .await;
    let record = root.to_json();

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        for child in &record.children {
            print_record(child, 1);
        }
        println!();
        println!("📊 Execution Summary:");
        println!("   Root log: {}", record.id);
        let context = context.read().await;
        println!("   Active tab: {} {}", context.active_tab.id, context.active_tab.url);
        for tab in browser.tabs() {
            println!("   Open tab {}: {} ({:?})", tab.id, tab.url, tab.status);
        }
    }

    board.unlisten(Destination::Background);

    let failed = record
        .children
        .iter()
        .any(|task| task.status() != Some(LogStatus::Success));
    if failed {
        anyhow::bail!("Task failed");
    }
    println!("✨ Task completed successfully");
    Ok(())
}

fn print_record(record: &LogRecord, depth: usize) {
    let indent = "  ".repeat(depth);
    if let Some(data) = &record.data {
        let icon = match data.status {
            LogStatus::Success => "✅",
            LogStatus::Error => "❌",
            LogStatus::Pending => "⏳",
        };
        println!("{}{} {} ({}ms): {}", indent, icon, data.name, data.duration, data.message);
        if let Some(error) = &data.error {
            println!("{}   {}", indent, error.message);
        }
    }
    for child in &record.children {
        print_record(child, depth + 1);
    }
}

fn list_nodes() -> Result<()> {
    println!("📦 Available Node Types:");
    println!();

    let engine = Engine::new(EngineConfig::for_role(ProcessRole::Web));
    register_all(&engine, &Capabilities::default())?;

    let registry = engine.registry();
    for name in registry.list_node_types() {
        let affinity = registry
            .resolve(&name)
            .ok()
            .and_then(|factory| factory.create().ok())
            .map(|node| node.affinity());
        match affinity {
            Some(affinity) => println!("  • {} ({})", name, affinity),
            None => println!("  • {}", name),
        }
        if let Some(metadata) = registry.get_metadata(&name) {
            println!("    {}", metadata.description);
        }
    }
    Ok(())
}

fn create_example_task(output: PathBuf) -> Result<()> {
    let task = Task::new("Example shopping task")
        .step(
            "ClickElement",
            serde_json::json!({
                "initUrl": "https://shop.example.com",
                "type": "css-selector",
                "input": "#buy",
                "timeout": 5000
            }),
        )
        .step(
            "WaitElement",
            serde_json::json!({ "type": "search", "input": { "body": "Buy" } }),
        )
        .step("CloseTab", serde_json::json!({}));

    let json = serde_json::to_string_pretty(&task)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example task: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  relay run --file {} --sites sites.json", output.display());

    Ok(())
}
