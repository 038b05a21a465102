//! tasksync: command-line client for the shared task list
//!
//! Subcommands:
//! - `list`: Fetch and print the list
//! - `add` / `edit` / `remove`: Run a mutation
//! - `watch`: Keep the list in sync with push events and print changes

use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::Result;
use tasksync::{
    ClientConfig, Collection, HttpTransport, QueryCacheStore, Task, TaskCollection, TaskPatch,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tasksync")]
#[command(about = "Collaborative task list client", long_about = None)]
struct Cli {
    /// GraphQL HTTP endpoint
    #[arg(
        long,
        global = true,
        env = "TASKSYNC_ENDPOINT",
        default_value = "http://localhost:4000/graphql"
    )]
    endpoint: String,

    /// GraphQL WebSocket endpoint (derived from --endpoint when unset)
    #[arg(long, global = true, env = "TASKSYNC_WS_ENDPOINT")]
    ws_endpoint: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current task list
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a task
    Add {
        title: String,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// Change a task's title and/or description
    Edit {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a task
    Remove { id: String },

    /// Follow changes until interrupted
    Watch {
        /// Reconnect backoff cap in seconds
        #[arg(long, default_value = "60")]
        max_backoff: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tasksync=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut builder = ClientConfig::builder()
        .endpoint(cli.endpoint)
        .request_timeout_secs(cli.timeout);
    if let Some(ws) = cli.ws_endpoint {
        builder = builder.subscription_endpoint(ws);
    }
    if let Commands::Watch { max_backoff } = &cli.command {
        builder = builder.max_backoff_secs(*max_backoff);
    }
    let config = builder.build();

    let transport = HttpTransport::new(config.clone()).map_err(|e| miette::miette!("{}", e))?;
    let tasks = TaskCollection::new(Arc::new(transport), QueryCacheStore::new());

    match cli.command {
        Commands::List { json } => list(&tasks, json).await,
        Commands::Add { title, description } => {
            let task = tasks
                .create(title, description)
                .await
                .map_err(|e| miette::miette!("failed to create task: {}", e))?;
            print_task(&task);
            Ok(())
        }
        Commands::Edit { id, title, description } => {
            if title.is_none() && description.is_none() {
                return Err(miette::miette!("nothing to change: pass --title and/or --description"));
            }
            let patch = TaskPatch {
                id: id.into(),
                title,
                description,
            };
            let task = tasks
                .update(patch)
                .await
                .map_err(|e| miette::miette!("failed to update task: {}", e))?;
            print_task(&task);
            Ok(())
        }
        Commands::Remove { id } => remove(&tasks, &id).await,
        Commands::Watch { .. } => watch_changes(&tasks, &config).await,
    }
}

async fn list(tasks: &TaskCollection<HttpTransport>, json: bool) -> Result<()> {
    let outcome = tasks.fetch().await.map_err(|e| miette::miette!("{}", e))?;
    for error in &outcome.errors {
        eprintln!("warning: {}", error);
    }
    let Some(collection) = outcome.tasks else {
        return Err(miette::miette!("service returned no task list"));
    };

    if json {
        let rendered = serde_json::to_string_pretty(collection.as_slice())
            .map_err(|e| miette::miette!("{}", e))?;
        println!("{}", rendered);
    } else {
        print_collection(&collection);
    }
    Ok(())
}

async fn remove(tasks: &TaskCollection<HttpTransport>, id: &str) -> Result<()> {
    tasks.fetch().await.map_err(|e| miette::miette!("{}", e))?;
    let target = tasks
        .snapshot()
        .and_then(|c| c.get(&id.into()).cloned())
        .ok_or_else(|| miette::miette!("no task with id '{}'", id))?;

    let deleted = tasks
        .delete(&target)
        .await
        .map_err(|e| miette::miette!("failed to delete task: {}", e))?;
    println!("deleted {}", deleted);
    Ok(())
}

async fn watch_changes(tasks: &TaskCollection<HttpTransport>, config: &ClientConfig) -> Result<()> {
    tasks.reconcile_push_events();
    tasks.on_created(|task| println!("+ {}", format_task(task)));
    tasks.on_modified(|task| println!("~ {}", format_task(task)));
    tasks.on_deleted(|id| println!("- {}", id));

    let outcome = tasks.fetch().await.map_err(|e| miette::miette!("{}", e))?;
    if let Some(collection) = &outcome.tasks {
        print_collection(collection);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = Arc::new(tasks.push_listener().with_max_backoff(config.max_backoff()));
    let handles = listener.spawn_all(shutdown_rx);

    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        handle.await.map_err(|e| miette::miette!("listener task failed: {}", e))?;
    }

    if let Some(collection) = tasks.snapshot() {
        info!(tasks = collection.len(), "final task list");
    }
    Ok(())
}

fn print_collection(collection: &Collection) {
    if collection.is_empty() {
        println!("(no tasks)");
    }
    for task in collection {
        print_task(task);
    }
}

fn print_task(task: &Task) {
    println!("{}", format_task(task));
}

fn format_task(task: &Task) -> String {
    if task.description.is_empty() {
        format!("[{}] {}", task.id, task.title)
    } else {
        format!("[{}] {}: {}", task.id, task.title, task.description)
    }
}
