use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use autoflow_engine::{
    clients::{Collaborators, HttpWebhookClient, LogMessenger, Messenger, RelayMessenger},
    clock::SystemClock,
    config::Config,
    definition::load_definitions,
    server::Server,
    store::{create_store, SqliteStore, Store},
    workflow::WorkflowEngine,
};

#[derive(Parser)]
#[command(author, version, about = "Event-driven marketing automation workflow engine", long_about = None)]
struct Cli {
    /// Log level (debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Address to listen on (overrides SERVER_ADDR)
    #[arg(long, env = "SERVER_ADDR")]
    addr: Option<String>,

    /// YAML workflow definitions to import at startup (overrides WORKFLOW_DEFINITIONS)
    #[arg(long, env = "WORKFLOW_DEFINITIONS")]
    definitions: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the scheduler workers (default)
    Serve,

    /// Run one scheduling pass and exit
    Tick,

    /// Import workflow definitions and exit
    Import {
        /// YAML file with a top-level `workflows` list
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins when set
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| format!("autoflow_engine={},autoflow={},info", cli.log_level, cli.log_level));
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(addr) = cli.addr {
        config.server.addr = addr;
    }
    if let Some(path) = cli.definitions {
        config.definitions_path = Some(path);
    }

    let store = create_store(&config.database)
        .await
        .context("failed to open database")?;
    store.init().await.context("failed to migrate database")?;

    if let Some(path) = &config.definitions_path {
        import_definitions(&store, path).await?;
    }

    let engine = Arc::new(build_engine(&config, store));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config, engine).await,
        Commands::Tick => {
            let driven = engine.tick().await?;
            info!("Drove {} executions", driven);
            Ok(())
        }
        Commands::Import { path } => {
            import_definitions(engine.store(), &path).await?;
            Ok(())
        }
    }
}

fn build_engine(config: &Config, store: Arc<SqliteStore>) -> WorkflowEngine {
    let http = reqwest::Client::new();

    let messenger: Arc<dyn Messenger> = match &config.messaging.url {
        Some(url) => Arc::new(RelayMessenger::new(
            http.clone(),
            url.clone(),
            config.engine.webhook_timeout(),
        )),
        None => Arc::new(LogMessenger),
    };

    let collaborators = Collaborators {
        messenger,
        subjects: store.clone(),
        activity: store.clone(),
        webhooks: Arc::new(HttpWebhookClient::new(http)),
    };

    WorkflowEngine::new(store, collaborators, Arc::new(SystemClock), config.engine.clone())
}

async fn import_definitions<S: Store + ?Sized>(store: &Arc<S>, path: &Path) -> Result<()> {
    let definitions = load_definitions(path)
        .await
        .with_context(|| format!("failed to load definitions from {}", path.display()))?;

    for definition in definitions {
        let saved = store
            .save_definition(definition)
            .await
            .context("failed to save workflow definition")?;
        info!("Imported workflow '{}' ({}) at version {}", saved.name, saved.id, saved.version);
    }

    Ok(())
}

async fn serve(config: &Config, engine: Arc<WorkflowEngine>) -> Result<()> {
    engine.start().await?;

    let app = Server::new(engine.clone()).build_router();

    info!("Starting server on {}", config.server.addr);
    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    engine.shutdown().await;
    Ok(())
}
