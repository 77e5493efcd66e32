//! ClassPulse API server — conversational analytics for instructors.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use classpulse_core::config::ClassPulseConfig;
use classpulse_core::dataset::{DatasetProvider, InMemoryDataset};
use classpulse_hub::api::{self, ApiState};
use classpulse_hub::orchestrator::{Orchestrator, OrchestratorSettings};
use classpulse_hub::providers::{LlmIntentArbiter, OpenAiProvider, RetryProvider};
use classpulse_hub::store::FallbackSessionStore;
use classpulse_hub::support::FileTicketSink;

/// ClassPulse — instructor assistant over student activity data.
#[derive(Parser)]
#[command(name = "classpulse", version, about, long_about = None)]
struct Cli {
    /// Path to the config file (defaults to the user config directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the activity dataset (JSON array of records).
    #[arg(short, long, env = "CLASSPULSE_DATASET")]
    dataset: PathBuf,

    /// Bind host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config).
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,classpulse_core=debug,classpulse_hub=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .unwrap_or_else(ClassPulseConfig::default_path);
    let mut config = ClassPulseConfig::load(&config_path)?;
    if let Ok(api_key) = std::env::var("CLASSPULSE_LLM_API_KEY") {
        config.provider.api_key = Some(api_key);
    }
    if let Ok(api_key) = std::env::var("CLASSPULSE_API_KEY") {
        config.server.api_key = Some(api_key);
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let dataset = Arc::new(InMemoryDataset::load(&cli.dataset)?);
    let students = dataset.list_students().await?.len();
    let classes = dataset.list_classes().await?.len();
    info!(
        path = %cli.dataset.display(),
        students, classes, "dataset loaded"
    );

    let provider = Arc::new(RetryProvider::new(OpenAiProvider::new(
        config.provider.clone(),
    )));
    let arbiter = Arc::new(LlmIntentArbiter::new(provider.clone()));
    let store = Arc::new(FallbackSessionStore::new(None));
    let tickets = Arc::new(FileTicketSink::new(&config.escalation.ticket_dir));

    let orchestrator = Orchestrator::new(
        dataset,
        store,
        provider,
        tickets,
        OrchestratorSettings::from_config(&config),
    )
    .with_arbiter(arbiter);

    api::start_server(ApiState { orchestrator }, &config.server).await
}
