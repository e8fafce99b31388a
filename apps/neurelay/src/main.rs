use std::{path::PathBuf, sync::Arc};

use {anyhow::Context, clap::Parser, tracing::info};

use {
    neurelay_gateway::{
        config::{Config, Env},
        server::{self, AppState},
        session::SessionTimeouts,
    },
    neurelay_storage::{ChatStore, MessageStore, PgStorage},
    neurelay_upstream::NeuralClient,
};

/// Chat gateway between browser WebSocket clients and the neural
/// inference backend.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Path to the YAML config file (falls back to CONFIG_PATH).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    init_tracing(config.env);

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let storage = Arc::new(
        PgStorage::connect(&database_url)
            .await
            .context("open postgres")?,
    );

    let upstream = NeuralClient::start(config.neuralclient.url.clone(), config.neuralclient.timeout);
    info!(url = %config.neuralclient.url, "neural client started");

    let state = AppState {
        messages: Arc::clone(&storage) as Arc<dyn MessageStore>,
        chats: storage as Arc<dyn ChatStore>,
        upstream: Arc::clone(&upstream),
        timeouts: SessionTimeouts::default(),
    };

    server::serve(&config.websocket.urlws, state, config.websocket.timeout).await?;

    // The server has drained; fail whatever is still in flight upstream.
    upstream.close().await;
    info!("gateway stopped");
    Ok(())
}

fn init_tracing(env: Env) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(match env {
            Env::Local | Env::Dev => "debug",
            Env::Prod => "info",
        })
    });
    match env {
        Env::Local => tracing_subscriber::fmt().with_env_filter(filter).init(),
        Env::Dev | Env::Prod => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}
