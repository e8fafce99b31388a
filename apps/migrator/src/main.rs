use {anyhow::Context, clap::Parser, sqlx::postgres::PgPoolOptions, tracing::info};

/// Apply the embedded schema migrations to the configured database.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Postgres connection string (falls back to DATABASE_URL).
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let database_url = match args.database_url {
        Some(url) => url,
        None => std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?,
    };

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("connect to database")?;

    neurelay_storage::MIGRATOR
        .run(&pool)
        .await
        .context("run migrations")?;

    info!("migrations applied");
    Ok(())
}
