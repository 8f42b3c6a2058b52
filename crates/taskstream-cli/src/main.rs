use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod demo;
mod handlers;

#[derive(Debug, Parser)]
#[command(name = "taskstream", version, about = "Stream-backed task dispatch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the success / exhausted-retry / enqueue-failure scenarios in memory
    /// and print the final status records as JSON.
    Demo {
        #[arg(long, default_value_t = 2)]
        max_retry: u32,

        /// Give up waiting for the scenarios after this many seconds.
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },

    /// Consume one task kind from Redis until Ctrl-C.
    #[cfg(feature = "redis")]
    Worker {
        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,

        /// `vectorize` or `analyze`.
        #[arg(long, default_value = "vectorize")]
        kind: taskstream_core::domain::TaskKind,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Demo {
            max_retry,
            timeout_secs,
        } => {
            let report = demo::run(max_retry, Duration::from_secs(timeout_secs)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        #[cfg(feature = "redis")]
        Command::Worker { redis_url, kind } => worker::run(&redis_url, kind).await?,
    }
    Ok(())
}

#[cfg(feature = "redis")]
mod worker {
    use std::sync::Arc;

    use anyhow::Result;
    use taskstream_core::app::AppBuilder;
    use taskstream_core::config::QueueConfig;
    use taskstream_core::domain::TaskKind;
    use taskstream_core::impls::{InMemoryStatusStore, RedisStreamTransport};
    use tracing::info;

    use crate::handlers::DemoHandler;

    pub async fn run(redis_url: &str, kind: TaskKind) -> Result<()> {
        let config = QueueConfig::from_env(kind)?;
        let transport = RedisStreamTransport::connect(redis_url).await?;

        // status records live in the calling application; this worker only logs them
        let mut app = AppBuilder::new()
            .transport(Arc::new(transport))
            .status_store(Arc::new(InMemoryStatusStore::new()))
            .config(kind, config)
            .register(kind, Arc::new(DemoHandler::always_succeeding()))?
            .build()?;

        app.start_all().await?;
        info!(%kind, "worker ready, waiting for shutdown signal");
        tokio::signal::ctrl_c().await?;

        for (kind, report) in app.stop_all().await {
            info!(%kind, clean = report.clean, elapsed_ms = report.elapsed.as_millis() as u64, "worker stopped");
        }
        info!(stats = ?app.stats(), "worker shutdown complete");
        Ok(())
    }
}
