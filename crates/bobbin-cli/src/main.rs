//! `bobbin` - task engine を起動するバイナリ
//!
//! Usage:
//!   bobbin [--config <path>] [--log-format plain|json] [--demo]
//!
//! `--config` を省略すると `BUILD_MODE` に対応するファイルを
//! カレントディレクトリから探します。

mod handlers;
mod logging;

use std::path::PathBuf;
use std::time::Duration;

use bobbin_core::{Client, EngineBuilder, EngineConfig, EnqueueOptions, Task, TaskTemplate};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use handlers::{
    HelloWorld, HelloWorldHandler, SendLaterEmail, SendLaterEmailHandler, WelcomeEmail,
    WelcomeEmailHandler,
};
use logging::LogFormat;

/// Background task engine.
#[derive(Parser, Debug)]
#[command(name = "bobbin", about = "Priority task queue and cron engine")]
struct Cli {
    /// Path to a TOML file with a `[queue]` table.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[arg(long = "log-format", value_enum, default_value = "plain")]
    log_format: LogFormat,

    /// Enqueue a few sample tasks after startup.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_build_mode(&std::env::current_dir()?)?,
    };
    info!(
        concurrency = config.concurrency,
        queues = ?config.queue_weights(),
        "configuration loaded"
    );

    let engine = EngineBuilder::new(config)
        .register::<WelcomeEmail, _>(WelcomeEmailHandler)
        .register::<SendLaterEmail, _>(SendLaterEmailHandler)
        .register::<HelloWorld, _>(HelloWorldHandler)
        .cron("@every 1m", TaskTemplate::for_task(&HelloWorld)?)
        .expect_tasks(&[WelcomeEmail::TYPE, SendLaterEmail::TYPE, HelloWorld::TYPE])
        .build()
        .await?;

    engine.start().await?;
    info!("task engine started");

    if cli.demo {
        enqueue_samples(&engine.client()).await?;
    }

    wait_for_signal().await?;
    info!("shutdown signal received");

    if let Some(report) = engine.shutdown().await
        && report.abandoned > 0
    {
        warn!(abandoned = report.abandoned, "tasks left active after grace period");
    }
    let status = engine.status().await?;
    match cli.log_format {
        LogFormat::Plain => {
            info!(backlog = status.backlog(), dead = status.dead(), "final status\n{status}")
        }
        LogFormat::Json => info!(status = %serde_json::to_string(&status)?, "final status"),
    }
    Ok(())
}

async fn enqueue_samples(client: &Client) -> anyhow::Result<()> {
    let welcome = client
        .enqueue_task(
            &WelcomeEmail { user_id: 42 },
            EnqueueOptions::new()
                .queue("critical")
                .max_retry(3)
                .timeout(Duration::from_secs(20 * 60)),
        )
        .await?;
    info!(task_id = %welcome.task_id, queue = %welcome.queue, "enqueued welcome email");

    let delay = Duration::from_secs(30);
    let send_at = Utc::now() + chrono::Duration::seconds(30);
    let later = client
        .enqueue_task(
            &SendLaterEmail {
                user_id: "42".to_string(),
                send_at,
            },
            EnqueueOptions::new().process_in(delay),
        )
        .await?;
    info!(
        task_id = %later.task_id,
        process_at = %later.next_process_at,
        "scheduled reminder email"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
