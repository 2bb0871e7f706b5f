use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info};

use sweeper_infra::PipelineContext;
use sweeper_infra::broker::RedisStreamsQueue;
use sweeper_infra::store::{DriveStore, PostgresDriveStore};
use sweeper_observability::ProcessIdentity;
use sweeper_worker::config::RoleSettings;
use sweeper_worker::runner::{self, RoleRunner};
use sweeper_worker::{Cli, WorkerConfig, shutdown};

#[tokio::main]
async fn main() -> ExitCode {
    // .env first so clap's env-backed args see it too
    let _ = dotenvy::dotenv();
    sweeper_observability::init();

    let cli = Cli::parse();
    let identity = ProcessIdentity::new();
    let span = identity.span(cli.role.as_str(), cli.task.as_str());

    match run(cli, identity).instrument(span).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "worker failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, identity: ProcessIdentity) -> anyhow::Result<()> {
    let config = WorkerConfig::from_env(cli.task, cli.role).context("configuration error")?;
    info!(queue = %config.queue_name, role = ?config.role, "configuration loaded");

    let gateway = match &config.role {
        RoleSettings::Consumer {
            gateway: Some(settings),
            ..
        } => Some(runner::build_gateway(settings)?),
        _ => None,
    };

    let options = config.database.connect_options()?;
    let store = Arc::new(
        PostgresDriveStore::connect(options)
            .await
            .context("connecting to the drive database")?,
    );
    info!("connected to the drive database");

    let queue = match RedisStreamsQueue::connect(&config.broker_url, identity.to_string()).await {
        Ok(queue) => Arc::new(queue),
        Err(err) => {
            if let Err(close_err) = store.disconnect().await {
                error!(error = %close_err, "error disconnecting store");
            }
            return Err(err).context("connecting to the broker");
        }
    };
    info!("connected to the broker");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let signals = tokio::spawn(
        async move {
            shutdown::signal().await;
            on_signal.cancel();
        }
        .in_current_span(),
    );

    let mut role = RoleRunner::new(config, runner::claim_mode(cli.drain));
    if let Some(gateway) = gateway {
        role = role.with_gateway(gateway);
    }
    let ctx = PipelineContext::new(Arc::clone(&store), Arc::clone(&queue));
    let outcome = role.run(ctx, cancel).await;
    signals.abort();

    if let Ok(report) = &outcome {
        info!(report = ?report, "role finished");
    }

    let closed = shutdown::close_connections(store.as_ref(), queue.as_ref()).await;
    outcome?;
    anyhow::ensure!(closed, "shutdown did not complete cleanly");
    Ok(())
}
