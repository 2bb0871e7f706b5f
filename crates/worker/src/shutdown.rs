//! Signal handling and connection teardown.

use tracing::{error, info};

use sweeper_infra::store::DriveStore;
use sweeper_queue::Queue;

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Close the queue and disconnect the store concurrently.
///
/// Both are attempted regardless of the other's outcome. Returns `true` only
/// if both succeeded.
pub async fn close_connections<S, Q>(store: &S, queue: &Q) -> bool
where
    S: DriveStore + ?Sized,
    Q: Queue + ?Sized,
{
    let (queue_closed, store_closed) = tokio::join!(queue.close(), store.disconnect());

    let queue_ok = match queue_closed {
        Ok(()) => {
            info!("queue connection closed");
            true
        }
        Err(err) => {
            error!(error = %err, "error closing queue connection");
            false
        }
    };

    let store_ok = match store_closed {
        Ok(()) => {
            info!("store disconnected");
            true
        }
        Err(err) => {
            error!(error = %err, "error disconnecting store");
            false
        }
    };

    queue_ok && store_ok
}
