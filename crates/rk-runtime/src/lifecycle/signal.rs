use tokio_util::sync::CancellationToken;

/// Register Ctrl-C (SIGINT) and SIGTERM handling; cancel the engine on first
/// signal received.
pub async fn wait_for_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        rk_info!(sys, signal = "SIGINT", "received signal, initiating graceful shutdown");
                    }
                    _ = sigterm.recv() => {
                        rk_info!(sys, signal = "SIGTERM", "received signal, initiating graceful shutdown");
                    }
                }
            }
            Err(e) => {
                rk_warn!(sys, error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
    cancel.cancel();
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => rk_info!(sys, "received shutdown signal, initiating graceful shutdown"),
        Err(e) => rk_error!(sys, error = %e, "failed to listen for Ctrl-C, shutting down"),
    }
}
