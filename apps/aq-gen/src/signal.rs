use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 监听 Ctrl-C（SIGINT）与 SIGTERM，收到第一个信号后触发停止令牌。
pub async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(err) = result {
                            warn!(target: "aq.pipeline", error = %err, "ctrl_c_listen_failed");
                            return;
                        }
                        info!(target: "aq.pipeline", signal = "SIGINT", "shutdown_requested");
                    }
                    _ = sigterm.recv() => {
                        info!(target: "aq.pipeline", signal = "SIGTERM", "shutdown_requested");
                    }
                }
            }
            Err(err) => {
                warn!(target: "aq.pipeline", error = %err, "sigterm_listen_failed");
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                info!(target: "aq.pipeline", signal = "SIGINT", "shutdown_requested");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "aq.pipeline", error = %err, "ctrl_c_listen_failed");
            return;
        }
        info!(target: "aq.pipeline", "shutdown_requested");
    }
    shutdown.cancel();
}
