//! `courier serve`: run the REST API until Ctrl+C or SIGTERM.

use std::future::Future;

use crate::http::router::build_router;
use crate::state::AppState;

/// Bind, serve, and drain.
///
/// Background cleanup starts before the listener accepts and stops after
/// in-flight requests finish.
pub async fn serve(
    state: AppState,
    host: Option<String>,
    port: Option<u16>,
    quiet: bool,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let background = state.spawn_background();

    tracing::info!(%addr, data_dir = %state.data_dir.display(), "courier API listening");
    if !quiet {
        println!("  Courier API listening on http://{addr}");
        println!("  Press Ctrl+C to stop");
    }

    let router = build_router(state.clone());
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await;

    state.shutdown(background).await;
    served?;

    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C, SIGTERM, or the application's own shutdown token.
fn shutdown_signal(
    token: tokio_util::sync::CancellationToken,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
            _ = token.cancelled() => {},
        }
        tracing::info!("shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_shutdown_signal_follows_token() {
        let token = CancellationToken::new();
        let signal = tokio::spawn(shutdown_signal(token.clone()));
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .unwrap()
            .unwrap();
    }
}
