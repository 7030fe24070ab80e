//! Application state wiring the delivery and stream subsystems together.
//!
//! The core services are generic over their ports; AppState pins them to the
//! concrete infra implementations and owns the shutdown token shared by the
//! background tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use courier_core::delivery::DeliveryCoordinator;
use courier_core::stream::StreamManager;
use courier_infra::config::load_config;
use courier_infra::filesystem::ensure_data_dir;
use courier_infra::llm::{ConfiguredProvider, api_key_from_env};
use courier_infra::sqlite::delivery::SqliteDeliveryStore;
use courier_infra::sqlite::pool::{DatabasePool, database_url};
use courier_infra::transport::LocalTransport;
use courier_types::config::CourierConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteCoordinator = DeliveryCoordinator<LocalTransport, SqliteDeliveryStore>;

pub type ConcreteStreamManager = StreamManager<ConfiguredProvider>;

/// Shared application state used by the CLI and the REST API.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ConcreteCoordinator>,
    pub streams: Arc<ConcreteStreamManager>,
    pub transport: Arc<LocalTransport>,
    pub config: Arc<CourierConfig>,
    pub data_dir: PathBuf,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, and wire everything.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = ensure_data_dir().await?;
        let config = load_config(&data_dir).await;
        Self::with_config(&data_dir, config).await
    }

    /// Wire services against the database in `data_dir` using `config`.
    pub async fn with_config(data_dir: &Path, config: CourierConfig) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::new(&database_url(data_dir)).await?;
        let store = Arc::new(SqliteDeliveryStore::new(db_pool));
        let transport = Arc::new(LocalTransport::new());

        let coordinator =
            DeliveryCoordinator::new(transport.clone(), store, config.delivery.clone());
        coordinator.listen_for_acks();

        let streams = build_stream_manager(&config)?;

        tracing::info!(
            data_dir = %data_dir.display(),
            provider = %config.provider.name,
            "application state initialized"
        );

        Ok(Self {
            coordinator,
            streams,
            transport,
            config: Arc::new(config),
            data_dir: data_dir.to_path_buf(),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        })
    }

    /// Start the periodic delivery cleanup and checkpoint sweep.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.coordinator.spawn_cleanup(self.shutdown.child_token()),
            self.streams.spawn_recovery_sweeper(self.shutdown.child_token()),
        ]
    }

    /// Stop background tasks, delivery workers, and open streams.
    pub async fn shutdown(&self, background: Vec<JoinHandle<()>>) {
        self.shutdown.cancel();
        for handle in background {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        self.coordinator.shutdown();
        let cancelled = self.streams.shutdown();
        tracing::info!(cancelled_streams = cancelled, "shutdown complete");
    }
}

/// Build the stream manager alone; the `stream` command needs nothing else.
pub fn build_stream_manager(config: &CourierConfig) -> anyhow::Result<Arc<ConcreteStreamManager>> {
    let provider = ConfiguredProvider::from_config(&config.provider, api_key_from_env())
        .map_err(|e| anyhow::anyhow!("cannot build provider '{}': {e}", config.provider.name))?;
    Ok(StreamManager::new(
        Arc::new(provider),
        config.stream.clone(),
        config.provider_pricing.clone(),
    ))
}
