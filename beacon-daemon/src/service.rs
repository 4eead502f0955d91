//! Daemon wiring
//!
//! Builds the whole service from a validated config: database, key
//! registry (bootstrapped on first start), processor, retry worker, sync
//! engine, and the HTTP shell. No global state; everything flows in
//! through construction.

use crate::api::{self, ApiState};
use crate::config::Config;
use crate::node_rpc::{LogOnlyNodeAdapter, RpcNodeAdapter};
use crate::webhook::{HttpWebhook, LogOnlyWebhook};
use anyhow::Context;
use beacon_core::{
    spawn_retry_worker, Processor, RedbAlertStore, RedbKeyRegistry,
};
use beacon_model::{AlertStore, KeyRegistry, NodeAdapter, WebhookSink};
use beacon_net::{SessionConfig, SyncEngine, SyncEngineConfig};
use redb::Database;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Service {
    engine: Arc<SyncEngine>,
    retry_handle: JoinHandle<()>,
    api_handle: JoinHandle<()>,
    token: CancellationToken,
}

impl Service {
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
        let db = Arc::new(
            Database::create(config.data_dir.join("beacon.redb"))
                .context("opening database")?,
        );

        let store: Arc<dyn AlertStore> =
            Arc::new(RedbAlertStore::new(db.clone()).context("opening alert store")?);
        let registry =
            Arc::new(RedbKeyRegistry::new(db, config.threshold).context("opening key registry")?);

        if registry.is_empty().context("checking key registry")? {
            registry
                .bootstrap(&config.genesis_keys)
                .await
                .context("bootstrapping genesis keys")?;
            info!(keys = config.genesis_keys.len(), "bootstrapped genesis key set");
        }

        let node: Arc<dyn NodeAdapter> = match &config.rpc {
            Some(rpc) => Arc::new(RpcNodeAdapter::new(rpc.clone()).context("building rpc client")?),
            None => {
                info!("running without a node; administrative actions will only be logged");
                Arc::new(LogOnlyNodeAdapter)
            }
        };
        let webhook: Arc<dyn WebhookSink> = match &config.webhook_url {
            Some(url) => Arc::new(HttpWebhook::new(url.clone()).context("building webhook client")?),
            None => Arc::new(LogOnlyWebhook),
        };

        let processor = Arc::new(Processor::new(
            store.clone(),
            registry,
            node,
            webhook,
        ));

        let token = CancellationToken::new();
        let retry_handle = spawn_retry_worker(
            processor.clone(),
            config.retry_interval,
            token.clone(),
        );

        let engine = Arc::new(SyncEngine::new(
            SyncEngineConfig {
                listen: Some(config.p2p_listen),
                peers: config.peers.clone(),
                session: SessionConfig::default(),
            },
            processor.clone(),
            store.clone(),
            token.clone(),
        ));
        engine.start().await.context("starting sync engine")?;

        let api_state = ApiState {
            store,
            processor,
            status: engine.status(),
            threshold: config.threshold,
        };
        let listener = tokio::net::TcpListener::bind(config.api_listen)
            .await
            .with_context(|| format!("binding api listener on {}", config.api_listen))?;
        info!(addr = %config.api_listen, "http api started");

        let api_token = token.clone();
        let api_handle = tokio::spawn(async move {
            let shutdown = async move { api_token.cancelled().await };
            if let Err(err) = axum::serve(listener, api::router(api_state))
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %err, "http api failed");
            }
        });

        Ok(Self {
            engine,
            retry_handle,
            api_handle,
            token,
        })
    }

    /// Block until SIGINT/SIGTERM arrives (or the token is cancelled from
    /// elsewhere), then stop every worker.
    pub async fn run(self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = shutdown_requested() => {
                info!("shutdown signal received");
            }
        }
        self.shutdown().await;
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        self.engine.shutdown();
        let _ = self.retry_handle.await;
        let _ = self.api_handle.await;
    }
}

#[cfg(unix)]
async fn shutdown_requested() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt = signal(SignalKind::interrupt()).expect("SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("SIGTERM handler");
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_requested() {
    let _ = tokio::signal::ctrl_c().await;
}
