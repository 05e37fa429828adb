mod api;
mod docs;
mod error;
mod fingerprint;
mod heuristics;
mod ledger;
mod llm;
mod pipeline;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docs::{DocumentStore, MetadataStore};
use ledger::events::{EventHandler, EventKind};
use ledger::network::NetworkTable;
use ledger::LedgerClient;
use llm::{ComplianceAnalyst, LlmClient};
use pipeline::reconcile::Reconciler;
use pipeline::Pipeline;
use state::{AppState, PipelineConfig, ServerConfig};

/// How often queued reconciliations are retried.
const RECONCILE_RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("docuverify=debug,tower_http=info")),
        )
        .init();

    let server = ServerConfig::from_env()?;
    let networks = NetworkTable::builtin();
    let pipeline_config = PipelineConfig::from_env()?;
    pipeline_config
        .validate(&networks)
        .context("invalid pipeline configuration")?;
    info!(
        network = %pipeline_config.network,
        notary_policy = %pipeline_config.notary_policy,
        verdict_policy = %pipeline_config.verdict_policy,
        ai_gating = %pipeline_config.ai_gating,
        "pipeline configured"
    );

    // Init storage
    let store = Arc::new(DocumentStore::new(&server.data_dir).await?);
    info!(path = ?server.data_dir, "metadata store initialized");
    let store: Arc<dyn MetadataStore> = store;

    // The wallet defaults to the node of the starting network.
    let wallet_url = match &server.wallet_rpc_url {
        Some(url) => url.clone(),
        None => networks.get(&pipeline_config.network)?.rpc_url.clone(),
    };
    let ledger = Arc::new(LedgerClient::over_http(
        networks.clone(),
        Some(&wallet_url),
        server.ledger.clone(),
    )?);
    info!(wallet = %wallet_url, networks = networks.descriptors().count(), "ledger client initialized");

    let llm_client = LlmClient::from_env()?;
    info!(model = %llm_client.model(), "compliance analyst initialized");
    let analyst: Arc<dyn ComplianceAnalyst> = Arc::new(llm_client);

    let config = Arc::new(RwLock::new(pipeline_config));
    let reconciler = Arc::new(Reconciler::new(ledger.clone(), store.clone()));
    let pipeline = Arc::new(Pipeline::new(
        ledger.clone(),
        store.clone(),
        Some(analyst),
        reconciler.clone(),
        config.clone(),
    ));

    // Event subscriptions live as long as their handles.
    let mut subscriptions = Vec::new();
    for descriptor in networks.descriptors() {
        let ctx = ledger.context(&descriptor.key)?;
        for kind in [EventKind::DocumentNotarized, EventKind::NotarizationRevoked] {
            let handler: Arc<dyn EventHandler> = reconciler.clone();
            let handle = ledger
                .subscribe(&ctx, kind, "reconciler", handler)
                .await
                .with_context(|| format!("subscribe to {kind} on {}", descriptor.key))?;
            subscriptions.push(handle);
        }
    }
    info!(count = subscriptions.len(), "ledger event subscriptions started");
    let retry_loop = reconciler.clone().spawn_retry_loop(RECONCILE_RETRY_INTERVAL);

    let app_state = AppState {
        pipeline,
        ledger,
        store,
        reconciler,
        config,
        admin_token: server.admin_token.as_deref().map(Arc::from),
        max_upload_bytes: server.max_upload_bytes,
    };
    if app_state.admin_token.is_none() {
        warn!("ADMIN_TOKEN not set; admin endpoints are open");
    }

    let app = api::router(app_state);
    let listener = tokio::net::TcpListener::bind(&server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", server.bind_addr))?;
    info!(addr = %server.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    retry_loop.abort();
    for handle in subscriptions {
        handle.unsubscribe().await;
    }
    Ok(())
}
