mod analytics;
mod config;
mod error;
mod handler;
mod logger;
mod middleware;
mod models;
mod pipeline;
mod response;
mod routes;
mod service;
mod state;
mod tracer;

use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use log::{error, info};
use opentelemetry::global;
use opentelemetry::global::shutdown_tracer_provider;
use tokio::signal;
use config::settings::SETTINGS;
use crate::analytics::events::AnalyticsTracker;
use crate::config::parameter;
use crate::logger::logger::setup_logger;
use crate::pipeline::inference::backend::InferenceBackend;
use crate::pipeline::inference::triton_http::TritonHttpClient;
use crate::pipeline::liveness_pipeline::liveness_pipeline::LivenessPipeline;
use crate::pipeline::session::challenge::ChallengeOrchestrator;
use crate::pipeline::session::session_store::SessionStore;
use crate::pipeline::token::proof_token::ProofTokenIssuer;
use crate::routes::root::{root_routes, RouterState};
use crate::tracer::tracer::init_tracer_provider;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = parameter::init();

    // Setup logger
    setup_logger(SETTINGS.logger.as_ref());
    if let Some(path) = env_file {
        info!("loaded environment from {}", path.display());
    }
    let addr = format!("0.0.0.0:{}", SETTINGS.server.http_port);

    // Setup tracing
    if SETTINGS.tracer.enabled {
        let tracer_provider = init_tracer_provider(&SETTINGS.tracer, &SETTINGS.app.name)
            .context("failed to initialize tracer provider")?;
        global::set_tracer_provider(tracer_provider);
    }

    // Setup pipeline
    let inference_timeout = Duration::from_millis(SETTINGS.triton.timeout_ms);
    let backend = inference_backend(inference_timeout).await?;
    let pipeline = LivenessPipeline::from_backend(
        backend,
        &SETTINGS.antispoofing,
        &SETTINGS.detection,
        &SETTINGS.gesture,
        inference_timeout,
    )
        .context("failed to init liveness pipeline")?;

    let orchestrator = Arc::new(ChallengeOrchestrator::new(
        Arc::new(pipeline),
        Arc::new(SessionStore::new(Duration::from_secs(SETTINGS.session.ttl_secs))),
        Arc::new(ProofTokenIssuer::from_settings(&SETTINGS.token)),
        AnalyticsTracker::new(),
        SETTINGS.session.max_attempts,
    ));
    let sweeper = orchestrator.spawn_sweeper(Duration::from_secs(SETTINGS.session.sweep_interval_secs.max(1)));
    info!("completed initializing pipelines");

    // Init server
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("starting api server on {:?}", addr);
    let router_state = RouterState::new(orchestrator)
        .api_key(SETTINGS.server.api_key.as_deref())
        .request_timeout(SETTINGS.server.request_timeout)
        .allowed_origins(SETTINGS.server.allowed_origins.as_deref());

    axum::serve(listener, root_routes(router_state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("api server failed")?;

    sweeper.abort();
    shutdown_tracer_provider();
    Ok(())
}

/// Triton client with every configured model registered. A model missing
/// from the server is fatal.
async fn inference_backend(timeout: Duration) -> anyhow::Result<Arc<dyn InferenceBackend>> {
    let mut client = TritonHttpClient::new(&SETTINGS.triton.http_url, timeout)
        .context("failed to init inference client")?;

    let mut model_names = vec![
        SETTINGS.detection.face_model.as_str(),
        SETTINGS.detection.face_mesh_model.as_str(),
        SETTINGS.detection.hand_model.as_str(),
    ];
    model_names.extend(SETTINGS.antispoofing.models.iter().map(|m| m.name.as_str()));

    if let Err(e) = client.register_models(&model_names).await {
        error!("failed to register models on {}: {e}", SETTINGS.triton.http_url);
        return Err(e).context("inference backend is not ready");
    }
    Ok(Arc::new(client))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
