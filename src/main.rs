mod cobalt;
mod config;
mod error;
mod jobs;
mod ratelimit;
mod routes;
mod store;
mod transcribe;
mod youtube;

use std::{net::SocketAddr, sync::Arc};

use axum::http::{HeaderValue, Method};
use tokio::{net::TcpListener, sync::mpsc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::{
    cobalt::CobaltClient,
    config::Config,
    error::ApiError,
    jobs::JobService,
    routes::AppState,
    store::JsonStore,
    transcribe::{HttpTranscriber, Transcriber},
    youtube::OembedLookup,
};

const UPSTREAM_TIMEOUT_SECONDS: u64 = 60;
const RATE_LIMIT_SWEEP_SECONDS: u64 = 5 * 60;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tubefetch=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .map_err(|error| ApiError::internal(format!("Could not create data dir: {error}")))?;
    let store = Arc::new(JsonStore::open(&config.data_dir).await?);

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECONDS))
        .build()
        .map_err(|error| ApiError::internal(format!("Could not build HTTP client: {error}")))?;

    let lookup = Arc::new(OembedLookup::new(http_client.clone()));
    let extractor = Arc::new(CobaltClient::new(
        http_client.clone(),
        config.cobalt_api_url.clone(),
    ));
    let transcriber = config
        .transcribe_api_url
        .clone()
        .map(|url| Arc::new(HttpTranscriber::new(http_client, url)) as Arc<dyn Transcriber>);
    if transcriber.is_some() {
        info!("transcription backend configured");
    }

    let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel();
    let service = Arc::new(JobService::new(
        store,
        lookup,
        extractor,
        transcriber,
        dispatch_tx,
    ));

    // Dispatch worker: consumes the job ids enqueued by create(). Jobs are
    // independent; a failure only affects the job that produced it.
    let worker = Arc::clone(&service);
    tokio::spawn(async move {
        while let Some(job_id) = dispatch_rx.recv().await {
            if let Err(error) = worker.dispatch(job_id).await {
                warn!(job_id = %job_id, "dispatch failed: {error}");
            }
        }
    });

    let sweeper = Arc::clone(&service);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RATE_LIMIT_SWEEP_SECONDS));
        loop {
            interval.tick().await;
            sweeper.sweep_rate_limits();
        }
    });

    let state = AppState {
        service,
        internal_secret: config.internal_secret.clone(),
        trust_proxy_headers: config.trust_proxy_headers,
    };
    let app = routes::router(state).layer(build_cors_layer(&config)?);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|error| {
            ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
        })?;
    info!("tubefetch listening on http://{}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

fn build_cors_layer(config: &Config) -> Result<CorsLayer, ApiError> {
    let origins = if config.allowed_origins.is_empty() {
        warn!("ALLOWED_ORIGINS not set, using development defaults");
        vec![
            "http://127.0.0.1:3000".to_string(),
            "http://localhost:3000".to_string(),
        ]
    } else {
        config.allowed_origins.clone()
    };

    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|_| {
                ApiError::internal(format!("Invalid origin in ALLOWED_ORIGINS: {origin}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any))
}
