//! Posture server: authenticated WebSocket sessions that score sitting
//! posture from webcam frames and journal the results.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use posture_server::auth::TokenTable;
use posture_server::config::{Config, PoseConfig, DEFAULT_CONFIG_PATH};
use posture_server::pose::{Base64ImageDecoder, ExtractorFactory};
use posture_server::recorder::JsonlRecorder;
use posture_server::server::{serve, ServerState};
use posture_server::session::SessionServices;
use posture_server::worker::WorkerPool;

#[cfg(feature = "onnx")]
fn extractor_factory(pose: &PoseConfig) -> Result<Arc<dyn ExtractorFactory>> {
    use posture_server::pose::OnnxExtractorFactory;

    anyhow::ensure!(
        std::path::Path::new(&pose.model_path).exists(),
        "pose model not found: {}",
        pose.model_path
    );
    Ok(Arc::new(OnnxExtractorFactory::new(&pose.model_path, pose.presence_threshold)))
}

#[cfg(not(feature = "onnx"))]
fn extractor_factory(_pose: &PoseConfig) -> Result<Arc<dyn ExtractorFactory>> {
    anyhow::bail!("built without a pose backend; rebuild with `--features onnx`")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)?;

    info!("Posture Server ({})", env!("GIT_VERSION"));
    info!("Config: {config_path}");
    info!("Listen: {}", config.listen_addr);
    info!("Model: {}", config.pose.model_path);

    let auth = TokenTable::new(&config.auth.users);
    if auth.is_empty() {
        warn!("no [[auth.users]] configured; every connection will be rejected");
    } else {
        info!("{} user token(s) loaded", auth.len());
    }

    let extractors = extractor_factory(&config.pose)?;
    let recorder = JsonlRecorder::open(&config.storage.path).await?;
    info!("Journal: {}", recorder.path().display());
    let pool = match config.pose.worker_threads {
        0 => WorkerPool::with_default_size()?,
        n => WorkerPool::new(n)?,
    };
    info!("Worker threads: {}", pool.size());

    let state = ServerState {
        services: SessionServices {
            recorder: Arc::new(recorder),
            pool,
            decoder: Arc::new(Base64ImageDecoder),
            extractors,
            config: config.session.clone(),
        },
        auth: Arc::new(auth),
    };

    let bind_addr: SocketAddr = config.listen_addr.parse().context("invalid listen_addr")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("Listening on {bind_addr}");

    serve(listener, state).await
}
