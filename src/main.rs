use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use leaf_diagnosis::config::Cli;
use leaf_diagnosis::{router, AppState, CnnClassifier, LabelTable, ModelConfig, Predictor};
use tracing::{info, warn, Level};

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::INFO })
        .init();

    // the model is required state; refuse to start without it
    let model_file = {
        let cli = cli.clone();
        tokio::task::spawn_blocking(move || cli.model_file()).await??
    };
    let model = CnnClassifier::load(&model_file, ModelConfig::default())
        .with_context(|| format!("failed to load model from {}", model_file.display()))?;
    info!("Model loaded successfully from: {}", model_file.display());

    let labels = LabelTable::default();
    if model.config().num_classes != labels.len() {
        warn!(
            "model predicts {} classes but the label table has {}",
            model.config().num_classes,
            labels.len()
        );
    }

    let state = AppState {
        predictor: Predictor::new(Arc::new(model), labels),
        strict_status: cli.strict_status,
    };
    let app = router(state, cli.max_upload_bytes());

    let addr = cli.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting server on {addr} (debug={})", cli.debug);
    axum::serve(listener, app).await?;
    Ok(())
}
