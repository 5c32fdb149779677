mod assistant;
mod classify;
mod config;
mod error;
mod images;
mod model;
mod prompt;
mod search;
mod server;
mod store;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use llm_common::openai::{OpenAiClient, OpenAiClientConfig};

use assistant::Assistant;
use config::Config;
use images::ImageStore;
use store::DocumentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting care-assistant");

    let config = Config::from_env()?;
    info!(
        model = %config.model_name,
        knowledge_path = %config.knowledge_path.display(),
        upload_dir = %config.upload_dir.display(),
        top_k = config.top_k,
        "configuration loaded"
    );

    let client_config =
        OpenAiClientConfig::from_env().map_err(|e| error::AppError::Config(e.to_string()))?;
    if client_config.api_key.is_none() {
        warn!("AZURE_API_KEY is not set, completion requests will be rejected upstream");
    }
    info!(
        base_url = %client_config.base_url,
        timeout_ms = client_config.default_timeout.as_millis(),
        max_retries = client_config.max_retries,
        "completion client configured"
    );
    let client = Arc::new(OpenAiClient::new(client_config).map_err(error::AppError::from)?);

    let store = DocumentStore::load(&config.knowledge_path);
    info!(documents = store.len(), "knowledge base ready");

    let images = ImageStore::open(&config.upload_dir).map_err(error::AppError::from)?;

    let assistant = Arc::new(Assistant::new(
        client,
        config.model_name.clone(),
        config.top_k,
        store,
        images,
    ));
    let app = server::router(assistant, config.max_upload_bytes);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(listen_addr = %config.listen_addr, "HTTP server ready");
    axum::serve(listener, app).await?;
    info!("HTTP server shut down");
    Ok(())
}
