use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use propleads::config::BotConfig;
use propleads::extract::SignalExtractor;
use propleads::funnel::StageEngine;
use propleads::llm::{create_provider, LlmConfig};
use propleads::pipeline::MessageProcessor;
use propleads::schedule::SpanishDateParser;
use propleads::server::{self, AppState};
use propleads::store::LibSqlBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = BotConfig::from_env().context("Failed to load configuration")?;

    let db = Arc::new(
        LibSqlBackend::new_local(Path::new(&config.db_path))
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path))?,
    );

    let llm = match &config.openai_api_key {
        Some(api_key) => Some(create_provider(&LlmConfig {
            api_key: api_key.clone(),
            model: config.model.clone(),
        })?),
        None => {
            tracing::info!("No OPENAI_API_KEY configured, running with deterministic replies");
            None
        }
    };

    let engine = StageEngine::new(db.clone(), Arc::new(SpanishDateParser));
    let extractor = SignalExtractor::new(llm.clone());
    let processor = Arc::new(MessageProcessor::new(
        db.clone(),
        extractor,
        engine,
        llm,
        config.clone(),
    ));

    let app = server::router(AppState { processor });
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Webhook server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
