use std::sync::Arc;

use identicore_server::{AppState, NullRecognizer, ServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "identicore_server=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let (state, _worker) = AppState::new(&config, Arc::new(NullRecognizer))?;

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("Identicore server listening on {}", listener.local_addr()?);
    identicore_server::serve(listener, state).await?;
    Ok(())
}
