// Ollama Bridge - routes Ollama generation requests to a local server or Ollama Cloud

pub mod api;
pub mod config;
pub mod proxy;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::BridgeConfig;
use proxy::Bridge;

/// Install the global subscriber; `RUST_LOG` wins over the debug flag
pub fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

/// Build the bridge and serve until `api::stop_server` is called
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr();
    let bridge = Bridge::new(config)?;

    if !bridge.config().remote_enabled() {
        tracing::warn!("OLLAMA_API_KEY is not set; mapped models will be rejected with 503");
    }

    api::start_server(api::AppState::new(bridge), &addr).await
}
