use ollama_bridge::{api, config, init_tracing, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config()?;
    init_tracing(config.debug);

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            if let Err(e) = api::stop_server().await {
                tracing::error!("Failed to stop server: {}", e);
            }
        }
    });

    run(config).await
}
