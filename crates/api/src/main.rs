use anyhow::Context;

use taskforge_api::app;
use taskforge_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    taskforge_observability::init(&config.log);

    let (services, engine) = app::build_services(&config);
    let engine = engine.spawn();

    let router = app::build_app(services);
    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        environment = %config.environment,
        queue = %config.queue_name,
        "listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
