use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use price_trigger::{config, routes, services::ingestor::PriceIngestor, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,price_trigger=debug")),
        )
        .init();

    let settings = config::load();
    let addr = SocketAddr::from((settings.host.parse::<std::net::IpAddr>()?, settings.port));

    let state = AppState::connect(settings.clone()).await?;

    let ingestor = PriceIngestor::new(&settings, state.matcher(state.sink()));
    tracing::info!(url = ingestor.url(), "starting price ingestor");
    let ingest_task = tokio::spawn(ingestor.run(state.shutdown.subscribe()));

    let app = routes::app(state.clone());

    tracing::info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested");
            // ends the ingestor and every open /events stream
            state.begin_shutdown();
        })
        .await?;

    // let an in-flight evaluation finish before exiting
    if let Err(e) = ingest_task.await {
        tracing::error!(error = %e, "price ingestor task panicked");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
