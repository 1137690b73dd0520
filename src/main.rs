use sds_gateway_api::routes::{router, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let state = AppState::from_env();
    match &state.backend_url {
        Some(url) => tracing::info!("forwarding parse requests to {}", url),
        None => tracing::warn!("BACKEND_URL not set, API requests will return a configuration error"),
    }

    let addr = std::env::var("GATEWAY_BIND").unwrap_or_else(|_| "0.0.0.0:8000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, router(state)).await.unwrap();
}
