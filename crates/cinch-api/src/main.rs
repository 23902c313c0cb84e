//! CinchDB API Server

use std::sync::Arc;

use cinch_api::{router, AppState};
use cinch_engine::{Config, Engine};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let project_root =
        std::env::var("CINCHDB_PROJECT_ROOT").unwrap_or_else(|_| ".".to_string());
    tracing::info!("Using project at: {}", project_root);

    let engine = Arc::new(Engine::new());

    if !Config::new(&project_root).exists() {
        tracing::warn!("Project not initialized, initializing now");
        engine
            .init_project(&project_root)
            .expect("Failed to initialize project");
    }

    let state = AppState::new(project_root, engine);
    let app = router(state);

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .expect("PORT must be a valid number");

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("CinchDB API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
