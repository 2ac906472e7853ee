pub mod admission;
pub mod audit;
pub mod auth;
pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod invoker;
pub mod metrics_defs;
pub mod pipeline;
pub mod query;
pub mod registry;
pub mod routes;
pub mod state;

#[cfg(test)]
pub(crate) mod testutils;

pub use config::{Config, ConfigError};

use state::AppState;
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("could not bind listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds the application state and serves until the process is stopped.
pub async fn run(config: Config) -> Result<(), RunError> {
    shared::metrics_defs::describe(metrics_defs::METRICS);
    shared::metrics_defs::describe(resolver::metrics_defs::METRICS);

    let host = config.host.clone();
    let port = config.port;

    let state = AppState::new(config);
    let app = routes::router(state);

    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(%host, port, "gateway listening");

    axum::serve(listener, app).await?;
    Ok(())
}
