use std::sync::Arc;

use crate::config::ServerConfig;
use crate::orchestrator::Orchestrator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job store, queue, registry and dispatcher.
    pub orchestrator: Arc<Orchestrator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
