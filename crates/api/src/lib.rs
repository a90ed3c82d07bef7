//! HTTP request layer and process orchestration for labelbench.
//!
//! The [`orchestrator::Orchestrator`] owns the submission queue, process
//! registry and dispatcher; axum handlers reach it through
//! [`state::AppState`].

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod query;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
