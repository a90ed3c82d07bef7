//! The labelbench worker process.
//!
//! A worker is launched by the API server's dispatcher with one or more
//! job ids. It runs each job's full pipeline over its dataset, persisting
//! progress to the job store after every unit, and exits non-zero if any
//! job failed as a whole.

pub mod cache;
pub mod config;
pub mod detector;
pub mod pipeline;
pub mod recognizer;
pub mod runner;

pub use runner::{RunnerError, RunnerSettings, WorkerRunner};
