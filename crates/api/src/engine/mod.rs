//! Worker process orchestration.
//!
//! Submissions land in the [`queue::SubmissionQueue`]. The
//! [`dispatcher::Dispatcher`] launches worker processes through a
//! [`launcher::WorkerLauncher`] while capacity allows, records them in the
//! [`registry::ProcessRegistry`], and attaches one [`watchdog::Watchdog`]
//! per process to reconcile job status once it exits.

pub mod dispatcher;
pub mod launcher;
pub mod queue;
pub mod registry;
pub mod watchdog;
