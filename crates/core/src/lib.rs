//! Domain building blocks for the labelbench OCR evaluation backend.
//!
//! Everything here is free of I/O against the job store: identifiers,
//! errors, the fixed engine and field sets, dataset discovery, ground-truth
//! parsing, comparison metrics, the aggregate summary, and the wall-clock
//! [`timeout::TimeoutGuard`] used by workers.

pub mod dataset;
pub mod engine;
pub mod error;
pub mod fields;
pub mod ground_truth;
pub mod metrics;
pub mod summary;
pub mod timeout;
pub mod types;
