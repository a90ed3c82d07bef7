//! SQL repositories. Each is a zero-sized struct of associated functions
//! taking `&PgPool`; retries live one layer up in [`crate::pg`].

pub mod job_repo;
pub mod summary_repo;
pub mod unit_result_repo;

pub use job_repo::JobRepo;
pub use summary_repo::SummaryRepo;
pub use unit_result_repo::UnitResultRepo;
