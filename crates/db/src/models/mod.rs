pub mod job;
pub mod status;
pub mod summary;
pub mod unit;
