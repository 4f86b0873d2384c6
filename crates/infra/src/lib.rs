//! Infrastructure layer: the job engine and storage adapters.

pub mod jobs;
pub mod tasks;
