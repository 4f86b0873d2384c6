//! `taskforge-core`: shared building blocks.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): typed
//! identifiers, the error model, the entity trait and the clock abstraction.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{JobId, TaskId};
