//! Integration scenarios.

pub mod concurrency;
pub mod flows;
