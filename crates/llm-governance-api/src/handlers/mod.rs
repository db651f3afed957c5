//! HTTP request handlers

pub mod admin;
pub mod audit;
pub mod decide;
pub mod health;

pub use decide::decide;
pub use health::{health, live, ready, version};
