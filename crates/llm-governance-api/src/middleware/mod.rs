//! Middleware layers
//!
//! - `operator`: operator token validation for admin and audit routes

pub mod operator;

pub use operator::{operator_middleware, Operator};
