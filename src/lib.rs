//! Crash report search: a query compiler plus a resilient multi-index executor.
//!
//! See [`search`] for the engine itself, [`api`] for the HTTP surface.

pub mod api;
pub mod config;
pub mod error;
pub mod search;
pub mod state;

pub use error::{AppError, Result};
