pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::search::SearchService;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchService>,
    /// Longest a search may run before it is cancelled
    pub request_timeout: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(search: Arc<SearchService>) -> Self {
        Self {
            search,
            request_timeout: Duration::from_secs(60),
            started_at: Instant::now(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
