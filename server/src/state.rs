//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the peer registry for the lifetime of the server; there is no
//! process-wide singleton. Clone is required by Axum, so the registry is
//! `Arc`-wrapped.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    /// Capacity of each connection's outbound queue.
    pub queue_capacity: usize,
}

impl AppState {
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self { registry: Arc::new(Registry::new()), queue_capacity: config.queue_capacity }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
