//! Application state shared across handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthService;

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    /// Cancelled on shutdown; in-flight provider calls derive child tokens from it.
    pub shutdown: CancellationToken,
    /// Origins allowed to make credentialed cross-origin requests.
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(auth: Arc<AuthService>, shutdown: CancellationToken) -> Self {
        Self {
            auth,
            shutdown,
            allowed_origins: Arc::new(Vec::new()),
        }
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Arc::new(origins);
        self
    }
}
