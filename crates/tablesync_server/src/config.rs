//! Server configuration.

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of deltas returned by one pull.
    pub max_pull_batch: usize,
    /// Maximum number of operations accepted in one push.
    pub max_push_batch: usize,
    /// Whether the debug reset route is served.
    pub debug_routes: bool,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_pull_batch: 100,
            max_push_batch: 100,
            debug_routes: false,
        }
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: usize) -> Self {
        self.max_pull_batch = size.max(1);
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size.max(1);
        self
    }

    /// Enables `DELETE /debug/reset`.
    pub fn with_debug_routes(mut self, enabled: bool) -> Self {
        self.debug_routes = enabled;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_pull_batch, 100);
        assert_eq!(config.max_push_batch, 100);
        assert!(!config.debug_routes);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_pull_batch(10)
            .with_max_push_batch(0)
            .with_debug_routes(true);

        assert_eq!(config.max_pull_batch, 10);
        assert_eq!(config.max_push_batch, 1);
        assert!(config.debug_routes);
    }
}
