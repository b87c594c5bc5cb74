//! Per-resource window configuration.

use serde::Serialize;

use crate::error::{GatehouseError, Result};

/// Limit and window length for one protected resource.
///
/// Both values are positive by construction, so nothing downstream has to
/// guard against a zero limit or an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WindowConfig {
    limit: u32,
    window_ms: u64,
}

impl WindowConfig {
    /// Create a window config, rejecting zero values.
    pub fn new(limit: u32, window_ms: u64) -> Result<Self> {
        if limit == 0 {
            return Err(GatehouseError::Config(
                "limit must be greater than zero".to_string(),
            ));
        }
        if window_ms == 0 {
            return Err(GatehouseError::Config(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(Self { limit, window_ms })
    }

    /// Maximum attempts admitted per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }
}
