//! Per-route rate limit policies.
//!
//! Policies are loaded from YAML:
//!
//! ```yaml
//! policies:
//!   - path: /api/image-generator
//!     name: image-generator
//!     limit: 3
//!     window_ms: 60000
//!     message: "Image generation is limited to 3 per minute."
//! ```
//!
//! Paths are matched exactly against the request path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::window::WindowConfig;
use crate::error::{GatehouseError, Result};

/// Rejection message used when a policy does not define its own.
pub const DEFAULT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// A rule as written in the policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Request path this rule protects
    pub path: String,
    /// Optional name used in logs
    #[serde(default)]
    pub name: Option<String>,
    /// Attempts allowed per window
    pub limit: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Message returned to rejected callers
    #[serde(default)]
    pub message: Option<String>,
}

/// Top-level shape of a policy file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
}

/// A validated policy for one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub path: String,
    pub name: String,
    pub window: WindowConfig,
    pub message: String,
}

impl TryFrom<PolicyRule> for RoutePolicy {
    type Error = GatehouseError;

    fn try_from(rule: PolicyRule) -> Result<Self> {
        if !rule.path.starts_with('/') {
            return Err(GatehouseError::Config(format!(
                "policy path must start with '/': {}",
                rule.path
            )));
        }

        let window = WindowConfig::new(rule.limit, rule.window_ms).map_err(|e| {
            GatehouseError::Config(format!("invalid policy for {}: {}", rule.path, e))
        })?;

        Ok(Self {
            name: rule.name.unwrap_or_else(|| rule.path.clone()),
            message: rule.message.unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
            path: rule.path,
            window,
        })
    }
}

/// Lookup table of route policies keyed by path.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    routes: HashMap<String, RoutePolicy>,
}

impl PolicyTable {
    /// Create an empty table. Nothing is protected.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in policies for the site's AI demo endpoints.
    pub fn builtin() -> Result<Self> {
        let rules = vec![
            PolicyRule {
                path: "/api/image-generator".to_string(),
                name: Some("image-generator".to_string()),
                limit: 3,
                window_ms: 60_000,
                message: Some(
                    "Rate limit exceeded. Image generation is limited to 3 per minute. \
                     Please try again later."
                        .to_string(),
                ),
            },
            PolicyRule {
                path: "/api/voice-agent".to_string(),
                name: Some("voice-agent".to_string()),
                limit: 5,
                window_ms: 60_000,
                message: None,
            },
            PolicyRule {
                path: "/api/sentiment-classifier".to_string(),
                name: Some("sentiment-classifier".to_string()),
                limit: 15,
                window_ms: 60_000,
                message: None,
            },
        ];

        Self::from_rules(rules)
    }

    /// Build a table from parsed rules, rejecting invalid or duplicate paths.
    pub fn from_rules(rules: Vec<PolicyRule>) -> Result<Self> {
        let mut routes = HashMap::with_capacity(rules.len());
        for rule in rules {
            let policy = RoutePolicy::try_from(rule)?;
            if routes.contains_key(&policy.path) {
                return Err(GatehouseError::Config(format!(
                    "duplicate policy for path {}",
                    policy.path
                )));
            }
            routes.insert(policy.path.clone(), policy);
        }
        Ok(Self { routes })
    }

    /// Load policies from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PolicyFile = serde_yaml::from_str(yaml)?;
        Self::from_rules(file.policies)
    }

    /// Load policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Find the policy protecting `path`, if any.
    pub fn find(&self, path: &str) -> Option<&RoutePolicy> {
        self.routes.get(path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterate over all policies in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &RoutePolicy> {
        self.routes.values()
    }
}
