//! Explicit runtime context handed to the dispatcher and resolvers in place
//! of process-wide feature-flag lookups.

use std::collections::HashMap;

use crate::config::RuntimeConfig;

#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub environment: String,
    pub escape_templates: bool,
    action_service: bool,
    features: HashMap<String, bool>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

impl RuntimeContext {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            environment: config.environment.clone(),
            escape_templates: config.escape_templates,
            action_service: config.action_service,
            features: config.features.clone(),
        }
    }

    pub fn with_feature(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.features.insert(name.into(), enabled);
        self
    }

    pub fn with_action_service(mut self, enabled: bool) -> Self {
        self.action_service = enabled;
        self
    }

    pub fn is_action_service(&self) -> bool {
        self.action_service
    }

    /// Flag lookup. Action-service mode forces every flag on; otherwise an
    /// explicit override wins over `default`.
    pub fn is_feature_active(&self, name: &str, default: bool) -> bool {
        if self.action_service {
            return true;
        }
        self.features.get(name).copied().unwrap_or(default)
    }
}
