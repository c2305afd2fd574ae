//! An action is one vendor operation: its field schema, post-processing
//! hooks, validation rules, request template and dynamic-field providers.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use actionkit_core::{RawEvent, RuntimeContext, ValidationError};
use actionkit_mapping::{
    template, validator, EvalOptions, FieldSchema, MappingError, MappingOverride, Payload,
    PayloadBuilder, PostProcessor, Resolver, Rule,
};

use crate::dynamic_fields::DynamicFieldProvider;
use crate::request::RequestTemplate;

pub struct ActionDefinition {
    pub key: String,
    pub title: String,
    pub description: String,
    /// Event filter offered when a subscription is created, e.g.
    /// `type = "track" and event = "Product Added"`.
    pub default_subscription: Option<String>,
    schema: FieldSchema,
    rules: Vec<Rule>,
    processors: Vec<Arc<dyn PostProcessor>>,
    request: RequestTemplate,
    dynamic_fields: Vec<(String, Arc<dyn DynamicFieldProvider>)>,
}

impl ActionDefinition {
    pub fn new(
        key: impl Into<String>,
        title: impl Into<String>,
        schema: FieldSchema,
        request: RequestTemplate,
    ) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            description: String::new(),
            default_subscription: None,
            schema,
            rules: Vec::new(),
            processors: Vec::new(),
            request,
            dynamic_fields: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn default_subscription(mut self, filter: impl Into<String>) -> Self {
        self.default_subscription = Some(filter.into());
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn processor(mut self, processor: Arc<dyn PostProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn dynamic_field(
        mut self,
        key: impl Into<String>,
        provider: Arc<dyn DynamicFieldProvider>,
    ) -> Self {
        self.dynamic_fields.push((key.into(), provider));
        self
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn processors(&self) -> &[Arc<dyn PostProcessor>] {
        &self.processors
    }

    pub fn request(&self) -> &RequestTemplate {
        &self.request
    }

    pub fn supports_batch(&self) -> bool {
        self.request.supports_batch()
    }

    pub fn dynamic_provider(&self, field: &str) -> Option<&Arc<dyn DynamicFieldProvider>> {
        self.dynamic_fields
            .iter()
            .find(|(key, _)| key == field)
            .map(|(_, provider)| provider)
    }

    pub fn dynamic_field_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.dynamic_fields.iter().map(|(key, _)| key.as_str())
    }

    /// Every rule field, dynamic field and provider prerequisite must name a
    /// schema field or a key some post-processor produces.
    pub fn check_references(&self) -> Result<(), MappingError> {
        let produced: HashSet<String> = self
            .processors
            .iter()
            .flat_map(|p| p.produces())
            .collect();
        let known = |dotted: &str| {
            let head = dotted.split('.').next().unwrap_or(dotted);
            produced.contains(head) || self.schema.contains_path(dotted)
        };

        for rule in &self.rules {
            if let Some(reference) = rule.referenced_fields().into_iter().find(|f| !known(f)) {
                return Err(MappingError::UnknownReference {
                    field: format!("{}:rule", self.key),
                    reference: reference.to_string(),
                });
            }
        }

        if let Some(path) = self.request.batch_path() {
            let per_payload = template::tag_names(path)
                .into_iter()
                .any(|name| name == "payload" || name.starts_with("payload."));
            if per_payload {
                return Err(MappingError::PayloadInBatchPath {
                    action: self.key.clone(),
                    path: path.to_string(),
                });
            }
        }

        for (key, provider) in &self.dynamic_fields {
            if self.schema.field(key).is_none() {
                return Err(MappingError::UnknownReference {
                    field: format!("{}:dynamic", self.key),
                    reference: key.clone(),
                });
            }
            if let Some(reference) = provider.prerequisites().into_iter().find(|f| !known(f)) {
                return Err(MappingError::UnknownReference {
                    field: key.clone(),
                    reference,
                });
            }
        }
        Ok(())
    }

    /// Resolve, check field constraints, build, then run the rules. Any
    /// failure here happens before a request exists.
    pub fn prepare(
        &self,
        event: &RawEvent,
        mapping: &MappingOverride,
        runtime: &RuntimeContext,
    ) -> Result<Payload, ValidationError> {
        self.prepare_value(&event.to_value(), mapping, runtime)
    }

    pub fn prepare_value(
        &self,
        root: &Value,
        mapping: &MappingOverride,
        runtime: &RuntimeContext,
    ) -> Result<Payload, ValidationError> {
        let options = EvalOptions {
            escape_templates: runtime.escape_templates,
        };
        let resolved = Resolver::new(&self.schema)
            .with_options(options)
            .resolve_value(mapping, root)?;
        validator::check_constraints(&self.schema, &resolved)?;

        let payload = PayloadBuilder::new(&self.schema)
            .with_processors(&self.processors)
            .build(&resolved);
        validator::validate(&payload, &self.rules)?;

        debug!(action = %self.key, fields = payload.as_map().len(), "payload prepared");
        Ok(payload)
    }
}
