//! A destination bundles the actions of one vendor with its settings
//! schema, base URL and auth scheme. `Destination` pairs a definition with a
//! dispatcher and exposes the host-facing operations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use actionkit_core::{ActionError, ActionResult, RawEvent};
use actionkit_mapping::{validator, Expr, FieldSchema, MappingOverride, Payload, Resolver};

use crate::action::ActionDefinition;
use crate::auth::AuthConfig;
use crate::batch::{aggregate_envelope_failure, aggregate_failures, BatchResponse, ElementOutcome};
use crate::dispatcher::{DispatchResult, Dispatcher};
use crate::dynamic_fields::{list_choices, DynamicFieldContext, DynamicFieldResponse};
use crate::middleware::{Operation, OperationContext};
use crate::request::render_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    Custom,
    Basic,
    OAuth2,
}

impl AuthScheme {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Custom => "Custom",
            Self::Basic => "Basic",
            Self::OAuth2 => "OAuth 2.0",
        }
    }
}

/// What the host supplies per call: destination settings plus credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub auth: AuthConfig,
}

pub struct DestinationDefinition {
    pub name: String,
    pub slug: String,
    pub description: String,
    /// Template rendered against `{ settings }`.
    pub base_url: String,
    /// Settings key whose value, when set, replaces `base_url`.
    pub base_url_setting: Option<String>,
    pub auth_scheme: AuthScheme,
    /// Default endpoint for the OAuth refresh-token grant.
    pub token_url: Option<String>,
    settings: Option<FieldSchema>,
    actions: Vec<ActionDefinition>,
}

impl DestinationDefinition {
    pub fn new(
        name: impl Into<String>,
        slug: impl Into<String>,
        base_url: impl Into<String>,
        auth_scheme: AuthScheme,
    ) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
            description: String::new(),
            base_url: base_url.into(),
            base_url_setting: None,
            auth_scheme,
            token_url: None,
            settings: None,
            actions: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    pub fn base_url_setting(mut self, key: impl Into<String>) -> Self {
        self.base_url_setting = Some(key.into());
        self
    }

    pub fn settings(mut self, schema: FieldSchema) -> Self {
        self.settings = Some(schema);
        self
    }

    pub fn action(mut self, action: ActionDefinition) -> Self {
        self.actions.push(action);
        self
    }

    pub fn actions(&self) -> &[ActionDefinition] {
        &self.actions
    }

    pub fn settings_schema(&self) -> Option<&FieldSchema> {
        self.settings.as_ref()
    }

    pub fn find_action(&self, key: &str) -> ActionResult<&ActionDefinition> {
        self.actions
            .iter()
            .find(|a| a.key == key)
            .ok_or_else(|| {
                ActionError::Config(format!("destination '{}' has no action '{key}'", self.slug))
            })
    }

    /// Required settings present, well-typed and within their declared
    /// choices. Fields are read from the settings object under their own key.
    pub fn validate_settings(&self, settings: &Value) -> ActionResult<()> {
        let Some(schema) = &self.settings else {
            return Ok(());
        };
        let identity: MappingOverride = schema
            .fields()
            .iter()
            .map(|f| (f.key.clone(), Expr::path(f.key.clone())))
            .collect();
        let resolved = Resolver::new(schema).resolve_value(&identity, settings)?;
        validator::check_constraints(schema, &resolved)?;
        Ok(())
    }

    pub fn base_url(&self, settings: &Value) -> String {
        let custom = self
            .base_url_setting
            .as_deref()
            .and_then(|key| settings.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|uri| !uri.is_empty());
        match custom {
            Some(uri) => uri.trim_end_matches('/').to_string(),
            None => render_path(&self.base_url, settings, None),
        }
    }
}

pub struct Destination {
    definition: Arc<DestinationDefinition>,
    dispatcher: Dispatcher,
}

impl Destination {
    /// Rejects definitions whose rules or dynamic fields reference unknown
    /// fields.
    pub fn new(definition: Arc<DestinationDefinition>, dispatcher: Dispatcher) -> ActionResult<Self> {
        for action in definition.actions() {
            action.check_references()?;
        }
        Ok(Self {
            definition,
            dispatcher,
        })
    }

    pub fn definition(&self) -> &DestinationDefinition {
        &self.definition
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Builds the payload for one event without sending anything.
    pub fn preview(
        &self,
        action_key: &str,
        event: &RawEvent,
        mapping: &MappingOverride,
        config: &AdapterConfig,
    ) -> ActionResult<Payload> {
        let action = self.definition.find_action(action_key)?;
        self.definition.validate_settings(&config.settings)?;
        Ok(action.prepare(event, mapping, self.dispatcher.runtime())?)
    }

    pub async fn perform(
        &self,
        action_key: &str,
        event: &RawEvent,
        mapping: &MappingOverride,
        config: &AdapterConfig,
    ) -> ActionResult<DispatchResult> {
        let action = self.definition.find_action(action_key)?;
        self.definition.validate_settings(&config.settings)?;
        let payload = action
            .prepare(event, mapping, self.dispatcher.runtime())
            .map_err(|e| {
                warn!(
                    destination = %self.definition.slug,
                    action = %action.key,
                    code = %e.code,
                    error = %e,
                    "payload rejected"
                );
                e
            })?;

        let base_url = self.definition.base_url(&config.settings);
        let request = action.request().build(&base_url, &payload, &config.settings)?;
        let ctx = OperationContext::new(&self.definition.slug, &action.key, Operation::Perform);

        self.dispatcher.dispatch(&ctx, request, &config.auth).await
    }

    /// Invalid events are reported per element and never sent. Actions with
    /// a batch envelope send the valid ones in one call; others fall back to
    /// one call per event.
    pub async fn perform_batch(
        &self,
        action_key: &str,
        events: &[RawEvent],
        mapping: &MappingOverride,
        config: &AdapterConfig,
    ) -> ActionResult<BatchResponse> {
        let action = self.definition.find_action(action_key)?;
        self.definition.validate_settings(&config.settings)?;
        if events.is_empty() {
            return Ok(BatchResponse::default());
        }

        let runtime = self.dispatcher.runtime();
        let mut outcomes: Vec<Option<ElementOutcome>> = Vec::with_capacity(events.len());
        let mut accepted: Vec<(usize, Payload)> = Vec::new();
        for (index, event) in events.iter().enumerate() {
            match action.prepare(event, mapping, runtime) {
                Ok(payload) => {
                    accepted.push((index, payload));
                    outcomes.push(None);
                }
                Err(err) => outcomes.push(Some(ElementOutcome::Failed(err.into()))),
            }
        }

        info!(
            destination = %self.definition.slug,
            action = %action.key,
            total = events.len(),
            valid = accepted.len(),
            batched = action.supports_batch(),
            "performing batch"
        );

        if accepted.is_empty() {
            let errors = outcomes
                .into_iter()
                .filter_map(|o| match o {
                    Some(ElementOutcome::Failed(e)) => Some(e),
                    _ => None,
                })
                .collect();
            return Err(aggregate_failures(errors, events.len()));
        }

        let base_url = self.definition.base_url(&config.settings);
        let ctx = OperationContext::new(&self.definition.slug, &action.key, Operation::PerformBatch);
        let mut dispatches = Vec::new();

        if action.supports_batch() {
            let payloads: Vec<Payload> = accepted.iter().map(|(_, p)| p.clone()).collect();
            let request = action
                .request()
                .build_batch(&base_url, &payloads, &config.settings)?;
            let mut result = match self.dispatcher.dispatch(&ctx, request, &config.auth).await {
                Ok(result) => result,
                Err(err) => {
                    let rejected = outcomes
                        .into_iter()
                        .filter_map(|o| match o {
                            Some(ElementOutcome::Failed(e)) => Some(e),
                            _ => None,
                        })
                        .collect();
                    return Err(aggregate_envelope_failure(err, rejected, events.len()));
                }
            };
            result.event_count = payloads.len();
            dispatches.push(result);
            for (index, _) in &accepted {
                outcomes[*index] = Some(ElementOutcome::Delivered { dispatch: 0 });
            }
        } else {
            let mut auth = config.auth.clone();
            for (index, payload) in &accepted {
                let outcome = match action.request().build(&base_url, payload, &config.settings) {
                    Ok(request) => self.dispatcher.dispatch(&ctx, request, &auth).await,
                    Err(err) => Err(err),
                };
                outcomes[*index] = Some(match outcome {
                    Ok(result) => {
                        if let Some(token) = &result.refreshed_token {
                            auth = auth.with_refreshed(token);
                        }
                        dispatches.push(result);
                        ElementOutcome::Delivered {
                            dispatch: dispatches.len() - 1,
                        }
                    }
                    Err(err) => ElementOutcome::Failed(err),
                });
            }
            if dispatches.is_empty() {
                let errors = outcomes
                    .into_iter()
                    .filter_map(|o| match o {
                        Some(ElementOutcome::Failed(e)) => Some(e),
                        _ => None,
                    })
                    .collect();
                return Err(aggregate_failures(errors, events.len()));
            }
        }

        Ok(BatchResponse {
            dispatches,
            outcomes: outcomes.into_iter().flatten().collect(),
        })
    }

    /// Choices for a dynamic field. Never fails.
    pub async fn list_choices(
        &self,
        action_key: &str,
        field: &str,
        ctx: &DynamicFieldContext,
    ) -> DynamicFieldResponse {
        let action = match self.definition.find_action(action_key) {
            Ok(action) => action,
            Err(err) => return DynamicFieldResponse::from_error(&err),
        };
        let Some(provider) = action.dynamic_provider(field) else {
            return DynamicFieldResponse::error(
                format!("No dynamic choices are available for field '{field}'."),
                "NOT_FOUND",
            );
        };
        let operation = OperationContext::new(&self.definition.slug, field, Operation::ListChoices);
        let base_url = self.definition.base_url(&ctx.settings);
        list_choices(provider.as_ref(), &self.dispatcher, &operation, &base_url, ctx).await
    }
}
