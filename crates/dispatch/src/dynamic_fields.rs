//! Choice lists for fields whose options live in the vendor's account
//! (ad accounts, conversion rules, ...). Listing choices never fails: every
//! problem is reported inside the response.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use actionkit_core::{ActionError, ActionResult};
use actionkit_mapping::path;
use actionkit_mapping::template::{render, stringify};
use actionkit_mapping::Choice;

use crate::auth::AuthConfig;
use crate::dispatcher::Dispatcher;
use crate::middleware::OperationContext;
use crate::request::join_url;
use crate::transport::HttpRequest;

#[derive(Debug, Clone, Default)]
pub struct DynamicFieldContext {
    pub settings: Value,
    /// Values already chosen for other fields of the mapping.
    pub payload: Map<String, Value>,
    pub auth: AuthConfig,
    pub page: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicFieldError {
    pub message: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicFieldResponse {
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DynamicFieldError>,
}

impl DynamicFieldResponse {
    pub fn choices(choices: Vec<Choice>) -> Self {
        Self {
            choices,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            choices: Vec::new(),
            next_page: None,
            error: Some(DynamicFieldError {
                message: message.into(),
                code: code.into(),
            }),
        }
    }

    pub fn from_error(err: &ActionError) -> Self {
        Self::error(err.to_string(), err.code())
    }
}

#[async_trait]
pub trait DynamicFieldProvider: Send + Sync {
    /// Payload keys that must be chosen before this field can be listed.
    fn prerequisites(&self) -> Vec<String> {
        Vec::new()
    }

    async fn fetch(
        &self,
        dispatcher: &Dispatcher,
        operation: &OperationContext,
        base_url: &str,
        ctx: &DynamicFieldContext,
    ) -> ActionResult<DynamicFieldResponse>;
}

/// Checks prerequisites, runs the provider and folds any error into the
/// response.
pub async fn list_choices(
    provider: &dyn DynamicFieldProvider,
    dispatcher: &Dispatcher,
    operation: &OperationContext,
    base_url: &str,
    ctx: &DynamicFieldContext,
) -> DynamicFieldResponse {
    if let Some(missing) = provider
        .prerequisites()
        .into_iter()
        .find(|key| !path::is_set(path::lookup_in(&ctx.payload, key)))
    {
        return DynamicFieldResponse::error(
            format!("Please select {missing} first."),
            "MISSING_PREREQUISITE",
        );
    }

    match provider.fetch(dispatcher, operation, base_url, ctx).await {
        Ok(response) => response,
        Err(err) => {
            warn!(
                operation_id = %operation.operation_id,
                destination = %operation.destination,
                field = %operation.action,
                error = %err,
                "dynamic field lookup failed"
            );
            DynamicFieldResponse::from_error(&err)
        }
    }
}

/// GETs a templated path and maps a list in the response body to choices.
#[derive(Debug, Clone)]
pub struct HttpChoicesProvider {
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    requires: Vec<String>,
    items_path: String,
    label_path: String,
    value_path: String,
    next_page_path: Option<String>,
    page_param: Option<String>,
}

impl HttpChoicesProvider {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            requires: Vec::new(),
            items_path: "$".to_string(),
            label_path: "name".to_string(),
            value_path: "id".to_string(),
            next_page_path: None,
            page_param: None,
        }
    }

    /// Value is a template rendered against `{ settings, payload }`.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn requires(mut self, key: impl Into<String>) -> Self {
        self.requires.push(key.into());
        self
    }

    pub fn items(mut self, path: impl Into<String>) -> Self {
        self.items_path = path.into();
        self
    }

    pub fn label(mut self, path: impl Into<String>) -> Self {
        self.label_path = path.into();
        self
    }

    pub fn value(mut self, path: impl Into<String>) -> Self {
        self.value_path = path.into();
        self
    }

    pub fn paginate(mut self, next_page_path: impl Into<String>, page_param: impl Into<String>) -> Self {
        self.next_page_path = Some(next_page_path.into());
        self.page_param = Some(page_param.into());
        self
    }

    fn map_choices(&self, body: &Value) -> Vec<Choice> {
        let Some(Value::Array(items)) = path::lookup(body, &self.items_path) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let value = path::lookup(item, &self.value_path).filter(|v| !v.is_null())?;
                let label = path::lookup(item, &self.label_path)
                    .map(stringify)
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| stringify(value));
                Some(Choice::new(label, value.clone()))
            })
            .collect()
    }
}

#[async_trait]
impl DynamicFieldProvider for HttpChoicesProvider {
    fn prerequisites(&self) -> Vec<String> {
        self.requires.clone()
    }

    async fn fetch(
        &self,
        dispatcher: &Dispatcher,
        operation: &OperationContext,
        base_url: &str,
        ctx: &DynamicFieldContext,
    ) -> ActionResult<DynamicFieldResponse> {
        let root = json!({ "settings": ctx.settings, "payload": ctx.payload });
        let mut request = HttpRequest::get(join_url(base_url, &render(&self.path, &root, false)));
        for (name, value) in &self.query {
            request = request.query_param(name.as_str(), render(value, &root, false));
        }
        for (name, value) in &self.headers {
            request.set_header(name.as_str(), value.as_str());
        }
        if let (Some(param), Some(page)) = (&self.page_param, &ctx.page) {
            request = request.query_param(param.as_str(), page.as_str());
        }

        let result = dispatcher.dispatch(operation, request, &ctx.auth).await?;

        let next_page = self
            .next_page_path
            .as_deref()
            .and_then(|p| path::lookup(&result.body, p))
            .map(stringify)
            .filter(|p| !p.is_empty());

        Ok(DynamicFieldResponse {
            choices: self.map_choices(&result.body),
            next_page,
            error: None,
        })
    }
}
