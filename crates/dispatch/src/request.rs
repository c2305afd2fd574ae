//! Declarative request shapes. An action describes its HTTP call once and
//! the same template produces both the single and the batch request, so a
//! batch of one is indistinguishable from a single call.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use actionkit_core::{ActionError, ActionResult};
use actionkit_mapping::template::{render, stringify};
use actionkit_mapping::Payload;

use crate::batch::BatchEnvelope;
use crate::transport::{HttpMethod, HttpRequest, RequestBody};

type BodyFn = Arc<dyn Fn(&Payload, &Value) -> ActionResult<Value> + Send + Sync>;

#[derive(Clone)]
pub enum BodyShape {
    /// The payload itself as a JSON object.
    Json,
    /// Top-level payload entries as form fields; arrays repeat the key.
    Form,
    Empty,
    /// Built from the payload and the destination settings.
    Custom(BodyFn),
}

impl fmt::Debug for BodyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("Json"),
            Self::Form => f.write_str("Form"),
            Self::Empty => f.write_str("Empty"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub envelope: BatchEnvelope,
    /// Defaults to the single-event path.
    pub path: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl BatchSpec {
    pub fn new(envelope: BatchEnvelope) -> Self {
        Self {
            envelope,
            path: None,
            headers: Vec::new(),
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: HttpMethod,
    /// Rendered against `{ settings, payload }`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: BodyShape,
    pub batch: Option<BatchSpec>,
}

impl RequestTemplate {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: BodyShape::Json,
            batch: None,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path).body(BodyShape::Empty)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: BodyShape) -> Self {
        self.body = body;
        self
    }

    pub fn body_fn<F>(self, f: F) -> Self
    where
        F: Fn(&Payload, &Value) -> ActionResult<Value> + Send + Sync + 'static,
    {
        self.body(BodyShape::Custom(Arc::new(f)))
    }

    pub fn batch(mut self, batch: BatchSpec) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn supports_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// Path template used for batch requests, when batching is supported.
    pub fn batch_path(&self) -> Option<&str> {
        self.batch
            .as_ref()
            .map(|b| b.path.as_deref().unwrap_or(&self.path))
    }

    pub fn build(&self, base_url: &str, payload: &Payload, settings: &Value) -> ActionResult<HttpRequest> {
        let path = render_path(&self.path, settings, Some(payload));
        let mut request = HttpRequest::new(self.method, join_url(base_url, &path));
        for (name, value) in &self.headers {
            request.set_header(name.as_str(), value.as_str());
        }
        request.body = match &self.body {
            BodyShape::Json => RequestBody::Json(payload.to_value()),
            BodyShape::Form => RequestBody::Form(form_fields(payload)),
            BodyShape::Empty => RequestBody::Empty,
            BodyShape::Custom(f) => RequestBody::Json(f(payload, settings)?),
        };
        Ok(request)
    }

    /// One request carrying every payload inside the batch envelope.
    pub fn build_batch(
        &self,
        base_url: &str,
        payloads: &[Payload],
        settings: &Value,
    ) -> ActionResult<HttpRequest> {
        let batch = self
            .batch
            .as_ref()
            .ok_or_else(|| ActionError::Config("action does not support batching".to_string()))?;

        let items = payloads
            .iter()
            .map(|p| match &self.body {
                BodyShape::Custom(f) => f(p, settings),
                _ => Ok(p.to_value()),
            })
            .collect::<ActionResult<Vec<_>>>()?;

        // Payload tags are rejected by `ActionDefinition::check_references`.
        let path = render_path(batch.path.as_deref().unwrap_or(&self.path), settings, None);
        let mut request = HttpRequest::new(self.method, join_url(base_url, &path));
        for (name, value) in self.headers.iter().chain(batch.headers.iter()) {
            request.set_header(name.as_str(), value.as_str());
        }
        request.body = RequestBody::Json(batch.envelope.wrap(items));
        Ok(request)
    }
}

/// Renders a URL or path template against `{ settings, payload }`.
pub fn render_path(template: &str, settings: &Value, payload: Option<&Payload>) -> String {
    let root = json!({
        "settings": settings,
        "payload": payload.map(Payload::to_value).unwrap_or(Value::Null),
    });
    render(template, &root, false)
}

/// Absolute paths pass through; relative ones are appended to the base.
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn form_fields(payload: &Payload) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    for (key, value) in payload.as_map() {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                fields.extend(items.iter().map(|v| (key.clone(), stringify(v))));
            }
            other => fields.push((key.clone(), stringify(other))),
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => Payload::from_map(map),
            _ => Payload::from_map(Map::new()),
        }
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a.io/", "/v1/x"), "https://a.io/v1/x");
        assert_eq!(join_url("https://a.io", "v1/x"), "https://a.io/v1/x");
        assert_eq!(join_url("https://a.io", "https://b.io/y"), "https://b.io/y");
    }

    #[test]
    fn test_build_renders_path_from_settings_and_payload() {
        let template = RequestTemplate::post("/{{settings.databaseId}}/users/{{payload.userId}}")
            .header("Content-Type", "application/json");
        let request = template
            .build(
                "https://rapi.example.com",
                &payload(json!({ "userId": "u1" })),
                &json!({ "databaseId": "db-1" }),
            )
            .unwrap();
        assert_eq!(request.url, "https://rapi.example.com/db-1/users/u1");
        assert_eq!(request.json_body(), Some(&json!({ "userId": "u1" })));
    }

    #[test]
    fn test_form_body_repeats_array_keys() {
        let template = RequestTemplate::post("/Messages.json").body(BodyShape::Form);
        let request = template
            .build(
                "https://api.example.com",
                &payload(json!({ "To": "+1555", "MediaUrl": ["a", "b"], "Skip": null })),
                &Value::Null,
            )
            .unwrap();
        assert_eq!(
            request.body,
            RequestBody::Form(vec![
                ("To".into(), "+1555".into()),
                ("MediaUrl".into(), "a".into()),
                ("MediaUrl".into(), "b".into()),
            ])
        );
    }

    #[test]
    fn test_batch_of_one_matches_single_body_items() {
        let template = RequestTemplate::post("/events")
            .batch(BatchSpec::new(BatchEnvelope::wrapped("elements")).header("X-Batch", "1"));
        let p = payload(json!({ "id": 1 }));
        let single = template.build("https://a.io", &p, &Value::Null).unwrap();
        let batch = template.build_batch("https://a.io", &[p], &Value::Null).unwrap();

        assert_eq!(batch.url, single.url);
        assert_eq!(
            batch.json_body().unwrap()["elements"][0],
            single.json_body().cloned().unwrap()
        );
        assert_eq!(batch.header_value("x-batch"), Some("1"));
    }

    #[test]
    fn test_build_batch_without_spec_fails() {
        let template = RequestTemplate::post("/events");
        assert!(template.build_batch("https://a.io", &[], &Value::Null).is_err());
    }
}
