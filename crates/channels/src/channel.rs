//! Messaging channels as one tagged union. Each variant knows which external
//! ids it can reach and how its vendor request looks.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use actionkit_core::{ActionResult, ValidationError};
use actionkit_dispatch::request::join_url;
use actionkit_dispatch::{HttpRequest, RequestBody};
use actionkit_mapping::template::render;

use crate::sendability::ExternalId;

/// Credentials and endpoints of the messaging account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingAccount {
    pub account_sid: String,
    pub auth_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_push_base_url")]
    pub push_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_callback_url: Option<String>,
}

fn default_api_base_url() -> String {
    "https://api.twilio.com".to_string()
}

fn default_push_base_url() -> String {
    "https://push.ashburn.us1.twilio.com".to_string()
}

impl MessagingAccount {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            api_base_url: default_api_base_url(),
            push_base_url: default_push_base_url(),
            status_callback_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum Channel {
    Sms {
        from: String,
        body: String,
    },
    Mms {
        from: String,
        #[serde(default)]
        body: String,
        #[serde(default)]
        media_urls: Vec<String>,
    },
    #[serde(rename = "whatsapp")]
    WhatsApp {
        from: String,
        body: String,
    },
    Messenger {
        page_id: String,
        body: String,
    },
    Push {
        service_sid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tap_action: Option<String>,
    },
}

/// Message text after template rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub body: String,
    pub title: Option<String>,
    pub media_urls: Vec<String>,
}

impl Channel {
    pub fn sms(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Sms {
            from: from.into(),
            body: body.into(),
        }
    }

    pub fn whatsapp(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self::WhatsApp {
            from: from.into(),
            body: body.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sms { .. } => "sms",
            Self::Mms { .. } => "mms",
            Self::WhatsApp { .. } => "whatsapp",
            Self::Messenger { .. } => "messenger",
            Self::Push { .. } => "push",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Sms { .. } => "SMS",
            Self::Mms { .. } => "MMS",
            Self::WhatsApp { .. } => "WhatsApp",
            Self::Messenger { .. } => "Messenger",
            Self::Push { .. } => "Push",
        }
    }

    pub fn supported_id_types(&self) -> &'static [&'static str] {
        match self {
            Self::Sms { .. } | Self::Mms { .. } | Self::WhatsApp { .. } => &["phone"],
            Self::Messenger { .. } => &["messenger"],
            Self::Push { .. } => &["ios.push_token", "android.push_token"],
        }
    }

    /// Id type must be supported; an explicit channel type must match this
    /// channel (MMS also accepts ids tagged for SMS).
    pub fn supports(&self, ext: &ExternalId) -> bool {
        let type_ok = self
            .supported_id_types()
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&ext.id_type));
        let channel_ok = match ext.channel_type.as_deref() {
            None | Some("") => true,
            Some(ct) => {
                ct.eq_ignore_ascii_case(self.name())
                    || (matches!(self, Self::Mms { .. }) && ct.eq_ignore_ascii_case("sms"))
            }
        };
        type_ok && channel_ok
    }

    /// Renders body, title and media URLs against `{ profile }`.
    pub fn render(&self, profile: &Value) -> Result<RenderedContent, ValidationError> {
        let root = json!({ "profile": profile });
        let text = |t: &str| render(t, &root, false);

        let content = match self {
            Self::Sms { body, .. } | Self::WhatsApp { body, .. } | Self::Messenger { body, .. } => {
                RenderedContent {
                    body: text(body),
                    title: None,
                    media_urls: Vec::new(),
                }
            }
            Self::Mms {
                body, media_urls, ..
            } => RenderedContent {
                body: text(body),
                title: None,
                media_urls: media_urls
                    .iter()
                    .map(|u| text(u))
                    .filter(|u| !u.trim().is_empty())
                    .collect(),
            },
            Self::Push { title, body, .. } => RenderedContent {
                body: text(body),
                title: title.as_deref().map(text).filter(|t| !t.is_empty()),
                media_urls: Vec::new(),
            },
        };

        if content.body.trim().is_empty() && content.media_urls.is_empty() {
            return Err(ValidationError::new(format!(
                "Unable to process {}, no body provided.",
                self.name()
            )));
        }
        Ok(content)
    }

    pub fn build_request(
        &self,
        account: &MessagingAccount,
        recipient: &ExternalId,
        content: &RenderedContent,
    ) -> ActionResult<HttpRequest> {
        let to = recipient.id.clone().unwrap_or_default();
        let (to, from) = match self {
            Self::Push {
                service_sid,
                tap_action,
                ..
            } => {
                return Ok(push_request(
                    account,
                    service_sid,
                    tap_action.as_deref(),
                    recipient,
                    content,
                ))
            }
            Self::WhatsApp { from, .. } => (format!("whatsapp:{to}"), format!("whatsapp:{from}")),
            Self::Messenger { page_id, .. } => {
                (format!("messenger:{to}"), format!("messenger:{page_id}"))
            }
            Self::Sms { from, .. } | Self::Mms { from, .. } => (to, from.clone()),
        };

        let mut form = vec![("To".to_string(), to), ("From".to_string(), from)];
        if !content.body.is_empty() {
            form.push(("Body".to_string(), content.body.clone()));
        }
        form.extend(
            content
                .media_urls
                .iter()
                .map(|u| ("MediaUrl".to_string(), u.clone())),
        );
        if let Some(callback) = &account.status_callback_url {
            form.push(("StatusCallback".to_string(), callback.clone()));
        }

        let url = join_url(
            &account.api_base_url,
            &format!("/2010-04-01/Accounts/{}/Messages.json", account.account_sid),
        );
        let mut request = HttpRequest::post(url);
        request.body = RequestBody::Form(form);
        Ok(request)
    }
}

fn push_request(
    account: &MessagingAccount,
    service_sid: &str,
    tap_action: Option<&str>,
    recipient: &ExternalId,
    content: &RenderedContent,
) -> HttpRequest {
    let url = join_url(
        &account.push_base_url,
        &format!("/v1/Services/{service_sid}/Notifications"),
    );
    let binding = if recipient.id_type.starts_with("ios") {
        "apn"
    } else {
        "fcm"
    };

    let mut body = Map::new();
    body.insert("Address".into(), Value::String(recipient.id.clone().unwrap_or_default()));
    body.insert("BindingType".into(), Value::String(binding.into()));
    body.insert("Body".into(), Value::String(content.body.clone()));
    if let Some(title) = &content.title {
        body.insert("Title".into(), Value::String(title.clone()));
    }
    if let Some(action) = tap_action {
        body.insert("Action".into(), Value::String(action.to_string()));
    }
    HttpRequest::post(url).json(Value::Object(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> MessagingAccount {
        MessagingAccount::new("AC123", "secret")
    }

    fn phone(id: &str) -> ExternalId {
        ExternalId::new("phone", id).with_status("subscribed")
    }

    #[test]
    fn test_channel_deserializes_tagged() {
        let channel: Channel = serde_json::from_value(json!({
            "channel": "whatsapp",
            "from": "+15550001111",
            "body": "Hi"
        }))
        .unwrap();
        assert_eq!(channel, Channel::whatsapp("+15550001111", "Hi"));
        assert_eq!(channel.display_name(), "WhatsApp");
    }

    #[test]
    fn test_supports_checks_type_and_channel() {
        let sms = Channel::sms("MG1", "Hi");
        assert!(sms.supports(&phone("+1555")));
        assert!(sms.supports(&phone("+1555").with_channel_type("SMS")));
        assert!(!sms.supports(&phone("+1555").with_channel_type("whatsapp")));
        assert!(!sms.supports(&ExternalId::new("email", "a@b.co")));

        let mms = Channel::Mms {
            from: "MG1".into(),
            body: String::new(),
            media_urls: vec!["https://cdn.example.com/a.png".into()],
        };
        assert!(mms.supports(&phone("+1555").with_channel_type("sms")));
    }

    #[test]
    fn test_render_uses_profile_traits() {
        let channel = Channel::sms("MG1", "Hello {{profile.traits.first_name}}!");
        let content = channel
            .render(&json!({ "traits": { "first_name": "Jane" } }))
            .unwrap();
        assert_eq!(content.body, "Hello Jane!");
    }

    #[test]
    fn test_render_rejects_empty_body() {
        let channel = Channel::sms("MG1", "{{profile.traits.missing}}");
        let err = channel.render(&json!({})).unwrap_err();
        assert_eq!(err.message, "Unable to process sms, no body provided.");
    }

    #[test]
    fn test_whatsapp_request_prefixes_addresses() {
        let channel = Channel::whatsapp("+15550001111", "Hi");
        let content = channel.render(&json!({})).unwrap();
        let request = channel
            .build_request(&account(), &phone("+15552223333"), &content)
            .unwrap();
        assert_eq!(
            request.url,
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
        assert_eq!(
            request.body,
            RequestBody::Form(vec![
                ("To".into(), "whatsapp:+15552223333".into()),
                ("From".into(), "whatsapp:+15550001111".into()),
                ("Body".into(), "Hi".into()),
            ])
        );
    }

    #[test]
    fn test_push_request_is_json() {
        let channel = Channel::Push {
            service_sid: "IS1".into(),
            title: Some("Hey {{profile.traits.name}}".into()),
            body: "Your order shipped".into(),
            tap_action: Some("open_orders".into()),
        };
        let content = channel
            .render(&json!({ "traits": { "name": "Sam" } }))
            .unwrap();
        let token = ExternalId::new("ios.push_token", "tok-123456789");
        let request = channel.build_request(&account(), &token, &content).unwrap();

        assert_eq!(
            request.url,
            "https://push.ashburn.us1.twilio.com/v1/Services/IS1/Notifications"
        );
        assert_eq!(
            request.json_body().unwrap(),
            &json!({
                "Address": "tok-123456789",
                "BindingType": "apn",
                "Body": "Your order shipped",
                "Title": "Hey Sam",
                "Action": "open_orders"
            })
        );
    }
}
