//! Decides which of a profile's external ids may receive a message.

use serde::{Deserialize, Serialize};

use crate::channel::Channel;

/// A contact point attached to a profile: a phone number, a push token, ...
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub id_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<String>,
}

impl ExternalId {
    pub fn new(id_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            id_type: id_type.into(),
            channel_type: None,
            subscription_status: None,
        }
    }

    pub fn with_channel_type(mut self, channel_type: impl Into<String>) -> Self {
        self.channel_type = Some(channel_type.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.subscription_status = Some(status.into());
        self
    }

    /// `Some(true)` subscribed, `Some(false)` unsubscribed, `None` when the
    /// status is unrecognized. A missing status counts as subscribed only
    /// under the opt-out model.
    pub fn is_subscribed(&self, send_based_on_opt_out: bool) -> Option<bool> {
        let status = match self.subscription_status.as_deref().map(str::trim) {
            None | Some("") => return Some(send_based_on_opt_out),
            Some(s) => s.to_ascii_lowercase(),
        };
        match status.as_str() {
            "subscribed" | "true" => Some(true),
            "unsubscribed" | "false" => Some(false),
            _ => None,
        }
    }

    pub fn redacted_id(&self) -> String {
        self.id.as_deref().map(redact_pii).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendabilityStatus {
    ShouldSend,
    NotSubscribed,
    #[serde(rename = "no_supported_ids")]
    NoSupportedIds,
    InvalidSubscriptionStatus,
    SendDisabled,
}

impl SendabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShouldSend => "should_send",
            Self::NotSubscribed => "not_subscribed",
            Self::NoSupportedIds => "no_supported_ids",
            Self::InvalidSubscriptionStatus => "invalid_subscription_status",
            Self::SendDisabled => "send_disabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sendability {
    pub status: SendabilityStatus,
    /// Ids to message. Only populated for `ShouldSend`.
    pub recipients: Vec<ExternalId>,
    /// Supported ids whose subscription status was not recognized.
    pub invalid: Vec<ExternalId>,
}

impl Sendability {
    fn status(status: SendabilityStatus) -> Self {
        Self {
            status,
            recipients: Vec::new(),
            invalid: Vec::new(),
        }
    }
}

pub fn evaluate(
    channel: &Channel,
    send: bool,
    send_based_on_opt_out: bool,
    external_ids: &[ExternalId],
) -> Sendability {
    if !send {
        return Sendability::status(SendabilityStatus::SendDisabled);
    }

    let supported: Vec<(&ExternalId, Option<bool>)> = external_ids
        .iter()
        .filter(|ext| channel.supports(ext))
        .map(|ext| (ext, ext.is_subscribed(send_based_on_opt_out)))
        .collect();
    if supported.is_empty() {
        return Sendability::status(SendabilityStatus::NoSupportedIds);
    }

    let invalid: Vec<ExternalId> = supported
        .iter()
        .filter(|(_, sub)| sub.is_none())
        .map(|(ext, _)| (*ext).clone())
        .collect();
    let subscribed: Vec<&ExternalId> = supported
        .iter()
        .filter(|(_, sub)| *sub == Some(true))
        .map(|(ext, _)| *ext)
        .collect();

    if subscribed.is_empty() {
        let status = if invalid.is_empty() {
            SendabilityStatus::NotSubscribed
        } else {
            SendabilityStatus::InvalidSubscriptionStatus
        };
        return Sendability {
            status,
            recipients: Vec::new(),
            invalid,
        };
    }

    let with_ids: Vec<ExternalId> = subscribed
        .into_iter()
        .filter(|ext| ext.id.as_deref().is_some_and(|id| !id.is_empty()))
        .cloned()
        .collect();
    Sendability {
        status: if with_ids.is_empty() {
            SendabilityStatus::NoSupportedIds
        } else {
            SendabilityStatus::ShouldSend
        },
        recipients: with_ids,
        invalid,
    }
}

/// `+15551234567` -> `+15***567`; 8 characters or fewer -> `***`.
pub fn redact_pii(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}***{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sms() -> Channel {
        Channel::sms("MG123", "Hi")
    }

    #[test]
    fn test_redact_pii() {
        assert_eq!(redact_pii("+15551234567"), "+15***567");
        assert_eq!(redact_pii("12345678"), "***");
        assert_eq!(redact_pii("abc"), "***");
        assert_eq!(redact_pii(""), "");
    }

    #[test]
    fn test_subscription_status_matching() {
        let ext = ExternalId::new("phone", "+15551234567");
        assert_eq!(ext.clone().with_status("SUBSCRIBED").is_subscribed(false), Some(true));
        assert_eq!(ext.clone().with_status("true").is_subscribed(false), Some(true));
        assert_eq!(ext.clone().with_status("Unsubscribed").is_subscribed(true), Some(false));
        assert_eq!(ext.clone().with_status("did-not-subscribe").is_subscribed(false), None);
        assert_eq!(ext.clone().is_subscribed(false), Some(false));
        assert_eq!(ext.is_subscribed(true), Some(true));
    }

    #[test]
    fn test_send_disabled() {
        let ids = [ExternalId::new("phone", "+15551234567").with_status("subscribed")];
        assert_eq!(evaluate(&sms(), false, false, &ids).status, SendabilityStatus::SendDisabled);
    }

    #[test]
    fn test_no_supported_ids() {
        let ids = [ExternalId::new("email", "a@b.co").with_status("subscribed")];
        assert_eq!(evaluate(&sms(), true, false, &ids).status, SendabilityStatus::NoSupportedIds);

        let ids = [ExternalId::new("phone", "+15551234567")
            .with_channel_type("whatsapp")
            .with_status("subscribed")];
        assert_eq!(evaluate(&sms(), true, false, &ids).status, SendabilityStatus::NoSupportedIds);
    }

    #[test]
    fn test_should_send_keeps_only_subscribed() {
        let ids = [
            ExternalId::new("phone", "+15550000001").with_status("subscribed"),
            ExternalId::new("phone", "+15550000002").with_status("unsubscribed"),
            ExternalId::new("phone", "+15550000003").with_status("pending"),
        ];
        let result = evaluate(&sms(), true, false, &ids);
        assert_eq!(result.status, SendabilityStatus::ShouldSend);
        assert_eq!(result.recipients, vec![ids[0].clone()]);
        assert_eq!(result.invalid, vec![ids[2].clone()]);
    }

    #[test]
    fn test_not_subscribed_vs_invalid() {
        let ids = [ExternalId::new("phone", "+15550000001").with_status("false")];
        assert_eq!(evaluate(&sms(), true, false, &ids).status, SendabilityStatus::NotSubscribed);

        let ids = [
            ExternalId::new("phone", "+15550000001").with_status("false"),
            ExternalId::new("phone", "+15550000002").with_status("maybe"),
        ];
        let result = evaluate(&sms(), true, false, &ids);
        assert_eq!(result.status, SendabilityStatus::InvalidSubscriptionStatus);
        assert_eq!(result.invalid.len(), 1);
    }

    #[test]
    fn test_opt_out_model_sends_to_missing_status() {
        let ids = [ExternalId::new("phone", "+15550000001")];
        assert_eq!(evaluate(&sms(), true, true, &ids).status, SendabilityStatus::ShouldSend);
        assert_eq!(evaluate(&sms(), true, false, &ids).status, SendabilityStatus::NotSubscribed);
    }

    #[test]
    fn test_subscribed_without_id_is_not_sendable() {
        let ids = [ExternalId {
            id: None,
            id_type: "phone".into(),
            channel_type: None,
            subscription_status: Some("subscribed".into()),
        }];
        assert_eq!(evaluate(&sms(), true, false, &ids).status, SendabilityStatus::NoSupportedIds);
    }
}
