//! Sends one message to every sendable recipient of a profile.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use actionkit_core::{ActionError, ActionResult};
use actionkit_dispatch::{AuthConfig, DispatchResult, Dispatcher, Operation, OperationContext};

use crate::channel::{Channel, MessagingAccount};
use crate::sendability::{evaluate, ExternalId, SendabilityStatus};

/// Per-profile send input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default = "default_send")]
    pub send: bool,
    #[serde(default)]
    pub send_based_on_opt_out: bool,
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
    #[serde(default)]
    pub traits: Map<String, Value>,
}

fn default_send() -> bool {
    true
}

#[derive(Debug)]
pub struct RecipientResult {
    /// Redacted recipient id.
    pub recipient: String,
    pub outcome: ActionResult<DispatchResult>,
}

#[derive(Debug)]
pub struct SendReport {
    pub status: SendabilityStatus,
    pub results: Vec<RecipientResult>,
}

impl SendReport {
    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_ok()).count()
    }
}

pub struct MessageSender {
    channel: Channel,
    account: MessagingAccount,
    dispatcher: Dispatcher,
}

impl MessageSender {
    pub fn new(channel: Channel, account: MessagingAccount, dispatcher: Dispatcher) -> Self {
        Self {
            channel,
            account,
            dispatcher,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Evaluates sendability, renders the content once, then dispatches one
    /// request per recipient. Fails only when every recipient failed.
    pub async fn send(&self, request: &MessageRequest) -> ActionResult<SendReport> {
        let sendability = evaluate(
            &self.channel,
            request.send,
            request.send_based_on_opt_out,
            &request.external_ids,
        );
        metrics::counter!(
            "actionkit.messaging.sendability",
            "channel" => self.channel.name(),
            "status" => sendability.status.as_str()
        )
        .increment(1);

        if sendability.status != SendabilityStatus::ShouldSend {
            info!(
                channel = self.channel.name(),
                status = sendability.status.as_str(),
                invalid = sendability.invalid.len(),
                "not sending message"
            );
            return Ok(SendReport {
                status: sendability.status,
                results: Vec::new(),
            });
        }

        let redacted: Vec<String> = sendability
            .recipients
            .iter()
            .map(ExternalId::redacted_id)
            .collect();
        info!(
            channel = self.channel.name(),
            recipients = %redacted.join(", "),
            "sending message"
        );

        let profile = json!({ "user_id": request.user_id, "traits": request.traits });
        let content = self.channel.render(&profile)?;
        let auth = AuthConfig::basic(&self.account.account_sid, &self.account.auth_token);

        let mut results = Vec::with_capacity(sendability.recipients.len());
        for (recipient, redacted_id) in sendability.recipients.iter().zip(redacted) {
            let ctx = OperationContext::new("messaging", self.channel.name(), Operation::SendMessage);
            let outcome = match self.channel.build_request(&self.account, recipient, &content) {
                Ok(http) => self.dispatcher.dispatch(&ctx, http, &auth).await,
                Err(err) => Err(err),
            };
            if let Err(err) = &outcome {
                warn!(
                    channel = self.channel.name(),
                    recipient = %redacted_id,
                    code = %err.code(),
                    error = %err,
                    "message send failed"
                );
            }
            results.push(RecipientResult {
                recipient: redacted_id,
                outcome,
            });
        }

        if results.iter().all(|r| r.outcome.is_err()) {
            let errors = results
                .into_iter()
                .filter_map(|r| r.outcome.err())
                .collect();
            return Err(aggregate_send_failures(errors));
        }

        Ok(SendReport {
            status: SendabilityStatus::ShouldSend,
            results,
        })
    }
}

/// A single failure is returned as is. Otherwise the first retryable error
/// (or the first error) is annotated so the host retries when any
/// recipient may still succeed.
fn aggregate_send_failures(mut errors: Vec<ActionError>) -> ActionError {
    if errors.len() <= 1 {
        return errors
            .pop()
            .unwrap_or_else(|| ActionError::Config("no recipients to send to".to_string()));
    }
    let total = errors.len();
    let index = errors.iter().position(ActionError::is_retryable).unwrap_or(0);
    let first = errors.swap_remove(index);
    let kind = if first.is_retryable() {
        "retryable"
    } else {
        "not-retryable"
    };
    let message = format!("Failed to send to all {total} subscribed recipients ({kind}): {first}");
    match first {
        ActionError::Retryable {
            status, retry_after, ..
        } => ActionError::Retryable {
            message,
            status,
            retry_after,
        },
        other => ActionError::Integration {
            message,
            code: other.code(),
            status: other.status(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actionkit_dispatch::testing::MockTransport;
    use actionkit_dispatch::{HttpResponse, RequestBody};
    use std::sync::Arc;

    fn sender(transport: Arc<MockTransport>) -> MessageSender {
        MessageSender::new(
            Channel::sms("MG1111", "Hello {{profile.traits.first_name}}"),
            MessagingAccount::new("AC123", "secret"),
            Dispatcher::new(transport),
        )
    }

    fn request(ids: Vec<ExternalId>) -> MessageRequest {
        let mut traits = Map::new();
        traits.insert("first_name".into(), json!("Jane"));
        MessageRequest {
            user_id: Some("jane".into()),
            send: true,
            send_based_on_opt_out: false,
            external_ids: ids,
            traits,
        }
    }

    #[tokio::test]
    async fn test_sends_one_request_per_recipient() {
        let transport = Arc::new(MockTransport::new());
        let ids = vec![
            ExternalId::new("phone", "+15550000001").with_status("subscribed"),
            ExternalId::new("email", "jane@example.com").with_status("subscribed"),
            ExternalId::new("phone", "+15550000002").with_status("subscribed"),
        ];

        let report = sender(transport.clone()).send(&request(ids)).await.unwrap();

        assert_eq!(report.status, SendabilityStatus::ShouldSend);
        assert_eq!(report.delivered(), 2);
        assert_eq!(report.results[0].recipient, "+15***001");
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].header_value("authorization"), Some("Basic QUMxMjM6c2VjcmV0"));
        assert_eq!(
            requests[0].body,
            RequestBody::Form(vec![
                ("To".into(), "+15550000001".into()),
                ("From".into(), "MG1111".into()),
                ("Body".into(), "Hello Jane".into()),
            ])
        );
    }

    #[tokio::test]
    async fn test_not_subscribed_sends_nothing() {
        let transport = Arc::new(MockTransport::new());
        let ids = vec![ExternalId::new("phone", "+15550000001").with_status("unsubscribed")];

        let report = sender(transport.clone()).send(&request(ids)).await.unwrap();

        assert_eq!(report.status, SendabilityStatus::NotSubscribed);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_single_failure_is_returned_as_is() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse::json(
            400,
            &serde_json::json!({ "code": 21211, "message": "Invalid 'To' Phone Number" }),
        ));
        let ids = vec![ExternalId::new("phone", "+15550000001").with_status("subscribed")];

        let err = sender(transport).send(&request(ids)).await.unwrap_err();

        assert_eq!(err.code(), "21211");
        assert_eq!(err.to_string(), "Invalid 'To' Phone Number");
    }

    #[tokio::test]
    async fn test_all_failed_prefers_retryable() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse::json(400, &json!({ "message": "bad number" })));
        transport.push_response(HttpResponse::json(503, &json!({ "message": "unavailable" })));
        let ids = vec![
            ExternalId::new("phone", "+15550000001").with_status("subscribed"),
            ExternalId::new("phone", "+15550000002").with_status("subscribed"),
        ];

        let err = sender(transport).send(&request(ids)).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.status(), 503);
        assert_eq!(
            err.to_string(),
            "Failed to send to all 2 subscribed recipients (retryable): unavailable"
        );
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported_per_recipient() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse::json(400, &json!({ "message": "bad number" })));
        let ids = vec![
            ExternalId::new("phone", "+15550000001").with_status("subscribed"),
            ExternalId::new("phone", "+15550000002").with_status("subscribed"),
        ];

        let report = sender(transport).send(&request(ids)).await.unwrap();

        assert_eq!(report.delivered(), 1);
        assert!(report.results[0].outcome.is_err());
    }
}
