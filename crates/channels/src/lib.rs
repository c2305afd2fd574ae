//! Messaging channels: SMS, MMS, WhatsApp, Messenger and push.
//!
//! Sendability decides who may be messaged; the sender renders content and
//! dispatches one request per recipient through the shared dispatcher.

pub mod channel;
pub mod sendability;
pub mod sender;

pub use channel::{Channel, MessagingAccount, RenderedContent};
pub use sendability::{evaluate, redact_pii, ExternalId, Sendability, SendabilityStatus};
pub use sender::{MessageRequest, MessageSender, RecipientResult, SendReport};
