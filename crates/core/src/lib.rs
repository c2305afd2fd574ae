pub mod config;
pub mod error;
pub mod event;
pub mod runtime;

pub use config::AppConfig;
pub use error::{ActionError, ActionResult, ErrorCode, ValidationError};
pub use event::{EventType, RawEvent};
pub use runtime::RuntimeContext;
