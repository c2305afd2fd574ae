//! Turns prepared payloads into authenticated vendor requests, sends them
//! and classifies the outcome. Also hosts action and destination
//! definitions, batch envelopes and dynamic-field providers.

pub mod action;
pub mod auth;
pub mod batch;
pub mod classify;
pub mod destination;
pub mod dispatcher;
pub mod dynamic_fields;
pub mod middleware;
pub mod request;
pub mod testing;
pub mod transport;

pub use action::ActionDefinition;
pub use auth::{AuthConfig, OAuth2Credentials, OAuth2TokenRefresher, RefreshedToken, TokenRefresher};
pub use batch::{aggregate_envelope_failure, aggregate_failures, BatchEnvelope, BatchResponse, ElementOutcome};
pub use classify::{classify_status, error_from_response, extract_error_details, ErrorDetails, Outcome};
pub use destination::{AdapterConfig, AuthScheme, Destination, DestinationDefinition};
pub use dispatcher::{DispatchResult, Dispatcher};
pub use dynamic_fields::{
    DynamicFieldContext, DynamicFieldError, DynamicFieldProvider, DynamicFieldResponse,
    HttpChoicesProvider,
};
pub use middleware::{
    DispatchHook, DispatchOutcome, MetricsHook, Operation, OperationContext, Pipeline, TracingHook,
};
pub use request::{BatchSpec, BodyShape, RequestTemplate};
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, RequestBody, Transport, TransportError,
};
