//! Built-in destination definitions.

pub mod attentive;
pub mod linkedin;
pub mod recombee;

use std::sync::Arc;

use actionkit_core::{ActionError, ActionResult};
use actionkit_dispatch::{Destination, DestinationDefinition, Dispatcher};
use actionkit_mapping::MappingError;

/// Every built-in destination, in slug order.
pub fn catalog() -> Result<Vec<Arc<DestinationDefinition>>, MappingError> {
    Ok(vec![
        Arc::new(attentive::definition()?),
        Arc::new(linkedin::definition()?),
        Arc::new(recombee::definition()?),
    ])
}

pub fn find(slug: &str) -> ActionResult<Arc<DestinationDefinition>> {
    catalog()?
        .into_iter()
        .find(|d| d.slug == slug)
        .ok_or_else(|| ActionError::Config(format!("unknown destination '{slug}'")))
}

/// Looks up `slug` and binds it to `dispatcher`.
pub fn connect(slug: &str, dispatcher: Dispatcher) -> ActionResult<Destination> {
    let definition = find(slug)?;
    tracing::debug!(destination = %definition.slug, actions = definition.actions().len(), "destination loaded");
    Destination::new(definition, dispatcher)
}
