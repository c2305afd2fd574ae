//! Attentive custom events. Identifiers are mapped flat and regrouped into
//! Attentive's `user` object before validation; the API has no batch
//! endpoint, so batches fan out to one call per event.

use std::sync::Arc;

use actionkit_dispatch::{ActionDefinition, AuthScheme, DestinationDefinition, RequestTemplate};
use actionkit_mapping::{
    Expr, FieldKind, FieldSchema, FieldSpec, MappingError, Rule, SplitIdentifiers,
};

pub const SLUG: &str = "attentive";

pub fn definition() -> Result<DestinationDefinition, MappingError> {
    Ok(DestinationDefinition::new(
        "Attentive",
        SLUG,
        "https://api.attentivemobile.com",
        AuthScheme::Custom,
    )
    .description("Send custom events to Attentive for journeys and segmentation.")
    .action(custom_events()?))
}

fn custom_events() -> Result<ActionDefinition, MappingError> {
    let schema = FieldSchema::new(vec![
        FieldSpec::string("type")
            .label("Event Type")
            .description("The type of event. This name is case sensitive.")
            .required()
            .default_path("$.event"),
        FieldSpec::object("userIdentifiers")
            .label("User Identifiers")
            .description("At least one identifier is required. Custom identifiers can be added as additional key:value pairs.")
            .properties(vec![
                FieldSpec::string("phone").label("Phone"),
                FieldSpec::string("email").label("Email"),
                FieldSpec::string("clientUserId").label("Client User ID"),
            ])
            .additional_properties(true)
            .default_expr(Expr::object([
                (
                    "phone",
                    Expr::coalesce(["$.context.traits.phone", "$.properties.phone"]),
                ),
                (
                    "email",
                    Expr::coalesce(["$.context.traits.email", "$.properties.email"]),
                ),
                ("clientUserId", Expr::path("$.userId")),
            ])),
        FieldSpec::object("properties")
            .label("Properties")
            .description("Metadata to associate with the event.")
            .default_path("$.properties"),
        FieldSpec::string("externalEventId")
            .label("External Event Id")
            .description("A unique identifier representing this specific event.")
            .default_path("$.messageId"),
        FieldSpec::datetime("occurredAt")
            .label("Occurred At")
            .default_path("$.timestamp"),
        FieldSpec::array("tags", FieldKind::String).label("Tags"),
    ])?;

    let split = SplitIdentifiers::new("userIdentifiers", "user")
        .named("phone", "phone")
        .named("email", "email")
        .named("clientUserId", "externalIdentifiers.clientUserId")
        .custom_into("externalIdentifiers.customIdentifiers");

    Ok(ActionDefinition::new(
        "customEvents",
        "Custom Events",
        schema,
        RequestTemplate::post("/v1/events/custom"),
    )
    .description("Send custom events to Attentive.")
    .default_subscription("type = \"track\"")
    .processor(Arc::new(split))
    .rule(
        Rule::at_least_one_of([
            "user.phone",
            "user.email",
            "user.externalIdentifiers.clientUserId",
            "user.externalIdentifiers.customIdentifiers",
        ])
        .with_message("At least one user identifier is required."),
    ))
}
