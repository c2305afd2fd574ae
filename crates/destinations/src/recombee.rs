//! Recombee cart additions. Every call goes through the batch endpoint:
//! one event becomes one or more `/cartadditions/` sub-requests, and a batch
//! of events concatenates their sub-requests.

use serde_json::{json, Map, Value};

use actionkit_core::ActionResult;
use actionkit_dispatch::{
    ActionDefinition, AuthScheme, BatchEnvelope, BatchSpec, DestinationDefinition,
    RequestTemplate,
};
use actionkit_mapping::{
    Choice, DependsOn, Expr, FieldKind, FieldSchema, FieldSpec, MappingError, Payload,
};

pub const SLUG: &str = "recombee";

const BATCH_PATH: &str = "/{{settings.databaseId}}/batch/";

pub fn definition() -> Result<DestinationDefinition, MappingError> {
    Ok(DestinationDefinition::new(
        "Recombee",
        SLUG,
        "https://rapi-{{settings.databaseRegion}}.recombee.com",
        AuthScheme::Custom,
    )
    .description("Send interactions to a Recombee database.")
    .base_url_setting("apiUri")
    .settings(settings()?)
    .action(add_cart_addition()?))
}

fn settings() -> Result<FieldSchema, MappingError> {
    FieldSchema::new(vec![
        FieldSpec::string("databaseId")
            .label("Database ID")
            .description("The ID of the Recombee Database into which the interactions will be sent.")
            .required(),
        FieldSpec::string("databaseRegion")
            .label("Database Region")
            .description("The Recombee cluster where your Database is located.")
            .required_when(DependsOn::unless_set("apiUri"))
            .choices(vec![
                Choice::new("EU", "eu-west"),
                Choice::new("Canada (East Coast)", "ca-east"),
                Choice::new("Australia", "ap-se"),
                Choice::new("US (West Coast)", "us-west"),
            ]),
        FieldSpec::string("apiUri")
            .label("API URI")
            .description("Custom URI of the Recombee API. Leave empty unless Recombee support assigned one."),
    ])
}

fn item_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::string("itemId").label("Item ID").required(),
        FieldSpec::number("amount").label("Amount"),
        FieldSpec::number("price").label("Price"),
    ]
}

fn add_cart_addition() -> Result<ActionDefinition, MappingError> {
    let single_item = Expr::Array(vec![Expr::object([
        ("itemId", Expr::path("$.properties.product_id")),
        ("amount", Expr::path("$.properties.quantity")),
        ("price", Expr::path("$.properties.price")),
    ])]);
    let each_product = Expr::array_map(
        "$.properties.products",
        Expr::object([
            ("itemId", Expr::path("$.product_id")),
            ("amount", Expr::path("$.quantity")),
            ("price", Expr::path("$.price")),
        ]),
    );

    let schema = FieldSchema::new(vec![
        FieldSpec::string("userId")
            .label("User ID")
            .description("The ID of the user who added the items to the cart.")
            .required()
            .default_expr(Expr::coalesce(["$.userId", "$.anonymousId"])),
        FieldSpec::array("items", FieldKind::Object)
            .label("Items")
            .description("The items that were added to the cart.")
            .required()
            .properties(item_fields())
            .default_expr(Expr::if_exists(
                Expr::path("$.properties.products"),
                each_product,
                single_item,
            )),
        FieldSpec::datetime("timestamp")
            .label("Timestamp")
            .default_path("$.timestamp"),
        FieldSpec::string("recommId")
            .label("Recommendation ID")
            .description("ID of the recommendation that led to this interaction.")
            .default_path("$.properties.recomm_id"),
        FieldSpec::object("additionalData")
            .label("Additional Data")
            .description("Additional data stored with the interaction."),
    ])?;

    let request = RequestTemplate::post(BATCH_PATH)
        .body_fn(cart_addition_requests)
        .batch(BatchSpec::new(BatchEnvelope::concat("requests")));

    Ok(ActionDefinition::new(
        "addCartAddition",
        "Add Cart Addition",
        schema,
        request,
    )
    .description("Adds a cart addition of the given items made by the given user.")
    .default_subscription("type = \"track\" and event = \"Product Added\""))
}

/// `{ "requests": [{ "method": "POST", "path": "/cartadditions/", "params": {...} }] }`,
/// one sub-request per item.
fn cart_addition_requests(payload: &Payload, _settings: &Value) -> ActionResult<Value> {
    let items: &[Value] = match payload.get("items") {
        Some(Value::Array(items)) => items,
        _ => &[],
    };

    let requests: Vec<Value> = items
        .iter()
        .map(|item| {
            let mut params = Map::new();
            if let Some(user_id) = payload.get("userId") {
                params.insert("userId".into(), user_id.clone());
            }
            for key in ["itemId", "amount", "price"] {
                if let Some(value) = item.get(key) {
                    params.insert(key.into(), value.clone());
                }
            }
            for key in ["timestamp", "recommId", "additionalData"] {
                if let Some(value) = payload.get(key) {
                    params.insert(key.into(), value.clone());
                }
            }
            params.insert("cascadeCreate".into(), Value::Bool(true));
            json!({ "method": "POST", "path": "/cartadditions/", "params": params })
        })
        .collect();

    Ok(json!({ "requests": requests }))
}
