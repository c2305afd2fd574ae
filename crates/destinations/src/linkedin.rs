//! LinkedIn Conversions API: stream conversion events against a conversion
//! rule of an ad account.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{json, Map, Value};

use actionkit_core::{ActionResult, ValidationError};
use actionkit_dispatch::{
    ActionDefinition, AuthScheme, BatchEnvelope, BatchSpec, DestinationDefinition,
    HttpChoicesProvider, RequestTemplate,
};
use actionkit_mapping::template::stringify;
use actionkit_mapping::{
    Expr, FieldSchema, FieldSpec, HashIdentifiers, MappingError, Normalization, Payload, Rule,
};

pub const SLUG: &str = "linkedin-conversions";

pub const API_VERSION: &str = "202404";

const MAX_CONVERSION_AGE_DAYS: i64 = 90;

pub fn definition() -> Result<DestinationDefinition, MappingError> {
    Ok(DestinationDefinition::new(
        "LinkedIn Conversions API",
        SLUG,
        "https://api.linkedin.com/rest",
        AuthScheme::OAuth2,
    )
    .description("Send conversion events to LinkedIn Campaign Manager.")
    .token_url("https://www.linkedin.com/oauth/v2/accessToken")
    .action(stream_conversion()?))
}

fn stream_conversion() -> Result<ActionDefinition, MappingError> {
    let schema = FieldSchema::new(vec![
        FieldSpec::string("adAccountId")
            .label("Ad Account")
            .description("The ad account to use when streaming conversions.")
            .required()
            .dynamic(),
        FieldSpec::string("conversionRuleId")
            .label("Conversion Rule")
            .description("The conversion rule this event is attributed to.")
            .required()
            .dynamic(),
        FieldSpec::datetime("conversionHappenedAt")
            .label("Timestamp")
            .description("When the conversion happened. Must be within the past 90 days.")
            .required()
            .default_path("$.timestamp"),
        FieldSpec::object("conversionValue")
            .label("Conversion Value")
            .properties(vec![
                FieldSpec::string("currencyCode").label("Currency Code").required(),
                FieldSpec::number("amount").label("Amount").required(),
            ])
            .default_expr(Expr::if_exists(
                Expr::path("$.properties.revenue"),
                Expr::object([
                    ("currencyCode", Expr::path("$.properties.currency")),
                    ("amount", Expr::path("$.properties.revenue")),
                ]),
                Expr::Literal(Value::Null),
            )),
        FieldSpec::string("eventId")
            .label("Event ID")
            .description("Deduplicates the same conversion sent through other channels.")
            .default_path("$.messageId"),
        FieldSpec::string("email")
            .label("Email")
            .description("Hashed with SHA-256 before it is sent.")
            .default_expr(Expr::coalesce(["$.context.traits.email", "$.properties.email"])),
        FieldSpec::string("linkedInUuid")
            .label("LinkedIn First Party Ads Tracking UUID")
            .default_path("$.properties.li_fat_id"),
        FieldSpec::object("userInfo")
            .label("User Info")
            .properties(vec![
                FieldSpec::string("firstName"),
                FieldSpec::string("lastName"),
                FieldSpec::string("companyName"),
                FieldSpec::string("title"),
                FieldSpec::string("countryCode"),
            ])
            .default_expr(Expr::object([
                ("firstName", Expr::path("$.context.traits.first_name")),
                ("lastName", Expr::path("$.context.traits.last_name")),
                ("companyName", Expr::path("$.context.traits.company")),
                ("title", Expr::path("$.context.traits.title")),
                ("countryCode", Expr::path("$.context.traits.address.country")),
            ])),
    ])?;

    let ad_accounts = HttpChoicesProvider::new("/adAccountUsers")
        .query("q", "authenticatedUser")
        .header("LinkedIn-Version", API_VERSION)
        .items("$.elements")
        .label("user")
        .value("account");
    let conversion_rules = HttpChoicesProvider::new("/conversions")
        .query("q", "account")
        .query("account", "{{payload.adAccountId}}")
        .header("LinkedIn-Version", API_VERSION)
        .requires("adAccountId")
        .items("$.elements")
        .label("name")
        .value("id");

    let request = RequestTemplate::post("/conversionEvents")
        .header("LinkedIn-Version", API_VERSION)
        .header("X-Restli-Protocol-Version", "2.0.0")
        .body_fn(conversion_event)
        .batch(
            BatchSpec::new(BatchEnvelope::wrapped("elements"))
                .header("X-RestLi-Method", "BATCH_CREATE"),
        );

    Ok(ActionDefinition::new(
        "streamConversion",
        "Stream Conversion Event",
        schema,
        request,
    )
    .description("Directly streams conversion events to a specific conversion rule.")
    .default_subscription("type = \"track\"")
    .processor(Arc::new(
        HashIdentifiers::new().field("email", Normalization::Email),
    ))
    .rule(
        Rule::at_least_one_of(["email", "linkedInUuid"])
            .with_message("Either email or LinkedIn UUID must be provided."),
    )
    .rule(Rule::currency("conversionValue.currencyCode"))
    .rule(Rule::custom(
        "recentConversion",
        &["conversionHappenedAt"],
        check_conversion_age,
    ))
    .rule(Rule::custom("userInfoNames", &["userInfo"], check_user_info))
    .dynamic_field("adAccountId", Arc::new(ad_accounts))
    .dynamic_field("conversionRuleId", Arc::new(conversion_rules)))
}

fn happened_at(payload: &Payload) -> Result<Option<DateTime<Utc>>, ValidationError> {
    let Some(raw) = payload.get_str("conversionHappenedAt") else {
        return Ok(None);
    };
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| Some(d.and_utc()))
        .ok_or_else(|| {
            ValidationError::for_field(
                "conversionHappenedAt",
                format!("Timestamp {raw} is not a valid ISO-8601 date."),
            )
        })
}

fn check_conversion_age(payload: &Payload) -> Result<(), ValidationError> {
    match happened_at(payload)? {
        Some(t) if t < Utc::now() - Duration::days(MAX_CONVERSION_AGE_DAYS) => {
            Err(ValidationError::for_field(
                "conversionHappenedAt",
                "Timestamp should be within the past 90 days.",
            ))
        }
        _ => Ok(()),
    }
}

/// LinkedIn rejects user info without both names.
fn check_user_info(payload: &Payload) -> Result<(), ValidationError> {
    let Some(Value::Object(info)) = payload.get("userInfo") else {
        return Ok(());
    };
    if info.is_empty() {
        return Ok(());
    }
    for key in ["firstName", "lastName"] {
        if !payload.is_set(&format!("userInfo.{key}")) {
            return Err(ValidationError::missing_property("userInfo", key));
        }
    }
    Ok(())
}

fn conversion_event(payload: &Payload, _settings: &Value) -> ActionResult<Value> {
    let mut body = Map::new();
    if let Some(rule) = payload.get("conversionRuleId") {
        body.insert(
            "conversion".into(),
            json!(format!("urn:lla:llaPartnerConversion:{}", stringify(rule))),
        );
    }
    if let Some(t) = happened_at(payload)? {
        body.insert("conversionHappenedAt".into(), json!(t.timestamp_millis()));
    }
    if let Some(Value::Object(value)) = payload.get("conversionValue") {
        body.insert(
            "conversionValue".into(),
            json!({
                "currencyCode": value.get("currencyCode").map(stringify).unwrap_or_default(),
                "amount": value.get("amount").map(stringify).unwrap_or_default(),
            }),
        );
    }
    if let Some(event_id) = payload.get("eventId") {
        body.insert("eventId".into(), event_id.clone());
    }

    let mut user_ids = Vec::new();
    if let Some(email) = payload.get_str("email") {
        user_ids.push(json!({ "idType": "SHA256_EMAIL", "idValue": email }));
    }
    if let Some(uuid) = payload.get_str("linkedInUuid") {
        user_ids.push(json!({ "idType": "LINKEDIN_FIRST_PARTY_ADS_TRACKING_UUID", "idValue": uuid }));
    }
    let mut user = Map::new();
    user.insert("userIds".into(), Value::Array(user_ids));
    if let Some(Value::Object(info)) = payload.get("userInfo") {
        if !info.is_empty() {
            user.insert("userInfo".into(), Value::Object(info.clone()));
        }
    }
    body.insert("user".into(), Value::Object(user));

    Ok(Value::Object(body))
}
