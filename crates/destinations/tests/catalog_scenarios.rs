use std::sync::Arc;

use actionkit_core::RawEvent;
use actionkit_destinations::{attentive, connect, linkedin, recombee};
use actionkit_dispatch::testing::{MockTransport, StaticRefresher};
use actionkit_dispatch::{
    AdapterConfig, AuthConfig, Destination, DynamicFieldContext, Dispatcher, HttpResponse,
    OAuth2Credentials,
};
use actionkit_mapping::{Choice, Expr, MappingOverride};
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

fn bearer() -> AdapterConfig {
    AdapterConfig {
        settings: json!({}),
        auth: AuthConfig::bearer("attentive-key"),
    }
}

fn destination(slug: &str, transport: Arc<MockTransport>) -> Destination {
    connect(slug, Dispatcher::new(transport)).unwrap()
}

fn default_mapping(dest: &Destination, action: &str) -> MappingOverride {
    dest.definition()
        .find_action(action)
        .unwrap()
        .schema()
        .default_mapping()
}

// ─── Recombee ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_to_cart_builds_items_and_posts_batch_endpoint() {
    let transport = Arc::new(MockTransport::new());
    let dest = destination(recombee::SLUG, transport.clone());
    let event: RawEvent = serde_json::from_value(json!({
        "type": "track",
        "event": "Product Added",
        "userId": "user-7",
        "properties": { "product_id": "123", "price": 19.99 }
    }))
    .unwrap();
    let config = AdapterConfig {
        settings: json!({ "databaseId": "shop-prod", "databaseRegion": "eu-west" }),
        auth: AuthConfig::None,
    };
    let mapping = default_mapping(&dest, "addCartAddition");

    let payload = dest
        .preview("addCartAddition", &event, &mapping, &config)
        .unwrap();
    assert_eq!(payload.get("items"), Some(&json!([{ "itemId": "123", "price": 19.99 }])));

    dest.perform("addCartAddition", &event, &mapping, &config)
        .await
        .unwrap();

    let request = transport.last_request().unwrap();
    assert_eq!(request.url, "https://rapi-eu-west.recombee.com/shop-prod/batch/");
    assert_eq!(
        request.json_body().unwrap(),
        &json!({
            "requests": [{
                "method": "POST",
                "path": "/cartadditions/",
                "params": { "userId": "user-7", "itemId": "123", "price": 19.99, "cascadeCreate": true }
            }]
        })
    );
}

#[tokio::test]
async fn recombee_batch_sends_one_call_for_all_events() {
    let transport = Arc::new(MockTransport::new());
    let dest = destination(recombee::SLUG, transport.clone());
    let config = AdapterConfig {
        settings: json!({ "databaseId": "shop", "databaseRegion": "us-west" }),
        auth: AuthConfig::None,
    };
    let events: Vec<RawEvent> = ["a", "b", "c"]
        .iter()
        .map(|id| {
            RawEvent::track("Product Added")
                .with_user_id("u1")
                .with_property("product_id", json!(id))
        })
        .collect();

    let response = dest
        .perform_batch("addCartAddition", &events, &default_mapping(&dest, "addCartAddition"), &config)
        .await
        .unwrap();

    assert_eq!(transport.call_count(), 1);
    assert_eq!(response.delivered_count(), 3);
    let body = transport.last_request().unwrap().json_body().cloned().unwrap();
    let item_ids: Vec<Value> = body["requests"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["params"]["itemId"].clone())
        .collect();
    assert_eq!(item_ids, vec![json!("a"), json!("b"), json!("c")]);
}

#[tokio::test]
async fn recombee_custom_api_uri_stands_in_for_region() {
    let transport = Arc::new(MockTransport::new());
    let dest = destination(recombee::SLUG, transport.clone());
    let event = RawEvent::track("Product Added")
        .with_user_id("u1")
        .with_property("product_id", json!("sku-1"));
    let mapping = default_mapping(&dest, "addCartAddition");

    let custom = AdapterConfig {
        settings: json!({ "databaseId": "shop", "apiUri": "https://rapi-custom.recombee.net" }),
        auth: AuthConfig::None,
    };
    dest.perform("addCartAddition", &event, &mapping, &custom)
        .await
        .unwrap();
    assert_eq!(
        transport.last_request().unwrap().url,
        "https://rapi-custom.recombee.net/shop/batch/"
    );

    let neither = AdapterConfig {
        settings: json!({ "databaseId": "shop" }),
        auth: AuthConfig::None,
    };
    let err = dest
        .perform("addCartAddition", &event, &mapping, &neither)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "The root value is missing the required field 'databaseRegion'."
    );
    assert_eq!(transport.call_count(), 1);
}

// ─── Attentive ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn attentive_missing_identifiers_make_no_call() {
    let transport = Arc::new(MockTransport::new());
    let dest = destination(attentive::SLUG, transport.clone());

    let err = dest
        .perform(
            "customEvents",
            &RawEvent::track("Order Shipped"),
            &default_mapping(&dest, "customEvents"),
            &bearer(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "At least one user identifier is required.");
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn attentive_batch_fans_out_per_event() {
    let transport = Arc::new(MockTransport::new());
    let dest = destination(attentive::SLUG, transport.clone());
    let events = vec![
        RawEvent::track("Order Shipped").with_user_id("u1"),
        RawEvent::track("Order Shipped"),
        RawEvent::track("Order Shipped").with_context("traits", json!({ "email": "a@b.co" })),
    ];

    let response = dest
        .perform_batch("customEvents", &events, &default_mapping(&dest, "customEvents"), &bearer())
        .await
        .unwrap();

    assert_eq!(transport.call_count(), 2);
    assert_eq!(response.delivered_count(), 2);
    assert_eq!(
        response.outcomes[1].error().map(|e| e.to_string()),
        Some("At least one user identifier is required.".to_string())
    );
    let first = &transport.requests()[0];
    assert_eq!(first.url, "https://api.attentivemobile.com/v1/events/custom");
    assert_eq!(first.header_value("authorization"), Some("Bearer attentive-key"));
}

// ─── LinkedIn Conversions ──────────────────────────────────────────────────

fn linkedin_config() -> AdapterConfig {
    AdapterConfig {
        settings: json!({}),
        auth: AuthConfig::OAuth2(OAuth2Credentials {
            access_token: "stale".into(),
            refresh_token: Some("refresh-1".into()),
            ..Default::default()
        }),
    }
}

fn linkedin_mapping(dest: &Destination) -> MappingOverride {
    default_mapping(dest, "streamConversion")
        .with("adAccountId", Expr::literal(json!("512345")))
        .with("conversionRuleId", Expr::literal(json!("104012")))
}

fn conversion(email: &str) -> RawEvent {
    RawEvent::track("Order Completed")
        .with_message_id("msg-1")
        .with_timestamp(Utc::now() - Duration::hours(2))
        .with_property("revenue", json!(120.5))
        .with_property("currency", json!("EUR"))
        .with_context("traits", json!({ "email": email }))
}

#[tokio::test]
async fn linkedin_refreshes_token_once_on_401() {
    let transport = Arc::new(MockTransport::new());
    transport.push_response(HttpResponse::json(401, &json!({ "message": "Expired token" })));
    transport.push_response(HttpResponse::new(201, ""));
    let refresher = Arc::new(StaticRefresher::new("fresh"));
    let dest = connect(
        linkedin::SLUG,
        Dispatcher::new(transport.clone()).with_refresher(refresher.clone()),
    )
    .unwrap();

    let result = dest
        .perform("streamConversion", &conversion("a@b.co"), &linkedin_mapping(&dest), &linkedin_config())
        .await
        .unwrap();

    assert_eq!(transport.call_count(), 2);
    assert_eq!(refresher.calls(), 1);
    let requests = transport.requests();
    assert_eq!(requests[0].header_value("authorization"), Some("Bearer stale"));
    assert_eq!(requests[1].header_value("authorization"), Some("Bearer fresh"));
    assert_eq!(requests[1].url, "https://api.linkedin.com/rest/conversionEvents");
    assert_eq!(requests[1].header_value("linkedin-version"), Some(linkedin::API_VERSION));
    assert_eq!(result.refreshed_token.unwrap().access_token, "fresh");
}

#[tokio::test]
async fn linkedin_second_401_is_returned() {
    let transport = Arc::new(MockTransport::new());
    transport.push_response(HttpResponse::json(401, &json!({ "message": "Expired token" })));
    transport.push_response(HttpResponse::json(401, &json!({ "message": "Still expired" })));
    let dest = connect(
        linkedin::SLUG,
        Dispatcher::new(transport.clone()).with_refresher(Arc::new(StaticRefresher::new("fresh"))),
    )
    .unwrap();

    let err = dest
        .perform("streamConversion", &conversion("a@b.co"), &linkedin_mapping(&dest), &linkedin_config())
        .await
        .unwrap_err();

    assert_eq!(transport.call_count(), 2);
    assert_eq!(err.status(), 401);
    assert_eq!(err.to_string(), "Still expired");
}

#[tokio::test]
async fn linkedin_batch_uses_elements_envelope() {
    let transport = Arc::new(MockTransport::new());
    let dest = destination(linkedin::SLUG, transport.clone());
    let events = vec![conversion("a@b.co"), conversion("c@d.co")];

    let response = dest
        .perform_batch("streamConversion", &events, &linkedin_mapping(&dest), &linkedin_config())
        .await
        .unwrap();

    assert_eq!(response.dispatches.len(), 1);
    assert_eq!(response.dispatches[0].event_count, 2);
    let request = transport.last_request().unwrap();
    assert_eq!(request.header_value("x-restli-method"), Some("BATCH_CREATE"));
    let elements = request.json_body().unwrap()["elements"].as_array().unwrap().clone();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0]["conversionValue"], json!({ "currencyCode": "EUR", "amount": "120.5" }));
}

#[tokio::test]
async fn linkedin_conversion_rules_need_an_ad_account() {
    let transport = Arc::new(MockTransport::new());
    let dest = destination(linkedin::SLUG, transport.clone());

    let response = dest
        .list_choices(
            "streamConversion",
            "conversionRuleId",
            &DynamicFieldContext {
                auth: AuthConfig::bearer("token"),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(transport.call_count(), 0);
    let error = response.error.unwrap();
    assert_eq!(error.code, "MISSING_PREREQUISITE");
    assert_eq!(error.message, "Please select adAccountId first.");
}

#[tokio::test]
async fn linkedin_conversion_rules_are_listed() {
    let transport = Arc::new(MockTransport::new());
    transport.push_response(HttpResponse::json(
        200,
        &json!({
            "elements": [
                { "id": 104012, "name": "Conversion API Segment 2", "type": "LEAD" },
                { "id": 104004, "name": "Conversion API Segment 3", "type": "PURCHASE" }
            ]
        }),
    ));
    let dest = destination(linkedin::SLUG, transport.clone());
    let mut payload = Map::new();
    payload.insert("adAccountId".into(), json!("123456"));

    let response = dest
        .list_choices(
            "streamConversion",
            "conversionRuleId",
            &DynamicFieldContext {
                payload,
                auth: AuthConfig::bearer("token"),
                ..Default::default()
            },
        )
        .await;

    assert!(response.error.is_none());
    assert_eq!(
        response.choices,
        vec![
            Choice::new("Conversion API Segment 2", 104012),
            Choice::new("Conversion API Segment 3", 104004),
        ]
    );
    let request = transport.last_request().unwrap();
    assert_eq!(request.url, "https://api.linkedin.com/rest/conversions");
    assert!(request.query.contains(&("account".to_string(), "123456".to_string())));
    assert!(request.query.contains(&("q".to_string(), "account".to_string())));
}
