use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::{
    errors::ServiceError,
    services::payment_gateway::{
        CreateSessionRequest, HostedCheckoutClient, PaymentGateway, SessionLineItem,
        SessionMetadata,
    },
};
use uuid::Uuid;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn session_request(user_id: Uuid, cart_id: Uuid) -> CreateSessionRequest {
    CreateSessionRequest {
        line_items: vec![SessionLineItem {
            name: "Mug".to_string(),
            description: Some("color: black".to_string()),
            unit_price: dec!(19.99),
            quantity: 2,
        }],
        currency: "usd".to_string(),
        metadata: SessionMetadata {
            user_id,
            cart_id,
            shipping_address: "{\"city\":\"London\"}".to_string(),
        },
        customer_email: "a@b.com".to_string(),
        client_reference_id: "ORD-AB12CD34EF56".to_string(),
    }
}

#[tokio::test]
async fn create_session_posts_form_encoded_line_items_and_metadata() {
    let server = MockServer::start().await;
    let user_id = Uuid::new_v4();
    let cart_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(body_string_contains("mode=payment"))
        .and(body_string_contains(format!(
            "metadata%5BuserId%5D={user_id}"
        )))
        .and(body_string_contains(format!(
            "metadata%5Bcartid%5D={cart_id}"
        )))
        // 19.99 becomes 1999 minor units
        .and(body_string_contains(
            "line_items%5B0%5D%5Bprice_data%5D%5Bunit_amount%5D=1999",
        ))
        .and(body_string_contains("line_items%5B0%5D%5Bquantity%5D=2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_live_1",
            "url": "https://pay.example/c/cs_live_1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HostedCheckoutClient::new(
        server.uri(),
        "sk_test_key",
        "https://shop.test/success",
        "https://shop.test/cancel",
    );

    let session = client
        .create_checkout_session(session_request(user_id, cart_id))
        .await
        .expect("session creation failed");

    assert_eq!(session.id, "cs_live_1");
    assert_eq!(session.url, "https://pay.example/c/cs_live_1");
}

#[tokio::test]
async fn gateway_rejection_surfaces_as_external_service_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {"message": "Your card was declined."}
        })))
        .mount(&server)
        .await;

    let client = HostedCheckoutClient::new(
        server.uri(),
        "sk_test_key",
        "https://shop.test/success",
        "https://shop.test/cancel",
    );

    let err = client
        .create_checkout_session(session_request(Uuid::new_v4(), Uuid::new_v4()))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ExternalServiceError(_));
}

#[tokio::test]
async fn session_without_a_url_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cs_live_2"})))
        .mount(&server)
        .await;

    let client = HostedCheckoutClient::new(
        server.uri(),
        "sk_test_key",
        "https://shop.test/success",
        "https://shop.test/cancel",
    );

    let err = client
        .create_checkout_session(session_request(Uuid::new_v4(), Uuid::new_v4()))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ExternalServiceError(msg) if msg.contains("missing url"));
}

#[tokio::test]
async fn retrieve_session_maps_the_gateway_payload() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_live_3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_live_3",
            "status": "complete",
            "payment_intent": {"id": "pi_42"},
            "amount_total": 3998,
            "customer_email": "a@b.com",
            "customer_details": {"email": "a@b.com", "name": "Ada"},
            "metadata": {"userId": "u", "cartid": "c"},
            "client_reference_id": "ORD-AB12CD34EF56"
        })))
        .mount(&server)
        .await;

    let client = HostedCheckoutClient::new(
        server.uri(),
        "sk_test_key",
        "https://shop.test/success",
        "https://shop.test/cancel",
    );

    let details = client
        .retrieve_session("cs_live_3")
        .await
        .expect("session retrieve failed");

    assert_eq!(details.status.as_deref(), Some("complete"));
    assert_eq!(details.payment_intent_id.as_deref(), Some("pi_42"));
    assert_eq!(details.amount_total, Some(3998));
    assert_eq!(details.client_reference_id.as_deref(), Some("ORD-AB12CD34EF56"));
    assert_eq!(details.metadata.get("cartid").map(String::as_str), Some("c"));
}

#[tokio::test]
async fn unknown_session_maps_to_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"message": "No such checkout session"}
        })))
        .mount(&server)
        .await;

    let client = HostedCheckoutClient::new(
        server.uri(),
        "sk_test_key",
        "https://shop.test/success",
        "https://shop.test/cancel",
    );

    let err = client.retrieve_session("cs_gone").await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
