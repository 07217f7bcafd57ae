#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, Response},
    Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_api::{
    config::AppConfig,
    db,
    entities::{cart_item, order, product},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::checkout::Address,
    services::notifications::{
        EmailDispatch, NotificationError, NotificationService, OrderConfirmation,
    },
    services::payment_gateway::{
        CreateSessionRequest, GatewaySession, PaymentGateway, SessionDetails,
    },
    AppState,
};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Helper harness spinning up application state backed by a throwaway
/// SQLite database, a scripted payment gateway, and a recording notifier.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<RecordingNotifier>,
    db_path: PathBuf,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_path =
            std::env::temp_dir().join(format!("storefront_test_{}.db", Uuid::new_v4().simple()));

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1",
            18_080,
            "test",
            "sk_test_key",
            TEST_WEBHOOK_SECRET,
            "https://shop.test/success",
            "https://shop.test/cancel",
        );
        // A single connection serializes SQLite writers.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(MockGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let services = AppServices::new(
            db_arc.clone(),
            gateway.clone(),
            notifier.clone(),
            Arc::new(event_sender.clone()),
            "usd",
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            notifier,
            db_path,
            _event_task: event_task,
        }
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn post_raw(
        &self,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}

/// Scripted gateway. Hands out deterministic session ids and records the
/// last create request for assertions.
#[derive(Default)]
pub struct MockGateway {
    pub fail: AtomicBool,
    counter: AtomicUsize,
    pub last_request: Mutex<Option<CreateSessionRequest>>,
    pub sessions: Mutex<HashMap<String, SessionDetails>>,
}

impl MockGateway {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn stub_session(&self, session_id: &str, details: SessionDetails) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), details);
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "gateway unavailable".to_string(),
            ));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{n}");
        *self.last_request.lock().unwrap() = Some(request);

        Ok(GatewaySession {
            url: format!("https://pay.test/c/{id}"),
            id,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionDetails, ServiceError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::NotFound(format!("checkout session {session_id} not found"))
            })
    }
}

/// Notifier that records every confirmation instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: AtomicBool,
    pub sent: Mutex<Vec<(String, OrderConfirmation)>>,
}

impl RecordingNotifier {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn send_order_confirmation(
        &self,
        to: &str,
        confirmation: &OrderConfirmation,
    ) -> Result<EmailDispatch, NotificationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Api {
                status: 500,
                body: "smtp down".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), confirmation.clone()));
        Ok(EmailDispatch::Sent)
    }
}

pub async fn seed_product(
    app: &TestApp,
    name: &str,
    price: Decimal,
    sale_price: Option<Decimal>,
    sold_items: i32,
) -> Uuid {
    let id = Uuid::new_v4();
    let model = product::ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        sku: Set(format!("SKU-{}", id.simple())),
        price: Set(price),
        sale_price: Set(sale_price),
        currency: Set("usd".to_string()),
        sold_items: Set(sold_items),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    };
    model
        .insert(&*app.state.db)
        .await
        .expect("failed to seed product");
    id
}

pub async fn seed_cart_item(app: &TestApp, cart_id: Uuid, product_id: Uuid, quantity: i32) -> Uuid {
    let id = Uuid::new_v4();
    let model = cart_item::ActiveModel {
        id: Set(id),
        cart_id: Set(cart_id),
        product_id: Set(product_id),
        quantity: Set(quantity),
        selected_color: Set(Some("black".to_string())),
        selected_size: Set(None),
        delivery_option: Set(Some("standard".to_string())),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    };
    model
        .insert(&*app.state.db)
        .await
        .expect("failed to seed cart item");
    id
}

pub fn test_address() -> Address {
    Address {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        address_line_1: "1 Analytical Way".to_string(),
        address_line_2: None,
        city: "London".to_string(),
        province: "LDN".to_string(),
        country_code: "GB".to_string(),
        postal_code: "N1 7AA".to_string(),
        phone: None,
    }
}

/// Signs a webhook payload the way the gateway does.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let timestamp = Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Polls for the order a spawned callback task is expected to create.
pub async fn wait_for_order(app: &TestApp, session_id: &str) -> Option<order::Model> {
    for _ in 0..100 {
        let found = order::Entity::find()
            .filter(order::Column::StripeSessionId.eq(session_id))
            .one(&*app.state.db)
            .await
            .expect("order lookup failed");
        if found.is_some() {
            return found;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Money fields serialize as either strings or bare numbers depending on the
/// producer; normalize before comparing.
pub fn decimal_field(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal value: {other:?}"),
    }
}
