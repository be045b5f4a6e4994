#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_api::{
    cache::{CacheBackend, InMemoryCache},
    config::{AppConfig, GatewayConfig},
    db,
    entities::{user, UserRole},
    events::{self, EventSender},
    gateway::{
        signature::compute_signature, ChargeRequest, GatewayError, PaymentGateway, PaymentIntent,
    },
    services::{
        payment_notifications::PaymentNotification,
        products::{CreateProductRequest, ProductResponse},
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const SERVER_KEY: &str = "SB-Mid-server-test-key";

/// How the fake gateway answers the next create-intent call
#[derive(Debug, Clone)]
pub enum GatewayReply {
    Accept,
    Reject { status: u16 },
    Stall(Duration),
}

/// In-process stand-in for the hosted payment page provider.
///
/// Replies are consumed in order; once the script runs out every call is accepted.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<GatewayReply>>,
    requests: Mutex<Vec<ChargeRequest>>,
}

impl ScriptedGateway {
    pub fn push(&self, reply: GatewayReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<ChargeRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_intent(&self, request: &ChargeRequest) -> Result<PaymentIntent, GatewayError> {
        let reply = {
            self.requests.lock().unwrap().push(request.clone());
            self.script.lock().unwrap().pop_front()
        }
        .unwrap_or(GatewayReply::Accept);

        match reply {
            GatewayReply::Accept => {}
            GatewayReply::Reject { status } => {
                return Err(GatewayError::Rejected {
                    status,
                    body: r#"{"error_messages":["rejected by test"]}"#.to_string(),
                })
            }
            GatewayReply::Stall(delay) => tokio::time::sleep(delay).await,
        }

        Ok(PaymentIntent {
            token: format!("snap-{}", request.transaction_id),
            redirect_url: format!(
                "https://app.sandbox.midtrans.com/snap/v2/vtweb/{}",
                request.transaction_id
            ),
            charged_amount: request.gross_amount,
        })
    }
}

/// Application wired against an in-memory SQLite database and a scripted gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    pub cache: Arc<InMemoryCache>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway_config(GatewayConfig::new(SERVER_KEY)).await
    }

    pub async fn with_gateway_config(gateway_config: GatewayConfig) -> Self {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            gateway_config,
        );

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(ScriptedGateway::default());
        let cache = Arc::new(InMemoryCache::new(100));

        let state = AppState::new(
            Arc::new(pool),
            cfg,
            event_sender,
            cache.clone() as Arc<dyn CacheBackend>,
            gateway.clone(),
        );
        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            gateway,
            cache,
            _event_task: event_task,
        }
    }

    pub async fn seed_user(&self, role: UserRole) -> Uuid {
        let id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(id),
            email: Set(format!("{}@example.com", id.simple())),
            name: Set(format!("User {}", &id.simple().to_string()[..6])),
            phone: Set(Some("+628111111111".to_string())),
            role: Set(role),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user");
        id
    }

    pub async fn seed_customer(&self) -> Uuid {
        self.seed_user(UserRole::Customer).await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> ProductResponse {
        self.state
            .services
            .products
            .create_product(CreateProductRequest {
                name: name.to_string(),
                description: None,
                sku: format!("SKU-{}", Uuid::new_v4().simple()),
                price,
                stock,
                is_active: true,
                category_id: None,
            })
            .await
            .expect("seed product")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.state
            .services
            .products
            .get_product(product_id)
            .await
            .expect("product exists")
            .stock
    }

    /// Sends a request as `user`, or anonymously when `user` is `None`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user: Option<(Uuid, &str)>,
    ) -> (axum::http::StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some((user_id, role)) = user {
            builder = builder
                .header("x-user-id", user_id.to_string())
                .header("x-user-role", role);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn as_customer(
        &self,
        user_id: Uuid,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (axum::http::StatusCode, Value) {
        self.request(method, uri, body, Some((user_id, "customer"))).await
    }

    pub async fn as_admin(
        &self,
        user_id: Uuid,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (axum::http::StatusCode, Value) {
        self.request(method, uri, body, Some((user_id, "admin"))).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Builds a notification the way the gateway would sign it.
pub fn signed_notification(
    transaction_id: &str,
    transaction_status: &str,
    status_code: &str,
    gross_amount: &str,
) -> PaymentNotification {
    PaymentNotification {
        transaction_status: transaction_status.to_string(),
        order_id: transaction_id.to_string(),
        status_code: status_code.to_string(),
        gross_amount: gross_amount.to_string(),
        payment_type: "bank_transfer".to_string(),
        transaction_id: Uuid::new_v4().to_string(),
        fraud_status: "accept".to_string(),
        signature_key: compute_signature(transaction_id, status_code, gross_amount, SERVER_KEY),
    }
}
