use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use opensase_storefront::domain::aggregates::VariantView;
use opensase_storefront::http::{router, AppState, USER_ID_HEADER, USER_ROLE_HEADER};
use opensase_storefront::publisher::EventBus;
use opensase_storefront::store::{MemoryStore, NewVariant};

struct TestApp { app: Router, store: MemoryStore, admin: Uuid }

impl TestApp {
    fn new() -> Self {
        let store = MemoryStore::new();
        let app = router(AppState::new(Arc::new(store.clone()), EventBus::disabled()));
        Self { app, store, admin: Uuid::new_v4() }
    }

    async fn variant(&self, sku: &str, price: rust_decimal::Decimal, stock: i32) -> VariantView {
        self.store.seed_variant(NewVariant {
            sku: sku.into(), product_name: "Classic tee".into(), price, size: "L".into(), category: None, stock,
        }).await.unwrap()
    }

    async fn call(&self, method: &str, uri: &str, user: Option<(Uuid, &str)>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = user {
            req = req.header(USER_ID_HEADER, id.to_string()).header(USER_ROLE_HEADER, role);
        }
        let req = match body {
            Some(b) => req.header("content-type", "application/json").body(Body::from(b.to_string())).unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = self.app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
        (status, value)
    }

    async fn as_client(&self, user: Uuid, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call(method, uri, Some((user, "CLIENT")), body).await
    }

    async fn as_admin(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call(method, uri, Some((self.admin, "ADMIN")), body).await
    }

    async fn checkout(&self, user: Uuid, variant: &VariantView, quantity: i32) -> Value {
        let (status, _) = self.as_client(user, "POST", "/api/v1/cart/items", Some(json!({"variantId": variant.id, "quantity": quantity}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, order) = self.as_client(user, "POST", "/api/v1/orders", Some(json!({"address": "12 rue de Fès", "phoneNumber": "0612345678"}))).await;
        assert_eq!(status, StatusCode::CREATED, "{order}");
        order
    }
}

#[tokio::test]
async fn health_check() {
    let app = TestApp::new();
    let (status, body) = app.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn checkout_and_cancel_round_trip() {
    let app = TestApp::new();
    let tee = app.variant("tee-l-black", dec!(25.00), 4).await;
    let user = Uuid::new_v4();

    let order = app.checkout(user, &tee, 2).await;
    assert_eq!(order["status"], "EN_ATTENTE");
    assert_eq!(order["totalAmount"], "50.00");
    assert_eq!(order["items"][0]["variant"]["sku"], "TEE-L-BLACK");
    assert!(order["orderNumber"].as_str().unwrap().starts_with("ORD-"));
    assert_eq!(app.store.stock_of(tee.id).await, Some(2));

    let (_, cart) = app.as_client(user, "GET", "/api/v1/cart", None).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 0);

    let cancel = format!("/api/v1/orders/{}/cancel", order["id"].as_str().unwrap());
    let (status, cancelled) = app.as_client(user, "PUT", &cancel, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "ANNULE");
    assert_eq!(app.store.stock_of(tee.id).await, Some(4));

    let (status, body) = app.as_client(user, "PUT", &cancel, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "order is already cancelled");
    assert_eq!(app.store.stock_of(tee.id).await, Some(4));

    let (_, ledger) = app.as_admin("GET", &format!("/api/v1/variants/{}/movements", tee.id), None).await;
    let types: Vec<&str> = ledger.as_array().unwrap().iter().map(|m| m["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["IN", "OUT"]);
}

#[tokio::test]
async fn oversell_is_refused_with_conflict() {
    let app = TestApp::new();
    let tee = app.variant("TEE-S", dec!(10), 1).await;
    let user = Uuid::new_v4();
    app.as_client(user, "POST", "/api/v1/cart/items", Some(json!({"variantId": tee.id, "quantity": 2}))).await;

    let (status, body) = app.as_client(user, "POST", "/api/v1/orders", Some(json!({"address": "x", "phoneNumber": "0612345678"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");
    assert!(body["message"].as_str().unwrap().contains("TEE-S"));
    assert_eq!(app.store.stock_of(tee.id).await, Some(1));
}

#[tokio::test]
async fn guest_orders() {
    let app = TestApp::new();
    let tee = app.variant("TEE-M", dec!(12.50), 5).await;
    let body = |variant_id: Uuid| json!({
        "firstName": "Yasmine", "lastName": "B", "phoneNumber": "+212 600-000-001", "address": "Riad 4, Marrakech",
        "items": [{"variantId": variant_id, "quantity": 2}]
    });

    let (status, order) = app.call("POST", "/api/v1/orders/guest", None, Some(body(tee.id))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["totalAmount"], "25.00");
    let (_, again) = app.call("POST", "/api/v1/orders/guest", None, Some(body(tee.id))).await;
    assert_eq!(order["userId"], again["userId"]);
    assert_eq!(app.store.stock_of(tee.id).await, Some(1));

    let (status, _) = app.call("POST", "/api/v1/orders/guest", None, Some(body(Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.call("POST", "/api/v1/orders/guest", None, Some(json!({"firstName": "Y"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let empty = json!({"firstName": "Yasmine", "lastName": "B", "phoneNumber": "0600000001", "address": "Riad 4", "items": []});
    let (status, body) = app.call("POST", "/api/v1/orders/guest", None, Some(empty)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("at least one item is required"));
}

#[tokio::test]
async fn identity_and_admin_checks() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let (status, _) = app.call("GET", "/api/v1/orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.as_client(user, "GET", "/api/v1/orders/all", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, orders) = app.as_admin("GET", "/api/v1/orders/all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders, json!([]));
}

#[tokio::test]
async fn admin_status_updates() {
    let app = TestApp::new();
    let tee = app.variant("TEE-XL", dec!(20), 3).await;
    let user = Uuid::new_v4();
    let order = app.checkout(user, &tee, 1).await;
    let uri = format!("/api/v1/orders/{}/status", order["id"].as_str().unwrap());

    let (status, _) = app.as_admin("PUT", &uri, Some(json!({"status": "SHIPPED"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.as_client(user, "PUT", &uri, Some(json!({"status": "LIVRE"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, updated) = app.as_admin("PUT", &uri, Some(json!({"status": "ANNULE"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "ANNULE");
    assert_eq!(app.store.stock_of(tee.id).await, Some(3));
}

#[tokio::test]
async fn return_workflow_restocks_on_processing() {
    let app = TestApp::new();
    let tee = app.variant("TEE-R", dec!(30), 5).await;
    let user = Uuid::new_v4();
    let order = app.checkout(user, &tee, 3).await;
    let order_id = order["id"].as_str().unwrap();
    let order_item_id = order["items"][0]["id"].as_str().unwrap();
    let ask = json!({"orderId": order_id, "reason": "too small", "items": [{"orderItemId": order_item_id, "quantity": 2}]});

    let (status, _) = app.as_client(user, "POST", "/api/v1/returns", Some(ask.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.as_client(user, "POST", "/api/v1/returns", Some(json!({"orderId": order_id, "reason": "too small", "items": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.as_admin("PUT", &format!("/api/v1/orders/{}/status", order_id), Some(json!({"status": "LIVRE"}))).await;
    let (status, created) = app.as_client(user, "POST", "/api/v1/returns", Some(ask)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["items"][0]["status"], "EN_ATTENTE");

    let item_uri = format!("/api/v1/returns/items/{}/status", created["items"][0]["id"].as_str().unwrap());
    for next in ["APPROUVE", "EN_TRAITEMENT", "TRAITE"] {
        let (status, body) = app.as_admin("PUT", &item_uri, Some(json!({"status": next}))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }
    assert_eq!(app.store.stock_of(tee.id).await, Some(4));
    let (status, _) = app.as_admin("PUT", &format!("/api/v1/orders/{}/status", order_id), Some(json!({"status": "EN_COURS"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.as_client(user, "PUT", &format!("/api/v1/orders/{}/cancel", order_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.store.stock_of(tee.id).await, Some(4));

    let (_, mine) = app.as_client(user, "GET", "/api/v1/returns", None).await;
    assert_eq!(mine[0]["items"][0]["status"], "TRAITE");
    let (status, _) = app.as_client(Uuid::new_v4(), "GET", &format!("/api/v1/returns/{}", created["id"].as_str().unwrap()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
