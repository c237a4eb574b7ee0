//! API Integration Tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::util::ServiceExt;
use uuid::Uuid;

use invoice_bidder::api::{
    self,
    routes::{CreateInvestorRequest, CreateIssuerRequest, MoneyRequest, PlaceBidRequest, TradeRequest},
};

mod common;

const BOUNDARY: &str = "invoice-bidder-boundary";

fn app() -> Router {
    api::build_router(common::memory_state())
}

fn json_request<T: serde::Serialize>(method: &str, uri: &str, body: &T) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// multipart/form-data invoice upload; `None` values are left out
fn invoice_upload(issuer_id: Option<Uuid>, price: &str, currency: &str) -> Request<Body> {
    let mut body = String::new();
    let mut text_field = |name: &str, value: &str| {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    };
    if let Some(issuer_id) = issuer_id {
        text_field("issuer_id", &issuer_id.to_string());
    }
    text_field("price", price);
    text_field("currency", currency);
    body.push_str(&format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"invoice\"; filename=\"invoice.pdf\"\r\n\
         Content-Type: application/pdf\r\n\r\n%PDF-1.4 test\r\n--{BOUNDARY}--\r\n"
    ));

    Request::builder()
        .method("POST")
        .uri("/api/v1/invoices")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn id_of(body: &Value, field: &str) -> Uuid {
    body[field].as_str().unwrap().parse().unwrap()
}

async fn create_issuer(app: &Router) -> Uuid {
    let req = json_request(
        "POST",
        "/api/v1/issuers",
        &CreateIssuerRequest {
            full_name: "ACME Ltd".to_string(),
        },
    );
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED, "Issuer creation failed");
    id_of(&body_json(response).await, "id")
}

async fn create_investor(app: &Router, name: &str, eur: &str) -> Uuid {
    let req = json_request(
        "POST",
        "/api/v1/investors",
        &CreateInvestorRequest {
            full_name: name.to_string(),
            balances: vec![MoneyRequest::new(eur, "EUR")],
        },
    );
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED, "Investor creation failed");
    id_of(&body_json(response).await, "id")
}

async fn create_invoice(app: &Router, issuer_id: Uuid, price: &str) -> Uuid {
    let response = app
        .clone()
        .oneshot(invoice_upload(Some(issuer_id), price, "EUR"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED, "Invoice creation failed");
    id_of(&body_json(response).await, "id")
}

fn bid_request(invoice_id: Uuid, investor_id: Uuid, amount: &str) -> Request<Body> {
    json_request(
        "POST",
        &format!("/api/v1/invoices/{invoice_id}/bids"),
        &PlaceBidRequest {
            investor_id,
            amount: MoneyRequest::new(amount, "EUR"),
        },
    )
}

#[tokio::test]
async fn test_health_check() {
    let app = app();
    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["broker_accepting"], true);
}

#[tokio::test]
async fn test_bid_and_trade_e2e() {
    let app = app();

    // 1. Parties and invoice
    let issuer_id = create_issuer(&app).await;
    let alice = create_investor(&app, "Alice", "1000").await;
    let bob = create_investor(&app, "Bob", "1000").await;
    let invoice_id = create_invoice(&app, issuer_id, "1000").await;

    // 2. Alice takes 600
    let response = app
        .clone()
        .oneshot(bid_request(invoice_id, alice, "600"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED, "First bid failed");
    let body = body_json(response).await;
    assert_eq!(body["invoice_locked"], false);

    // 3. Bob asks for 500, gets the remaining 400 and locks the invoice
    let response = app
        .clone()
        .oneshot(bid_request(invoice_id, bob, "500"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED, "Second bid failed");
    let body = body_json(response).await;
    assert_eq!(body["invoice_locked"], true);
    assert_eq!(body["amount"]["amount"].as_str().unwrap().parse::<f64>().unwrap(), 400.0);

    // 4. Invoice view
    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/invoices/{invoice_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "locked");
    assert_eq!(body["bids"].as_array().unwrap().len(), 2);
    assert_eq!(body["bids"][0]["investor_name"], "Alice");
    assert_eq!(
        body["remaining_price"]["amount"].as_str().unwrap().parse::<f64>().unwrap(),
        0.0
    );

    // 5. Approve
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/invoices/{invoice_id}/trade"),
            &TradeRequest { approved: true },
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK, "Trade failed");
    let body = body_json(response).await;
    assert_eq!(body["status"], "traded");
    assert_eq!(body["bid_ids"].as_array().unwrap().len(), 2);

    // 6. Issuer lists the invoice
    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/issuers/{issuer_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["full_name"], "ACME Ltd");
    assert_eq!(body["invoices"][0]["status"], "traded");
}

#[tokio::test]
async fn test_error_mapping() {
    let app = app();
    let issuer_id = create_issuer(&app).await;
    let poor = create_investor(&app, "Poor", "5").await;
    let invoice_id = create_invoice(&app, issuer_id, "100").await;

    // Unknown invoice
    let response = app
        .clone()
        .oneshot(bid_request(Uuid::new_v4(), poor, "1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error_code"], "not_found");

    // Not enough money
    let response = app
        .clone()
        .oneshot(bid_request(invoice_id, poor, "50"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_code"], "insufficient_funds");

    // Trade on an OPEN invoice
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/invoices/{invoice_id}/trade"),
            &TradeRequest { approved: true },
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error_code"], "invalid_state");

    // Unknown investor
    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/investors/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_invoice_validation() {
    let app = app();
    let issuer_id = create_issuer(&app).await;

    let response = app
        .clone()
        .oneshot(invoice_upload(None, "100", "EUR"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_code"], "invalid_request");

    let response = app
        .clone()
        .oneshot(invoice_upload(Some(issuer_id), "0", "EUR"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(invoice_upload(Some(Uuid::new_v4()), "100", "EUR"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_issuer_requires_name() {
    let app = app();
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/issuers",
            &CreateIssuerRequest {
                full_name: "  ".to_string(),
            },
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
