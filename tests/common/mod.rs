//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use invoice_bidder::aggregate::Aggregate;
use invoice_bidder::api::AppState;
use invoice_bidder::broker::BrokerConfig;
use invoice_bidder::domain::{Currency, Money};
use invoice_bidder::store::{MemoryAttachmentStore, MemoryStore};

pub fn eur() -> Currency {
    Currency::new("EUR").unwrap()
}

pub fn eur_money(amount: &str) -> Money {
    Money::parse(amount, "EUR").unwrap()
}

/// Broker settings that retry immediately
pub fn fast_broker_config() -> BrokerConfig {
    BrokerConfig {
        retry_base_delay: Duration::ZERO,
        retry_max_delay: Duration::ZERO,
        ..BrokerConfig::default()
    }
}

/// Fully wired engine over the in-memory stores, broker started
pub fn memory_state() -> AppState {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::from_stores(
        store.clone(),
        store,
        Arc::new(MemoryAttachmentStore::new()),
        fast_broker_config(),
    )
    .unwrap();
    state.broker.start().unwrap();
    state
}

pub async fn create_investor(state: &AppState, eur: &str) -> Uuid {
    state
        .ledger
        .create_investor("Investor".to_string(), &[eur_money(eur)])
        .await
        .unwrap()
        .id()
}

/// Issuer with one invoice; returns (issuer_id, invoice_id)
pub async fn create_invoice(state: &AppState, price: &str) -> (Uuid, Uuid) {
    let issuer = state
        .ledger
        .create_issuer("Issuer".to_string())
        .await
        .unwrap();
    let invoice = state
        .invoices
        .create_invoice(issuer.id(), eur_money(price), b"%PDF-1.4")
        .await
        .unwrap();
    (issuer.id(), invoice.id())
}

pub async fn drain(state: &AppState) {
    state
        .broker
        .shutdown(tokio::time::Instant::now() + Duration::from_secs(10))
        .await
        .unwrap();
}

/// Connect to the test database and clear it.
/// Returns `None` when `DATABASE_URL` is not set.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query(
        "TRUNCATE TABLE invoice_events, bids, invoices, balances, investors, issuers CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");

    Some(pool)
}
