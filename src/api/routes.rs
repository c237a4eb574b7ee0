//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Investor, Invoice, InvoiceStatus, Issuer};
use crate::broker::{Broker, BrokerConfig, BrokerError};
use crate::domain::Money;
use crate::error::{AppError, AppResult};
use crate::handlers::{
    BidHandler, InvoiceService, LedgerService, PlaceBidCommand, TradeCommand, TradeHandler,
};
use crate::store::{AttachmentStore, InvoiceStore, PartyStore};

// =========================================================================
// Application state
// =========================================================================

/// Services shared by all requests
#[derive(Clone)]
pub struct AppState {
    pub invoices: Arc<InvoiceService>,
    pub ledger: Arc<LedgerService>,
    pub broker: Arc<Broker>,
    pub bids: Arc<BidHandler>,
    pub trades: Arc<TradeHandler>,
}

impl AppState {
    pub fn new(
        invoices: Arc<InvoiceService>,
        ledger: Arc<LedgerService>,
        broker: Arc<Broker>,
    ) -> Self {
        Self {
            bids: Arc::new(BidHandler::new(
                invoices.clone(),
                ledger.clone(),
                broker.clone(),
            )),
            trades: Arc::new(TradeHandler::new(invoices.clone(), broker.clone())),
            invoices,
            ledger,
            broker,
        }
    }

    /// Wire services and a (not yet started) broker over the given stores
    pub fn from_stores(
        invoice_store: Arc<dyn InvoiceStore>,
        party_store: Arc<dyn PartyStore>,
        attachments: Arc<dyn AttachmentStore>,
        broker_config: BrokerConfig,
    ) -> Result<Self, BrokerError> {
        let ledger = Arc::new(LedgerService::new(party_store.clone()));
        let invoices = Arc::new(InvoiceService::new(invoice_store, party_store, attachments));
        let broker = Arc::new(Broker::new(
            broker_config,
            invoices.clone(),
            ledger.clone(),
        )?);

        Ok(Self::new(invoices, ledger, broker))
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyRequest {
    /// Decimal string, e.g. "100.50"
    pub amount: String,
    pub currency: String,
}

impl MoneyRequest {
    pub fn new(amount: &str, currency: &str) -> Self {
        Self {
            amount: amount.to_string(),
            currency: currency.to_string(),
        }
    }

    fn to_money(&self) -> AppResult<Money> {
        Ok(Money::parse(&self.amount, &self.currency)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateIssuerRequest {
    pub full_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateInvestorRequest {
    pub full_name: String,
    #[serde(default)]
    pub balances: Vec<MoneyRequest>,
}

#[derive(Debug, Serialize)]
pub struct PartyResponse {
    pub id: Uuid,
    pub full_name: String,
    pub balances: Vec<Money>,
    pub created_at: DateTime<Utc>,
}

impl From<&Investor> for PartyResponse {
    fn from(investor: &Investor) -> Self {
        Self {
            id: investor.id(),
            full_name: investor.full_name().to_string(),
            balances: investor.balances().iter().collect(),
            created_at: investor.created_at(),
        }
    }
}

impl From<&Issuer> for PartyResponse {
    fn from(issuer: &Issuer) -> Self {
        Self {
            id: issuer.id(),
            full_name: issuer.full_name().to_string(),
            balances: issuer.balances().iter().collect(),
            created_at: issuer.created_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceSummary {
    pub id: Uuid,
    pub price: Money,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct IssuerResponse {
    #[serde(flatten)]
    pub issuer: PartyResponse,
    pub invoices: Vec<InvoiceSummary>,
}

#[derive(Debug, Serialize)]
pub struct BidResponse {
    pub id: Uuid,
    pub investor_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investor_name: Option<String>,
    pub amount: Money,
    pub active: bool,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub id: Uuid,
    pub issuer_id: Uuid,
    pub price: Money,
    pub status: InvoiceStatus,
    pub remaining_price: Money,
    pub bids: Vec<BidResponse>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaceBidRequest {
    pub investor_id: Uuid,
    pub amount: MoneyRequest,
}

#[derive(Debug, Serialize)]
pub struct PlaceBidResponse {
    pub bid_id: Uuid,
    pub amount: Money,
    pub invoice_locked: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TradeRequest {
    pub approved: bool,
}

#[derive(Debug, Serialize)]
pub struct TradeResponse {
    pub invoice_id: Uuid,
    pub status: InvoiceStatus,
    pub bid_ids: Vec<Uuid>,
}

fn require_name(full_name: &str) -> AppResult<String> {
    let trimmed = full_name.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidRequest("full_name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/issuers", post(create_issuer))
        .route("/issuers/:issuer_id", get(get_issuer))
        .route("/investors", post(create_investor))
        .route("/investors/:investor_id", get(get_investor))
        .route("/invoices", post(create_invoice))
        .route("/invoices/:invoice_id", get(get_invoice))
        .route("/invoices/:invoice_id/bids", post(place_bid))
        .route("/invoices/:invoice_id/trade", post(trade))
}

// =========================================================================
// Issuers
// =========================================================================

async fn create_issuer(
    State(state): State<AppState>,
    Json(request): Json<CreateIssuerRequest>,
) -> Result<(StatusCode, Json<PartyResponse>), AppError> {
    let full_name = require_name(&request.full_name)?;
    let issuer = state.ledger.create_issuer(full_name).await?;

    Ok((StatusCode::CREATED, Json(PartyResponse::from(&issuer))))
}

async fn get_issuer(
    State(state): State<AppState>,
    Path(issuer_id): Path<Uuid>,
) -> Result<Json<IssuerResponse>, AppError> {
    let issuer = state.ledger.issuer(issuer_id).await?;
    let invoices = state
        .invoices
        .invoices_by_issuer(issuer_id)
        .await?
        .iter()
        .map(|invoice| InvoiceSummary {
            id: invoice.id(),
            price: invoice.price().clone(),
            status: invoice.status(),
            created_at: invoice.created_at(),
        })
        .collect();

    Ok(Json(IssuerResponse {
        issuer: PartyResponse::from(&issuer),
        invoices,
    }))
}

// =========================================================================
// Investors
// =========================================================================

async fn create_investor(
    State(state): State<AppState>,
    Json(request): Json<CreateInvestorRequest>,
) -> Result<(StatusCode, Json<PartyResponse>), AppError> {
    let full_name = require_name(&request.full_name)?;
    let opening = request
        .balances
        .iter()
        .map(MoneyRequest::to_money)
        .collect::<AppResult<Vec<_>>>()?;

    let investor = state.ledger.create_investor(full_name, &opening).await?;

    Ok((StatusCode::CREATED, Json(PartyResponse::from(&investor))))
}

async fn get_investor(
    State(state): State<AppState>,
    Path(investor_id): Path<Uuid>,
) -> Result<Json<PartyResponse>, AppError> {
    let investor = state.ledger.investor(investor_id).await?;
    Ok(Json(PartyResponse::from(&investor)))
}

// =========================================================================
// Invoices
// =========================================================================

/// Create an invoice from a multipart form:
/// `issuer_id`, `price`, `currency` and the `invoice` document.
async fn create_invoice(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<InvoiceResponse>), AppError> {
    let mut issuer_id = None;
    let mut price = None;
    let mut currency = None;
    let mut document = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "issuer_id" => {
                let text = field_text(field).await?;
                let id = Uuid::parse_str(text.trim())
                    .map_err(|_| AppError::InvalidRequest(format!("invalid issuer_id: {text}")))?;
                issuer_id = Some(id);
            }
            "price" => price = Some(field_text(field).await?),
            "currency" => currency = Some(field_text(field).await?),
            "invoice" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
                document = Some(bytes);
            }
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let issuer_id = issuer_id.ok_or_else(|| missing_field("issuer_id"))?;
    let price = price.ok_or_else(|| missing_field("price"))?;
    let currency = currency.ok_or_else(|| missing_field("currency"))?;
    let document = document.ok_or_else(|| missing_field("invoice"))?;

    let price = Money::parse(&price, &currency)?;
    let invoice = state
        .invoices
        .create_invoice(issuer_id, price, &document)
        .await?;

    let response = invoice_response(&state, &invoice).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::InvalidRequest(e.to_string()))
}

fn missing_field(name: &str) -> AppError {
    AppError::InvalidRequest(format!("missing multipart field: {name}"))
}

async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state.invoices.get_invoice(invoice_id).await?;
    Ok(Json(invoice_response(&state, &invoice).await?))
}

/// Invoice with its bids, each annotated with the investor's name
async fn invoice_response(state: &AppState, invoice: &Invoice) -> AppResult<InvoiceResponse> {
    let mut investor_ids: Vec<Uuid> = invoice.bids().iter().map(|bid| bid.investor_id).collect();
    investor_ids.sort_unstable();
    investor_ids.dedup();

    let names: HashMap<Uuid, String> = state
        .ledger
        .investors(&investor_ids)
        .await?
        .into_iter()
        .map(|investor| (investor.id(), investor.full_name().to_string()))
        .collect();

    let bids = invoice
        .bids()
        .iter()
        .map(|bid| BidResponse {
            id: bid.id,
            investor_id: bid.investor_id,
            investor_name: names.get(&bid.investor_id).cloned(),
            amount: bid.amount.clone(),
            active: bid.active,
            placed_at: bid.placed_at,
        })
        .collect();

    Ok(InvoiceResponse {
        id: invoice.id(),
        issuer_id: invoice.issuer_id(),
        price: invoice.price().clone(),
        status: invoice.status(),
        remaining_price: invoice.remaining_price(state.invoices.converter())?,
        bids,
        created_at: invoice.created_at(),
    })
}

// =========================================================================
// Bidding & trade
// =========================================================================

async fn place_bid(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<PlaceBidRequest>,
) -> Result<(StatusCode, Json<PlaceBidResponse>), AppError> {
    let amount = request.amount.to_money()?;
    let result = state
        .bids
        .execute(PlaceBidCommand::new(invoice_id, request.investor_id, amount))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PlaceBidResponse {
            bid_id: result.bid_id,
            amount: result.amount,
            invoice_locked: result.invoice_locked,
        }),
    ))
}

async fn trade(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<TradeRequest>,
) -> Result<Json<TradeResponse>, AppError> {
    let command = if request.approved {
        TradeCommand::approve(invoice_id)
    } else {
        TradeCommand::reject(invoice_id)
    };
    let result = state.trades.execute(command).await?;

    Ok(Json(TradeResponse {
        invoice_id: result.invoice_id,
        status: result.status,
        bid_ids: result.bid_ids,
    }))
}
