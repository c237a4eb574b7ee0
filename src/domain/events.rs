//! Domain Events
//!
//! Facts about an invoice's life. The aggregate produces them for each
//! accepted command and stores persist them atomically per command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Money;

/// Invoice-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InvoiceEvent {
    /// Invoice was published by an issuer
    InvoiceCreated {
        invoice_id: Uuid,
        issuer_id: Uuid,
        price: Money,
        created_at: DateTime<Utc>,
    },

    /// A bid was accepted; `amount` is the allocated amount in the price currency
    BidPlaced {
        bid_id: Uuid,
        invoice_id: Uuid,
        investor_id: Uuid,
        amount: Money,
        placed_at: DateTime<Utc>,
    },

    /// Active bids cover the full price
    InvoiceLocked {
        invoice_id: Uuid,
        locked_at: DateTime<Utc>,
    },

    /// Trade approved, invoice is sold
    TradeApproved {
        invoice_id: Uuid,
        bid_ids: Vec<Uuid>,
        approved_at: DateTime<Utc>,
    },

    /// Trade rejected, the listed bids were disabled and the invoice reopened
    TradeRejected {
        invoice_id: Uuid,
        disabled_bid_ids: Vec<Uuid>,
        rejected_at: DateTime<Utc>,
    },
}

impl InvoiceEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated { .. } => "InvoiceCreated",
            InvoiceEvent::BidPlaced { .. } => "BidPlaced",
            InvoiceEvent::InvoiceLocked { .. } => "InvoiceLocked",
            InvoiceEvent::TradeApproved { .. } => "TradeApproved",
            InvoiceEvent::TradeRejected { .. } => "TradeRejected",
        }
    }

    /// Get the invoice ID this event relates to
    pub fn invoice_id(&self) -> Uuid {
        match self {
            InvoiceEvent::InvoiceCreated { invoice_id, .. } => *invoice_id,
            InvoiceEvent::BidPlaced { invoice_id, .. } => *invoice_id,
            InvoiceEvent::InvoiceLocked { invoice_id, .. } => *invoice_id,
            InvoiceEvent::TradeApproved { invoice_id, .. } => *invoice_id,
            InvoiceEvent::TradeRejected { invoice_id, .. } => *invoice_id,
        }
    }
}
