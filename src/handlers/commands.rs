//! Command definitions
//!
//! Commands represent intentions to change the system state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::InvoiceStatus;
use crate::domain::Money;

// =========================================================================
// PlaceBidCommand
// =========================================================================

/// Command to bid on an invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBidCommand {
    pub invoice_id: Uuid,
    pub investor_id: Uuid,
    /// Amount the investor offers; may be clipped to the remaining price
    pub amount: Money,
}

impl PlaceBidCommand {
    pub fn new(invoice_id: Uuid, investor_id: Uuid, amount: Money) -> Self {
        Self {
            invoice_id,
            investor_id,
            amount,
        }
    }
}

// =========================================================================
// TradeCommand
// =========================================================================

/// Command to approve or reject the trade of a locked invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCommand {
    pub invoice_id: Uuid,
    pub approved: bool,
}

impl TradeCommand {
    pub fn approve(invoice_id: Uuid) -> Self {
        Self {
            invoice_id,
            approved: true,
        }
    }

    pub fn reject(invoice_id: Uuid) -> Self {
        Self {
            invoice_id,
            approved: false,
        }
    }
}

/// Result of a placed bid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBidResult {
    pub bid_id: Uuid,
    pub invoice_id: Uuid,
    pub investor_id: Uuid,
    /// Amount reserved on the invoice and debited from the investor
    pub amount: Money,
    /// True when this bid fully subscribed the invoice
    pub invoice_locked: bool,
}

/// Result of a trade decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub invoice_id: Uuid,
    pub approved: bool,
    pub status: InvoiceStatus,
    /// Bids settled (approval) or disabled and refunded (rejection)
    pub bid_ids: Vec<Uuid>,
}
