//! Settlement events
//!
//! Work items the broker carries from the bidding path to the ledger.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Money;

/// Settlement work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SettlementEvent {
    /// A LOCKED invoice was resolved. Approval pays the issuer; rejection
    /// refunds the investors behind `bid_ids`.
    Trade {
        invoice_id: Uuid,
        bid_ids: Vec<Uuid>,
        approved: bool,
    },

    /// Funds debited for a bid that was not (fully) placed
    FailedBid { investor_id: Uuid, amount: Money },
}

impl SettlementEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SettlementEvent::Trade { approved: true, .. } => "TradeApproved",
            SettlementEvent::Trade { approved: false, .. } => "TradeRejected",
            SettlementEvent::FailedBid { .. } => "FailedBid",
        }
    }

    /// Invoice or investor the event settles
    pub fn subject_id(&self) -> Uuid {
        match self {
            SettlementEvent::Trade { invoice_id, .. } => *invoice_id,
            SettlementEvent::FailedBid { investor_id, .. } => *investor_id,
        }
    }
}

/// Queue envelope: an event plus its delivery bookkeeping
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: SettlementEvent,
    /// Failed deliveries so far
    pub retries: u32,
}

impl QueuedEvent {
    pub fn new(event: SettlementEvent) -> Self {
        Self { event, retries: 0 }
    }
}
