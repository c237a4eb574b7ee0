//! Invoice Aggregate
//!
//! An invoice and its bids. Owns the bidding state machine:
//!
//! ```text
//! OPEN --fully subscribed--> LOCKED --approved--> TRADED
//!                              |
//!                              +----rejected---> OPEN (active bids disabled)
//! ```
//!
//! Commands never mutate the aggregate directly. They validate against the
//! current state and return the events to persist; the new state is obtained
//! by applying those events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::{CurrencyConverter, DomainError, InvoiceEvent, Money};

use super::Aggregate;

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Locked,
    Traded,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Open => "open",
            InvoiceStatus::Locked => "locked",
            InvoiceStatus::Traded => "traded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(InvoiceStatus::Open),
            "locked" => Some(InvoiceStatus::Locked),
            "traded" => Some(InvoiceStatus::Traded),
            _ => None,
        }
    }

    /// Status after `event`, or `None` if the event is not allowed from this status.
    pub fn next(self, event: &InvoiceEvent) -> Option<InvoiceStatus> {
        match (self, event) {
            (InvoiceStatus::Open, InvoiceEvent::BidPlaced { .. }) => Some(InvoiceStatus::Open),
            (InvoiceStatus::Open, InvoiceEvent::InvoiceLocked { .. }) => Some(InvoiceStatus::Locked),
            (InvoiceStatus::Locked, InvoiceEvent::TradeApproved { .. }) => Some(InvoiceStatus::Traded),
            (InvoiceStatus::Locked, InvoiceEvent::TradeRejected { .. }) => Some(InvoiceStatus::Open),
            _ => None,
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bid on an invoice. Bids are append-only; only `active` ever changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub investor_id: Uuid,
    /// Allocated amount, in the invoice's price currency
    pub amount: Money,
    pub active: bool,
    pub placed_at: DateTime<Utc>,
}

/// Outcome of an accepted bid command
#[derive(Debug, Clone)]
pub struct BidPlacement {
    pub bid_id: Uuid,
    /// Amount actually reserved on the invoice (may be less than requested)
    pub allocated: Money,
    /// True when this bid fully subscribed the invoice
    pub locks_invoice: bool,
    pub events: Vec<InvoiceEvent>,
}

/// Outcome of an accepted trade decision
#[derive(Debug, Clone)]
pub struct TradeResolution {
    pub approved: bool,
    /// Bids that were active when the trade was resolved
    pub bid_ids: Vec<Uuid>,
    pub event: InvoiceEvent,
}

/// Invoice Aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    id: Uuid,
    issuer_id: Uuid,
    price: Money,
    status: InvoiceStatus,
    bids: Vec<Bid>,
    version: i64,
    created_at: DateTime<Utc>,
}

impl Invoice {
    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a new OPEN invoice and its creation event.
    ///
    /// Zero-price invoices are rejected: they would be fully subscribed
    /// without any bid.
    pub fn create(issuer_id: Uuid, price: Money) -> Result<(Self, InvoiceEvent), DomainError> {
        price.ensure_positive()?;

        let event = InvoiceEvent::InvoiceCreated {
            invoice_id: Uuid::new_v4(),
            issuer_id,
            price,
            created_at: Utc::now(),
        };

        let invoice = Self::replay(std::slice::from_ref(&event))
            .ok_or_else(|| DomainError::InvalidAmount("invalid creation event".to_string()))?;

        Ok((invoice, event))
    }

    /// Rebuild an invoice from its full event history.
    /// Returns `None` unless the history starts with `InvoiceCreated`.
    pub fn replay(events: &[InvoiceEvent]) -> Option<Self> {
        let (first, rest) = events.split_first()?;
        let InvoiceEvent::InvoiceCreated {
            invoice_id,
            issuer_id,
            price,
            created_at,
        } = first
        else {
            return None;
        };

        let invoice = Self {
            id: *invoice_id,
            issuer_id: *issuer_id,
            price: price.clone(),
            status: InvoiceStatus::Open,
            bids: Vec::new(),
            version: 1,
            created_at: *created_at,
        };

        Some(invoice.apply_all(rest.iter().cloned()))
    }

    /// Create an invoice from stored state
    pub fn from_db_state(
        id: Uuid,
        issuer_id: Uuid,
        price: Money,
        status: InvoiceStatus,
        bids: Vec<Bid>,
        version: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            issuer_id,
            price,
            status,
            bids,
            version,
            created_at,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Sum of active bids, converted to the price currency
    pub fn subscribed(&self, converter: &dyn CurrencyConverter) -> Result<Money, DomainError> {
        self.active_bids().try_fold(Money::zero(self.price.currency().clone()), |sum, bid| {
            let converted = converter.convert(&bid.amount, self.price.currency())?;
            sum.checked_add(&converted)
        })
    }

    /// Price minus the sum of active bids
    pub fn remaining_price(&self, converter: &dyn CurrencyConverter) -> Result<Money, DomainError> {
        self.price.checked_sub(&self.subscribed(converter)?)
    }

    /// Amount a bid of `requested` would be allocated right now:
    /// the requested amount converted to the price currency, clipped to the
    /// remaining price.
    pub fn quote(
        &self,
        requested: &Money,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, DomainError> {
        self.ensure_status(InvoiceStatus::Open)?;
        requested.ensure_positive()?;

        let converted = converter.convert(requested, self.price.currency())?;
        let remaining = self.remaining_price(converter)?;
        let allocated = converted.min(&remaining)?;

        // An OPEN invoice always has something left; anything else means the
        // stored state is already fully subscribed.
        if !allocated.is_positive() {
            return Err(DomainError::InvalidState {
                invoice_id: self.id,
                status: InvoiceStatus::Locked,
                required: InvoiceStatus::Open,
            });
        }

        Ok(allocated)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Place a bid. The allocation is clipped to the remaining price and the
    /// invoice locks in the same batch of events when nothing remains.
    pub fn place_bid(
        &self,
        investor_id: Uuid,
        requested: &Money,
        converter: &dyn CurrencyConverter,
    ) -> Result<BidPlacement, DomainError> {
        let allocated = self.quote(requested, converter)?;
        let remaining_after = self.remaining_price(converter)?.checked_sub(&allocated)?;

        let bid_id = Uuid::new_v4();
        let now = Utc::now();

        let mut events = vec![InvoiceEvent::BidPlaced {
            bid_id,
            invoice_id: self.id,
            investor_id,
            amount: allocated.clone(),
            placed_at: now,
        }];

        let locks_invoice = remaining_after.is_zero();
        if locks_invoice {
            events.push(InvoiceEvent::InvoiceLocked {
                invoice_id: self.id,
                locked_at: now,
            });
        }

        Ok(BidPlacement {
            bid_id,
            allocated,
            locks_invoice,
            events,
        })
    }

    /// Resolve a LOCKED invoice. Approval trades it; rejection reopens it and
    /// disables every active bid.
    pub fn approve_trade(&self, approved: bool) -> Result<TradeResolution, DomainError> {
        self.ensure_status(InvoiceStatus::Locked)?;

        let bid_ids: Vec<Uuid> = self.active_bids().map(|bid| bid.id).collect();
        let now = Utc::now();

        let event = if approved {
            InvoiceEvent::TradeApproved {
                invoice_id: self.id,
                bid_ids: bid_ids.clone(),
                approved_at: now,
            }
        } else {
            InvoiceEvent::TradeRejected {
                invoice_id: self.id,
                disabled_bid_ids: bid_ids.clone(),
                rejected_at: now,
            }
        };

        Ok(TradeResolution {
            approved,
            bid_ids,
            event,
        })
    }

    /// Whether `event` is a legal next step from the current state
    pub fn accepts(&self, event: &InvoiceEvent) -> bool {
        event.invoice_id() == self.id && self.status.next(event).is_some()
    }

    fn ensure_status(&self, required: InvoiceStatus) -> Result<(), DomainError> {
        if self.status != required {
            return Err(DomainError::InvalidState {
                invoice_id: self.id,
                status: self.status,
                required,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn issuer_id(&self) -> Uuid {
        self.issuer_id
    }

    pub fn price(&self) -> &Money {
        &self.price
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    /// All bids in placement order, active or not
    pub fn bids(&self) -> &[Bid] {
        &self.bids
    }

    pub fn active_bids(&self) -> impl Iterator<Item = &Bid> {
        self.bids.iter().filter(|bid| bid.active)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Aggregate for Invoice {
    type Event = InvoiceEvent;

    fn aggregate_type() -> &'static str {
        "Invoice"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, event: Self::Event) -> Self {
        match event {
            InvoiceEvent::InvoiceCreated {
                invoice_id,
                issuer_id,
                price,
                created_at,
            } => {
                self.id = invoice_id;
                self.issuer_id = issuer_id;
                self.price = price;
                self.status = InvoiceStatus::Open;
                self.bids.clear();
                self.created_at = created_at;
            }

            InvoiceEvent::BidPlaced {
                bid_id,
                invoice_id,
                investor_id,
                amount,
                placed_at,
            } => {
                self.bids.push(Bid {
                    id: bid_id,
                    invoice_id,
                    investor_id,
                    amount,
                    active: true,
                    placed_at,
                });
            }

            InvoiceEvent::InvoiceLocked { .. } => {
                self.status = InvoiceStatus::Locked;
            }

            InvoiceEvent::TradeApproved { .. } => {
                self.status = InvoiceStatus::Traded;
            }

            InvoiceEvent::TradeRejected {
                disabled_bid_ids, ..
            } => {
                self.status = InvoiceStatus::Open;
                for bid in self
                    .bids
                    .iter_mut()
                    .filter(|bid| disabled_bid_ids.contains(&bid.id))
                {
                    bid.active = false;
                }
            }
        }

        self.version += 1;
        self
    }
}
