//! Aggregate module
//!
//! Aggregate roots: the invoice with its bids, and the parties whose
//! balances the ledger mutates.

pub mod invoice;
pub mod party;

pub use invoice::{Bid, BidPlacement, Invoice, InvoiceStatus, TradeResolution};
pub use party::{Investor, Issuer};

/// Aggregate trait for event-driven state changes
pub trait Aggregate: Sized {
    /// The type of events this aggregate handles
    type Event;

    /// Get the aggregate type name (for storage and logs)
    fn aggregate_type() -> &'static str;

    /// Get the aggregate ID
    fn id(&self) -> uuid::Uuid;

    /// Get the current version (number of events applied)
    fn version(&self) -> i64;

    /// Apply an event to update the aggregate state
    fn apply(self, event: Self::Event) -> Self;

    /// Apply events in order
    fn apply_all<I>(self, events: I) -> Self
    where
        I: IntoIterator<Item = Self::Event>,
    {
        events.into_iter().fold(self, Self::apply)
    }
}
