//! Store module
//!
//! Persistence seams of the engine. The core only talks to these traits;
//! an in-memory implementation backs tests and local runs, Postgres backs
//! deployments, and invoice documents go to an attachment store.

mod error;
mod file;
mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::aggregate::{Bid, Investor, Invoice, Issuer};
use crate::domain::{InvoiceEvent, Money};

pub use error::{StoreError, StoreResult};
pub use file::FileAttachmentStore;
pub use memory::{MemoryAttachmentStore, MemoryStore};
pub use postgres::PgStore;

/// New values for some balance buckets of one party
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceUpdate {
    pub party_id: Uuid,
    /// Absolute bucket values, one per currency
    pub balances: Vec<Money>,
}

/// Invoice persistence
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Load an invoice with all of its bids (active and disabled)
    async fn invoice(&self, id: Uuid) -> StoreResult<Option<Invoice>>;

    async fn invoices_by_issuer(&self, issuer_id: Uuid) -> StoreResult<Vec<Invoice>>;

    async fn bids_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Bid>>;

    /// Atomically persist the events of one command.
    ///
    /// `expected_version` is the version the events were computed against
    /// (0 for a new invoice). A stale version or an event that is not legal
    /// from the stored status fails without writing anything.
    async fn record(
        &self,
        invoice_id: Uuid,
        expected_version: i64,
        events: &[InvoiceEvent],
    ) -> StoreResult<()>;
}

/// Investor and issuer persistence
#[async_trait]
pub trait PartyStore: Send + Sync {
    async fn create_investor(&self, investor: &Investor) -> StoreResult<()>;

    async fn investor(&self, id: Uuid) -> StoreResult<Option<Investor>>;

    /// Investors among `ids`; unknown ids are skipped
    async fn investors(&self, ids: &[Uuid]) -> StoreResult<Vec<Investor>>;

    async fn create_issuer(&self, issuer: &Issuer) -> StoreResult<()>;

    async fn issuer(&self, id: Uuid) -> StoreResult<Option<Issuer>>;

    /// Overwrite one balance bucket of an investor or issuer
    async fn update_balance(&self, party_id: Uuid, balance: &Money) -> StoreResult<()>;

    /// Overwrite buckets of several parties in one atomic write
    async fn update_balances(&self, updates: &[BalanceUpdate]) -> StoreResult<()>;
}

/// Invoice document storage
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn save(&self, invoice_id: Uuid, document: &[u8]) -> StoreResult<()>;
}
