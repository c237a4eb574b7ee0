//! Invoice Service
//!
//! Loads invoices, runs aggregate commands against them and records the
//! resulting events. Every read-modify-write of one invoice holds that
//! invoice's lock; the store's version check backs it up.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Bid, BidPlacement, Invoice, TradeResolution};
use crate::broker::InvoiceLookup;
use crate::domain::{CurrencyConverter, DomainError, Money, NominalConverter};
use crate::error::AppResult;
use crate::store::{AttachmentStore, InvoiceStore, PartyStore};

use super::KeyedLocks;

/// Invoice operations
pub struct InvoiceService {
    invoices: Arc<dyn InvoiceStore>,
    parties: Arc<dyn PartyStore>,
    attachments: Arc<dyn AttachmentStore>,
    converter: Arc<dyn CurrencyConverter>,
    locks: KeyedLocks,
}

impl InvoiceService {
    /// Create a service using nominal currency conversion
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        parties: Arc<dyn PartyStore>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> Self {
        Self {
            invoices,
            parties,
            attachments,
            converter: Arc::new(NominalConverter),
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn CurrencyConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn converter(&self) -> &dyn CurrencyConverter {
        self.converter.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn held_locks(&self) -> usize {
        self.locks.len()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Create an OPEN invoice for an existing issuer, then store its document
    pub async fn create_invoice(
        &self,
        issuer_id: Uuid,
        price: Money,
        document: &[u8],
    ) -> AppResult<Invoice> {
        if self.parties.issuer(issuer_id).await?.is_none() {
            return Err(DomainError::not_found("issuer", issuer_id).into());
        }

        let (invoice, created) = Invoice::create(issuer_id, price)?;
        self.invoices.record(invoice.id(), 0, &[created]).await?;

        if let Err(e) = self.attachments.save(invoice.id(), document).await {
            tracing::error!(
                invoice_id = %invoice.id(),
                error = %e,
                "Invoice created but its document could not be stored"
            );
            return Err(e.into());
        }

        tracing::info!(
            invoice_id = %invoice.id(),
            issuer_id = %issuer_id,
            price = %invoice.price(),
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Reserve up to `requested` on an OPEN invoice. The invoice locks in the
    /// same write when the bid fully subscribes it.
    pub async fn place_bid(
        &self,
        invoice_id: Uuid,
        investor_id: Uuid,
        requested: &Money,
    ) -> AppResult<BidPlacement> {
        self.get_invoice(invoice_id).await?;
        let _guard = self.locks.lock(invoice_id).await;

        let invoice = self.get_invoice(invoice_id).await?;
        let placement = invoice.place_bid(investor_id, requested, self.converter())?;

        self.invoices
            .record(invoice_id, invoice.version(), &placement.events)
            .await?;

        tracing::info!(
            invoice_id = %invoice_id,
            investor_id = %investor_id,
            bid_id = %placement.bid_id,
            allocated = %placement.allocated,
            locked = placement.locks_invoice,
            "Bid placed"
        );

        Ok(placement)
    }

    /// Resolve a LOCKED invoice: approval trades it, rejection reopens it
    /// and disables its active bids.
    pub async fn approve_trade(
        &self,
        invoice_id: Uuid,
        approved: bool,
    ) -> AppResult<TradeResolution> {
        self.get_invoice(invoice_id).await?;
        let _guard = self.locks.lock(invoice_id).await;

        let invoice = self.get_invoice(invoice_id).await?;
        let resolution = invoice.approve_trade(approved)?;

        self.invoices
            .record(
                invoice_id,
                invoice.version(),
                std::slice::from_ref(&resolution.event),
            )
            .await?;

        tracing::info!(
            invoice_id = %invoice_id,
            approved,
            bids = resolution.bid_ids.len(),
            "Trade resolved"
        );

        Ok(resolution)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_invoice(&self, invoice_id: Uuid) -> AppResult<Invoice> {
        self.invoices
            .invoice(invoice_id)
            .await?
            .ok_or_else(|| DomainError::not_found("invoice", invoice_id).into())
    }

    pub async fn invoices_by_issuer(&self, issuer_id: Uuid) -> AppResult<Vec<Invoice>> {
        Ok(self.invoices.invoices_by_issuer(issuer_id).await?)
    }

    pub async fn bids_by_ids(&self, bid_ids: &[Uuid]) -> AppResult<Vec<Bid>> {
        Ok(self.invoices.bids_by_ids(bid_ids).await?)
    }

    /// Price minus the active bids
    pub async fn get_remaining_price(&self, invoice_id: Uuid) -> AppResult<Money> {
        let invoice = self.get_invoice(invoice_id).await?;
        Ok(invoice.remaining_price(self.converter())?)
    }

    /// Amount a bid of `requested` would be allocated right now
    pub async fn quote_bid(&self, invoice_id: Uuid, requested: &Money) -> AppResult<Money> {
        let invoice = self.get_invoice(invoice_id).await?;
        Ok(invoice.quote(requested, self.converter())?)
    }
}

#[async_trait]
impl InvoiceLookup for InvoiceService {
    async fn invoice(&self, invoice_id: Uuid) -> AppResult<Invoice> {
        self.get_invoice(invoice_id).await
    }

    async fn bids(&self, bid_ids: &[Uuid]) -> AppResult<Vec<Bid>> {
        self.bids_by_ids(bid_ids).await
    }
}
