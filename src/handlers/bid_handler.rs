//! Bid Handler
//!
//! The bid flow: quote, debit, place. Funds are taken before the bid is
//! placed; anything debited but not reserved on the invoice is handed to
//! the settlement broker for refund.

use std::sync::Arc;

use crate::broker::Broker;
use crate::error::AppResult;

use super::{InvoiceService, LedgerService, PlaceBidCommand, PlaceBidResult};

/// Handler for bids on invoices
pub struct BidHandler {
    invoices: Arc<InvoiceService>,
    ledger: Arc<LedgerService>,
    broker: Arc<Broker>,
}

impl BidHandler {
    pub fn new(
        invoices: Arc<InvoiceService>,
        ledger: Arc<LedgerService>,
        broker: Arc<Broker>,
    ) -> Self {
        Self {
            invoices,
            ledger,
            broker,
        }
    }

    /// Execute the bid command
    pub async fn execute(&self, command: PlaceBidCommand) -> AppResult<PlaceBidResult> {
        let PlaceBidCommand {
            invoice_id,
            investor_id,
            amount,
        } = command;

        // Investor must exist before anything is quoted or debited
        self.ledger.investor(investor_id).await?;

        // Clip to what is left so the investor is never charged for more
        let quote = self.invoices.quote_bid(invoice_id, &amount).await?;

        self.ledger.debit(investor_id, &quote).await?;

        let placement = match self
            .invoices
            .place_bid(invoice_id, investor_id, &quote)
            .await
        {
            Ok(placement) => placement,
            Err(e) => {
                tracing::warn!(
                    invoice_id = %invoice_id,
                    investor_id = %investor_id,
                    amount = %quote,
                    error = %e,
                    "Bid failed after debit, refunding"
                );
                self.broker.send_failed_bid_event(investor_id, quote).await;
                return Err(e);
            }
        };

        // A concurrent bid may have taken part of the quote
        let unplaced = quote.checked_sub(&placement.allocated)?;
        if unplaced.is_positive() {
            tracing::info!(
                invoice_id = %invoice_id,
                investor_id = %investor_id,
                amount = %unplaced,
                "Bid partially placed, refunding remainder"
            );
            self.broker.send_failed_bid_event(investor_id, unplaced).await;
        }

        Ok(PlaceBidResult {
            bid_id: placement.bid_id,
            invoice_id,
            investor_id,
            amount: placement.allocated,
            invoice_locked: placement.locks_invoice,
        })
    }
}
