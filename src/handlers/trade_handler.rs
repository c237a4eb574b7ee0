//! Trade Handler
//!
//! Resolves a locked invoice and hands settlement to the broker.

use std::sync::Arc;

use crate::aggregate::InvoiceStatus;
use crate::broker::Broker;
use crate::error::AppResult;

use super::{InvoiceService, TradeCommand, TradeResult};

/// Handler for trade decisions
pub struct TradeHandler {
    invoices: Arc<InvoiceService>,
    broker: Arc<Broker>,
}

impl TradeHandler {
    pub fn new(invoices: Arc<InvoiceService>, broker: Arc<Broker>) -> Self {
        Self { invoices, broker }
    }

    /// Execute the trade command. The state change is persisted before the
    /// settlement event is queued.
    pub async fn execute(&self, command: TradeCommand) -> AppResult<TradeResult> {
        let resolution = self
            .invoices
            .approve_trade(command.invoice_id, command.approved)
            .await?;

        self.broker
            .send_trade_event(
                command.invoice_id,
                resolution.bid_ids.clone(),
                resolution.approved,
            )
            .await;

        let status = if resolution.approved {
            InvoiceStatus::Traded
        } else {
            InvoiceStatus::Open
        };

        Ok(TradeResult {
            invoice_id: command.invoice_id,
            approved: resolution.approved,
            status,
            bid_ids: resolution.bid_ids,
        })
    }
}
