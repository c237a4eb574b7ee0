//! Command Handlers module
//!
//! Services and command handlers that orchestrate business operations.
//! Services own one aggregate each; handlers coordinate services and the
//! settlement broker.

mod bid_handler;
mod commands;
mod invoice_handler;
mod ledger_handler;
mod locks;
mod trade_handler;

#[cfg(test)]
mod tests;

pub use bid_handler::BidHandler;
pub use commands::*;
pub use invoice_handler::InvoiceService;
pub use ledger_handler::LedgerService;
pub use locks::{KeyedGuard, KeyedLocks};
pub use trade_handler::TradeHandler;
