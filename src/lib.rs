//! invoice_bidder Library
//!
//! Invoice factoring engine: issuers sell invoices, investors bid on them,
//! and a settlement broker moves money once a trade is decided.

pub mod aggregate;
pub mod api;
pub mod broker;
pub mod domain;
pub mod handlers;
pub mod store;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use domain::{DomainError, Money};
pub use error::{AppError, AppResult};
