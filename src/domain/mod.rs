//! Domain module
//!
//! Core domain types and business logic.

pub mod error;
pub mod events;
pub mod money;

pub use error::DomainError;
pub use events::InvoiceEvent;
pub use money::{
    Balances, Currency, CurrencyConverter, Money, NominalConverter, RateTable, MAX_AMOUNT,
};
