//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::InvoiceStatus;

use super::{Currency, Money};

/// Business rule violations and domain invariant failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Invoice status does not allow the requested transition
    #[error("Invalid state: invoice {invoice_id} is {status}, operation requires {required}")]
    InvalidState {
        invoice_id: Uuid,
        status: InvoiceStatus,
        required: InvoiceStatus,
    },

    /// Balance bucket would go negative
    #[error("Insufficient funds for {party_id}: required {required}, available {available}")]
    InsufficientFunds {
        party_id: Uuid,
        required: Money,
        available: Money,
    },

    /// Invoice, investor or issuer does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Amounts in different currencies met without a usable conversion
    #[error("Cannot convert {from} to {to}")]
    CurrencyConversion { from: Currency, to: Currency },

    /// Zero, negative or malformed amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed currency code
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn insufficient_funds(party_id: Uuid, required: Money, available: Money) -> Self {
        Self::InsufficientFunds {
            party_id,
            required,
            available,
        }
    }

    /// Check if this is a client error (caller's fault, retrying won't help)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. }
                | Self::InvalidAmount(_)
                | Self::InvalidCurrency(_)
                | Self::InvalidState { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_error() {
        let err = DomainError::insufficient_funds(
            Uuid::new_v4(),
            Money::parse("100", "EUR").unwrap(),
            Money::parse("50", "EUR").unwrap(),
        );

        assert!(err.is_client_error());
        assert!(err.to_string().contains("100 EUR"));
        assert!(err.to_string().contains("50 EUR"));
    }

    #[test]
    fn test_not_found_error() {
        let id = Uuid::new_v4();
        let err = DomainError::not_found("investor", id);

        assert!(!err.is_client_error());
        assert_eq!(err.to_string(), format!("investor not found: {id}"));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = DomainError::InvalidState {
            invoice_id: Uuid::nil(),
            status: InvoiceStatus::Traded,
            required: InvoiceStatus::Open,
        };

        assert!(err.to_string().contains("is traded"));
        assert!(err.to_string().contains("requires open"));
    }
}
