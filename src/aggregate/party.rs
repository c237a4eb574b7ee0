//! Investor and Issuer
//!
//! Market participants and their per-currency balances. Investors fund bids,
//! issuers receive trade proceeds. Neither is ever deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Balances, DomainError, Money};

/// An investor who reserves funds against invoices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investor {
    id: Uuid,
    full_name: String,
    balances: Balances,
    created_at: DateTime<Utc>,
}

impl Investor {
    /// Create a new investor with opening balances.
    /// Opening amounts in the same currency are summed into one bucket.
    pub fn create(full_name: String, opening: &[Money]) -> Result<Self, DomainError> {
        let mut balances = Balances::new();
        for amount in opening {
            balances.credit(amount)?;
        }

        Ok(Self {
            id: Uuid::new_v4(),
            full_name,
            balances,
            created_at: Utc::now(),
        })
    }

    /// Create an investor from stored state
    pub fn from_db_state(
        id: Uuid,
        full_name: String,
        balances: Balances,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            full_name,
            balances,
            created_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn balances(&self) -> &Balances {
        &self.balances
    }

    pub fn balances_mut(&mut self) -> &mut Balances {
        &mut self.balances
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// An issuer who publishes invoices and receives trade proceeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issuer {
    id: Uuid,
    full_name: String,
    balances: Balances,
    created_at: DateTime<Utc>,
}

impl Issuer {
    /// Create a new issuer with no balance buckets
    pub fn create(full_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            full_name,
            balances: Balances::new(),
            created_at: Utc::now(),
        }
    }

    /// Create an issuer from stored state
    pub fn from_db_state(
        id: Uuid,
        full_name: String,
        balances: Balances,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            full_name,
            balances,
            created_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn balances(&self) -> &Balances {
        &self.balances
    }

    pub fn balances_mut(&mut self) -> &mut Balances {
        &mut self.balances
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
