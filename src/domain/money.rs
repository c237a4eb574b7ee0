//! Money type
//!
//! Domain primitive for monetary values: a decimal amount tagged with an
//! ISO 4217 currency code. Values are immutable, every operation returns a
//! new value, and amounts in different currencies are never combined without
//! going through a [`CurrencyConverter`].

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::DomainError;

/// Maximum decimal places (8)
pub const MAX_SCALE: u32 = 8;

/// Largest absolute amount a single value may carry (one quadrillion)
pub const MAX_AMOUNT: i64 = 1_000_000_000_000_000;

// =========================================================================
// Currency
// =========================================================================

/// Three-letter currency code, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parse a currency code. Lower-case input is accepted and normalised.
    pub fn new(code: &str) -> Result<Self, DomainError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

// =========================================================================
// Money
// =========================================================================

/// Money represents an amount in a single currency.
///
/// # Invariants
/// - At most 8 decimal places
/// - Arithmetic and comparison only between equal currencies
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use invoice_bidder::domain::Money;
///
/// let price = Money::parse("1000", "EUR").unwrap();
/// let bid = Money::parse("600", "EUR").unwrap();
/// assert_eq!(price.checked_sub(&bid).unwrap().amount(), Decimal::new(400, 0));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    /// Create a new Money value.
    ///
    /// # Errors
    /// - `DomainError::InvalidAmount` if more than 8 decimal places
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, DomainError> {
        if amount.scale() > MAX_SCALE {
            return Err(DomainError::InvalidAmount(format!(
                "too many decimal places (max {MAX_SCALE}, got {})",
                amount.scale()
            )));
        }
        if amount.abs() > Decimal::from(MAX_AMOUNT) {
            return Err(DomainError::InvalidAmount(format!(
                "amount exceeds maximum allowed value ({MAX_AMOUNT})"
            )));
        }
        Ok(Self { amount, currency })
    }

    /// Parse an amount string and a currency code.
    pub fn parse(amount: &str, currency: &str) -> Result<Self, DomainError> {
        let currency = Currency::new(currency)?;
        let amount: Decimal = amount
            .trim()
            .parse()
            .map_err(|e| DomainError::InvalidAmount(format!("{amount:?}: {e}")))?;
        Self::new(amount, currency)
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Fail with `InvalidAmount` unless the value is strictly positive.
    pub fn ensure_positive(&self) -> Result<(), DomainError> {
        if self.is_positive() {
            Ok(())
        } else {
            Err(DomainError::InvalidAmount(format!(
                "amount must be positive (got {self})"
            )))
        }
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, DomainError> {
        self.same_currency(other)?;
        let sum = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| overflow("addition", self, other))?;
        Money::new(sum, self.currency.clone())
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, DomainError> {
        self.same_currency(other)?;
        let difference = self
            .amount
            .checked_sub(other.amount)
            .ok_or_else(|| overflow("subtraction", self, other))?;
        Money::new(difference, self.currency.clone())
    }

    /// Compare two amounts of the same currency.
    pub fn cmp_amount(&self, other: &Money) -> Result<Ordering, DomainError> {
        self.same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    /// The smaller of two amounts of the same currency.
    pub fn min(&self, other: &Money) -> Result<Money, DomainError> {
        match self.cmp_amount(other)? {
            Ordering::Greater => Ok(other.clone()),
            _ => Ok(self.clone()),
        }
    }

    fn same_currency(&self, other: &Money) -> Result<(), DomainError> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyConversion {
                from: other.currency.clone(),
                to: self.currency.clone(),
            });
        }
        Ok(())
    }
}

fn overflow(operation: &str, left: &Money, right: &Money) -> DomainError {
    DomainError::InvalidAmount(format!("{operation} overflowed: {left} and {right}"))
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

// =========================================================================
// Currency conversion
// =========================================================================

/// Source of exchange rates used wherever two currencies meet.
pub trait CurrencyConverter: Send + Sync {
    /// Express `money` in `to`. Same-currency conversion is the identity.
    fn convert(&self, money: &Money, to: &Currency) -> Result<Money, DomainError>;
}

/// Nominal 1:1 conversion: keeps the amount and relabels the currency.
///
/// This is a placeholder, not an exchange rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NominalConverter;

impl CurrencyConverter for NominalConverter {
    fn convert(&self, money: &Money, to: &Currency) -> Result<Money, DomainError> {
        Money::new(money.amount, to.clone())
    }
}

/// Explicit rate table. Unknown pairs fail with `CurrencyConversion`.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: HashMap<(Currency, Currency), Decimal>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the rate for converting one unit of `from` into `to`.
    pub fn with_rate(
        mut self,
        from: Currency,
        to: Currency,
        rate: Decimal,
    ) -> Result<Self, DomainError> {
        if rate <= Decimal::ZERO {
            return Err(DomainError::InvalidAmount(format!(
                "exchange rate must be positive (got {rate})"
            )));
        }
        self.rates.insert((from, to), rate);
        Ok(self)
    }
}

impl CurrencyConverter for RateTable {
    fn convert(&self, money: &Money, to: &Currency) -> Result<Money, DomainError> {
        if money.currency() == to {
            return Ok(money.clone());
        }

        let rate = self
            .rates
            .get(&(money.currency().clone(), to.clone()))
            .ok_or_else(|| DomainError::CurrencyConversion {
                from: money.currency().clone(),
                to: to.clone(),
            })?;

        let converted = money
            .amount()
            .checked_mul(*rate)
            .ok_or_else(|| {
                DomainError::InvalidAmount(format!("conversion of {money} to {to} overflowed"))
            })?
            .round_dp_with_strategy(MAX_SCALE, RoundingStrategy::MidpointNearestEven);
        Money::new(converted, to.clone())
    }
}

// =========================================================================
// Balances
// =========================================================================

/// Per-currency balance buckets of an investor or issuer.
///
/// # Invariants
/// - One bucket per currency
/// - No bucket is ever negative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances(BTreeMap<Currency, Decimal>);

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance held in `currency`, zero when the bucket does not exist.
    pub fn get(&self, currency: &Currency) -> Money {
        self.bucket(currency)
            .unwrap_or_else(|| Money::zero(currency.clone()))
    }

    pub fn bucket(&self, currency: &Currency) -> Option<Money> {
        self.0.get(currency).map(|amount| Money {
            amount: *amount,
            currency: currency.clone(),
        })
    }

    /// Overwrite a bucket with a stored value.
    pub fn set(&mut self, bucket: Money) -> Result<(), DomainError> {
        if bucket.is_negative() {
            return Err(DomainError::InvalidAmount(format!(
                "balance cannot be negative (got {bucket})"
            )));
        }
        self.0.insert(bucket.currency, bucket.amount);
        Ok(())
    }

    /// Add to the matching bucket, creating it if absent.
    /// Returns the new bucket value.
    pub fn credit(&mut self, amount: &Money) -> Result<Money, DomainError> {
        amount.ensure_positive()?;
        let updated = self.get(amount.currency()).checked_add(amount)?;
        self.0.insert(updated.currency.clone(), updated.amount);
        Ok(updated)
    }

    /// Subtract from the matching bucket. A missing bucket counts as zero
    /// and is never created by a failed debit.
    pub fn debit(&mut self, party_id: uuid::Uuid, amount: &Money) -> Result<Money, DomainError> {
        amount.ensure_positive()?;
        let available = self.get(amount.currency());
        let updated = available.checked_sub(amount)?;
        if updated.is_negative() {
            return Err(DomainError::insufficient_funds(
                party_id,
                amount.clone(),
                available,
            ));
        }
        self.0.insert(updated.currency.clone(), updated.amount);
        Ok(updated)
    }

    pub fn iter(&self) -> impl Iterator<Item = Money> + '_ {
        self.0.iter().map(|(currency, amount)| Money {
            amount: *amount,
            currency: currency.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
