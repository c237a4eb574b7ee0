//! Postgres Store
//!
//! sqlx-backed implementation of the invoice and party stores.
//!
//! The `invoices` row carries the current status and version; `record`
//! locks it with `SELECT ... FOR UPDATE`, checks the expected version and
//! walks the status machine inside one transaction. Every persisted event is
//! also appended to `invoice_events` for auditing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::aggregate::{Aggregate, Bid, Investor, Invoice, InvoiceStatus, Issuer};
use crate::domain::{Balances, InvoiceEvent, Money};

use super::{BalanceUpdate, InvoiceStore, PartyStore, StoreError, StoreResult};

type InvoiceRow = (Uuid, Uuid, Decimal, String, String, i64, DateTime<Utc>);
type BidRow = (Uuid, Uuid, Uuid, Decimal, String, bool, DateTime<Utc>);
type PartyRow = (Uuid, String, DateTime<Utc>);

/// Postgres-backed store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // =========================================================================
    // Row mapping
    // =========================================================================

    fn money(amount: Decimal, currency: &str) -> StoreResult<Money> {
        Money::parse(&amount.to_string(), currency).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn status(value: &str) -> StoreResult<InvoiceStatus> {
        InvoiceStatus::parse(value)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown invoice status {value:?}")))
    }

    fn bid(row: BidRow) -> StoreResult<Bid> {
        let (id, invoice_id, investor_id, amount, currency, active, placed_at) = row;
        Ok(Bid {
            id,
            invoice_id,
            investor_id,
            amount: Self::money(amount, &currency)?,
            active,
            placed_at,
        })
    }

    async fn balances(&self, party_id: Uuid) -> StoreResult<Balances> {
        let rows: Vec<(String, Decimal)> = sqlx::query_as(
            r#"
            SELECT currency, amount FROM balances
            WHERE party_id = $1
            ORDER BY currency
            "#,
        )
        .bind(party_id)
        .fetch_all(&self.pool)
        .await?;

        let mut balances = Balances::new();
        for (currency, amount) in rows {
            balances
                .set(Self::money(amount, &currency)?)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        }
        Ok(balances)
    }

    async fn invoice_from_row(&self, row: InvoiceRow) -> StoreResult<Invoice> {
        let (id, issuer_id, price_amount, price_currency, status, version, created_at) = row;

        let bids = sqlx::query_as::<_, BidRow>(
            r#"
            SELECT id, invoice_id, investor_id, amount, currency, active, placed_at
            FROM bids
            WHERE invoice_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Self::bid)
        .collect::<StoreResult<Vec<_>>>()?;

        Ok(Invoice::from_db_state(
            id,
            issuer_id,
            Self::money(price_amount, &price_currency)?,
            Self::status(&status)?,
            bids,
            version,
            created_at,
        ))
    }

    async fn insert_balances(
        tx: &mut Transaction<'_, Postgres>,
        party_id: Uuid,
        buckets: impl Iterator<Item = Money>,
    ) -> StoreResult<()> {
        for bucket in buckets {
            sqlx::query(
                r#"
                INSERT INTO balances (party_id, currency, amount)
                VALUES ($1, $2, $3)
                ON CONFLICT (party_id, currency)
                DO UPDATE SET amount = EXCLUDED.amount, updated_at = NOW()
                "#,
            )
            .bind(party_id)
            .bind(bucket.currency().code())
            .bind(bucket.amount())
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Event persistence
    // =========================================================================

    /// Apply one event's effect to the tables and return the new status
    async fn write_event(
        tx: &mut Transaction<'_, Postgres>,
        invoice_id: Uuid,
        status: Option<InvoiceStatus>,
        event: &InvoiceEvent,
    ) -> StoreResult<InvoiceStatus> {
        let invalid = |status: InvoiceStatus| StoreError::InvalidTransition {
            id: invoice_id,
            event: event.event_type(),
            status,
        };

        if event.invoice_id() != invoice_id {
            return Err(StoreError::Corrupt(format!(
                "{} for invoice {} recorded under {invoice_id}",
                event.event_type(),
                event.invoice_id()
            )));
        }

        let Some(current) = status else {
            let InvoiceEvent::InvoiceCreated {
                issuer_id,
                price,
                created_at,
                ..
            } = event
            else {
                return Err(StoreError::MissingEntity {
                    entity: Invoice::aggregate_type(),
                    id: invoice_id,
                });
            };

            sqlx::query(
                r#"
                INSERT INTO invoices (
                    id, issuer_id, price_amount, price_currency, status, version, created_at
                )
                VALUES ($1, $2, $3, $4, $5, 0, $6)
                "#,
            )
            .bind(invoice_id)
            .bind(issuer_id)
            .bind(price.amount())
            .bind(price.currency().code())
            .bind(InvoiceStatus::Open.as_str())
            .bind(created_at)
            .execute(&mut **tx)
            .await?;

            return Ok(InvoiceStatus::Open);
        };

        let next = current.next(event).ok_or_else(|| invalid(current))?;

        match event {
            InvoiceEvent::BidPlaced {
                bid_id,
                investor_id,
                amount,
                placed_at,
                ..
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO bids (id, invoice_id, investor_id, amount, currency, active, placed_at)
                    VALUES ($1, $2, $3, $4, $5, TRUE, $6)
                    "#,
                )
                .bind(bid_id)
                .bind(invoice_id)
                .bind(investor_id)
                .bind(amount.amount())
                .bind(amount.currency().code())
                .bind(placed_at)
                .execute(&mut **tx)
                .await?;
            }

            InvoiceEvent::TradeRejected {
                disabled_bid_ids, ..
            } => {
                sqlx::query(
                    r#"
                    UPDATE bids SET active = FALSE
                    WHERE invoice_id = $1 AND id = ANY($2)
                    "#,
                )
                .bind(invoice_id)
                .bind(disabled_bid_ids.clone())
                .execute(&mut **tx)
                .await?;
            }

            InvoiceEvent::InvoiceCreated { .. }
            | InvoiceEvent::InvoiceLocked { .. }
            | InvoiceEvent::TradeApproved { .. } => {}
        }

        Ok(next)
    }
}

#[async_trait]
impl InvoiceStore for PgStore {
    async fn invoice(&self, id: Uuid) -> StoreResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT id, issuer_id, price_amount, price_currency, status, version, created_at
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.invoice_from_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn invoices_by_issuer(&self, issuer_id: Uuid) -> StoreResult<Vec<Invoice>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT id, issuer_id, price_amount, price_currency, status, version, created_at
            FROM invoices
            WHERE issuer_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(issuer_id)
        .fetch_all(&self.pool)
        .await?;

        let mut invoices = Vec::with_capacity(rows.len());
        for row in rows {
            invoices.push(self.invoice_from_row(row).await?);
        }
        Ok(invoices)
    }

    async fn bids_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Bid>> {
        sqlx::query_as::<_, BidRow>(
            r#"
            SELECT id, invoice_id, investor_id, amount, currency, active, placed_at
            FROM bids
            WHERE id = ANY($1)
            ORDER BY seq ASC
            "#,
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Self::bid)
        .collect()
    }

    async fn record(
        &self,
        invoice_id: Uuid,
        expected_version: i64,
        events: &[InvoiceEvent],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, version FROM invoices
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (mut status, mut version) = match current {
            Some((status, version)) => (Some(Self::status(&status)?), version),
            None => (None, 0),
        };

        if version != expected_version {
            return Err(StoreError::Conflict {
                entity: Invoice::aggregate_type(),
                id: invoice_id,
                expected: expected_version,
                actual: version,
            });
        }

        for event in events {
            status = Some(Self::write_event(&mut tx, invoice_id, status, event).await?);
            version += 1;

            sqlx::query(
                r#"
                INSERT INTO invoice_events (invoice_id, version, event_type, event_data)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(invoice_id)
            .bind(version)
            .bind(event.event_type())
            .bind(serde_json::to_value(event)?)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(status) = status {
            sqlx::query(
                r#"
                UPDATE invoices SET status = $2, version = $3
                WHERE id = $1
                "#,
            )
            .bind(invoice_id)
            .bind(status.as_str())
            .bind(version)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            invoice_id = %invoice_id,
            events = events.len(),
            version,
            "Invoice events recorded"
        );

        Ok(())
    }
}

#[async_trait]
impl PartyStore for PgStore {
    async fn create_investor(&self, investor: &Investor) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO investors (id, full_name, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(investor.id())
        .bind(investor.full_name())
        .bind(investor.created_at())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::Duplicate {
                entity: "investor",
                id: investor.id(),
            });
        }

        Self::insert_balances(&mut tx, investor.id(), investor.balances().iter()).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn investor(&self, id: Uuid) -> StoreResult<Option<Investor>> {
        let row: Option<PartyRow> =
            sqlx::query_as("SELECT id, full_name, created_at FROM investors WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((id, full_name, created_at)) => {
                let balances = self.balances(id).await?;
                Ok(Some(Investor::from_db_state(id, full_name, balances, created_at)))
            }
            None => Ok(None),
        }
    }

    async fn investors(&self, ids: &[Uuid]) -> StoreResult<Vec<Investor>> {
        let mut investors = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(investor) = self.investor(*id).await? {
                investors.push(investor);
            }
        }
        Ok(investors)
    }

    async fn create_issuer(&self, issuer: &Issuer) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO issuers (id, full_name, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(issuer.id())
        .bind(issuer.full_name())
        .bind(issuer.created_at())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::Duplicate {
                entity: "issuer",
                id: issuer.id(),
            });
        }

        Self::insert_balances(&mut tx, issuer.id(), issuer.balances().iter()).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn issuer(&self, id: Uuid) -> StoreResult<Option<Issuer>> {
        let row: Option<PartyRow> =
            sqlx::query_as("SELECT id, full_name, created_at FROM issuers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((id, full_name, created_at)) => {
                let balances = self.balances(id).await?;
                Ok(Some(Issuer::from_db_state(id, full_name, balances, created_at)))
            }
            None => Ok(None),
        }
    }

    async fn update_balance(&self, party_id: Uuid, balance: &Money) -> StoreResult<()> {
        self.update_balances(&[BalanceUpdate {
            party_id,
            balances: vec![balance.clone()],
        }])
        .await
    }

    async fn update_balances(&self, updates: &[BalanceUpdate]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for update in updates {
            let exists: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (SELECT 1 FROM investors WHERE id = $1)
                    OR EXISTS (SELECT 1 FROM issuers WHERE id = $1)
                "#,
            )
            .bind(update.party_id)
            .fetch_one(&mut *tx)
            .await?;

            if !exists {
                return Err(StoreError::MissingEntity {
                    entity: "party",
                    id: update.party_id,
                });
            }

            Self::insert_balances(&mut tx, update.party_id, update.balances.iter().cloned())
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
