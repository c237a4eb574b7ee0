//! In-memory stores
//!
//! Process-local implementations of the store traits, used by tests and by
//! the service when no database is configured. Each write takes the relevant
//! maps' write locks for its whole duration, so every call is atomic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::aggregate::{Aggregate, Bid, Investor, Invoice, Issuer};
use crate::domain::{Balances, InvoiceEvent, Money};

use super::{
    AttachmentStore, BalanceUpdate, InvoiceStore, PartyStore, StoreError, StoreResult,
};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory invoice and party store
#[derive(Debug, Default)]
pub struct MemoryStore {
    invoices: RwLock<HashMap<Uuid, Invoice>>,
    investors: RwLock<HashMap<Uuid, Investor>>,
    issuers: RwLock<HashMap<Uuid, Issuer>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn set_bucket(balances: &mut Balances, bucket: &Money) -> StoreResult<()> {
    balances
        .set(bucket.clone())
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn invoice(&self, id: Uuid) -> StoreResult<Option<Invoice>> {
        Ok(read(&self.invoices).get(&id).cloned())
    }

    async fn invoices_by_issuer(&self, issuer_id: Uuid) -> StoreResult<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = read(&self.invoices)
            .values()
            .filter(|invoice| invoice.issuer_id() == issuer_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|invoice| invoice.created_at());
        Ok(invoices)
    }

    async fn bids_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Bid>> {
        Ok(read(&self.invoices)
            .values()
            .flat_map(|invoice| invoice.bids())
            .filter(|bid| ids.contains(&bid.id))
            .cloned()
            .collect())
    }

    async fn record(
        &self,
        invoice_id: Uuid,
        expected_version: i64,
        events: &[InvoiceEvent],
    ) -> StoreResult<()> {
        let mut invoices = write(&self.invoices);

        let current = invoices.get(&invoice_id).cloned();
        let actual = current.as_ref().map_or(0, |invoice| invoice.version());
        if actual != expected_version {
            return Err(StoreError::Conflict {
                entity: Invoice::aggregate_type(),
                id: invoice_id,
                expected: expected_version,
                actual,
            });
        }

        let next = match current {
            Some(mut invoice) => {
                for event in events {
                    if !invoice.accepts(event) {
                        return Err(StoreError::InvalidTransition {
                            id: invoice_id,
                            event: event.event_type(),
                            status: invoice.status(),
                        });
                    }
                    invoice = invoice.apply(event.clone());
                }
                invoice
            }
            None => Invoice::replay(events)
                .filter(|invoice| invoice.id() == invoice_id)
                .ok_or(StoreError::MissingEntity {
                    entity: Invoice::aggregate_type(),
                    id: invoice_id,
                })?,
        };

        invoices.insert(invoice_id, next);
        Ok(())
    }
}

#[async_trait]
impl PartyStore for MemoryStore {
    async fn create_investor(&self, investor: &Investor) -> StoreResult<()> {
        let mut investors = write(&self.investors);
        if investors.contains_key(&investor.id()) {
            return Err(StoreError::Duplicate {
                entity: "investor",
                id: investor.id(),
            });
        }
        investors.insert(investor.id(), investor.clone());
        Ok(())
    }

    async fn investor(&self, id: Uuid) -> StoreResult<Option<Investor>> {
        Ok(read(&self.investors).get(&id).cloned())
    }

    async fn investors(&self, ids: &[Uuid]) -> StoreResult<Vec<Investor>> {
        let investors = read(&self.investors);
        Ok(ids.iter().filter_map(|id| investors.get(id).cloned()).collect())
    }

    async fn create_issuer(&self, issuer: &Issuer) -> StoreResult<()> {
        let mut issuers = write(&self.issuers);
        if issuers.contains_key(&issuer.id()) {
            return Err(StoreError::Duplicate {
                entity: "issuer",
                id: issuer.id(),
            });
        }
        issuers.insert(issuer.id(), issuer.clone());
        Ok(())
    }

    async fn issuer(&self, id: Uuid) -> StoreResult<Option<Issuer>> {
        Ok(read(&self.issuers).get(&id).cloned())
    }

    async fn update_balance(&self, party_id: Uuid, balance: &Money) -> StoreResult<()> {
        self.update_balances(&[BalanceUpdate {
            party_id,
            balances: vec![balance.clone()],
        }])
        .await
    }

    async fn update_balances(&self, updates: &[BalanceUpdate]) -> StoreResult<()> {
        // Lock order: investors, then issuers
        let mut investors = write(&self.investors);
        let mut issuers = write(&self.issuers);

        if let Some(missing) = updates
            .iter()
            .find(|u| !investors.contains_key(&u.party_id) && !issuers.contains_key(&u.party_id))
        {
            return Err(StoreError::MissingEntity {
                entity: "party",
                id: missing.party_id,
            });
        }

        if let Some(negative) = updates
            .iter()
            .flat_map(|u| u.balances.iter())
            .find(|bucket| bucket.is_negative())
        {
            return Err(StoreError::Corrupt(format!(
                "negative balance bucket {negative}"
            )));
        }

        for update in updates {
            let balances = match investors.get_mut(&update.party_id) {
                Some(investor) => investor.balances_mut(),
                None => match issuers.get_mut(&update.party_id) {
                    Some(issuer) => issuer.balances_mut(),
                    None => continue,
                },
            };
            for bucket in &update.balances {
                set_bucket(balances, bucket)?;
            }
        }

        Ok(())
    }
}

/// In-memory attachment store
#[derive(Debug, Default)]
pub struct MemoryAttachmentStore {
    documents: RwLock<HashMap<Uuid, Vec<u8>>>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored document for an invoice
    pub fn document(&self, invoice_id: Uuid) -> Option<Vec<u8>> {
        read(&self.documents).get(&invoice_id).cloned()
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn save(&self, invoice_id: Uuid, document: &[u8]) -> StoreResult<()> {
        write(&self.documents).insert(invoice_id, document.to_vec());
        Ok(())
    }
}
