//! Ledger Service
//!
//! Balance mutations for investors and issuers. A party's balances are only
//! read-modified-written under that party's lock; batch operations lock
//! every party involved, in id order, before reading any of them.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{Investor, Issuer};
use crate::broker::SettlementLedger;
use crate::domain::{Balances, DomainError, Money};
use crate::error::AppResult;
use crate::store::{BalanceUpdate, PartyStore};

use super::KeyedLocks;

/// Investor and issuer balance operations
pub struct LedgerService {
    parties: Arc<dyn PartyStore>,
    locks: KeyedLocks,
}

impl LedgerService {
    pub fn new(parties: Arc<dyn PartyStore>) -> Self {
        Self {
            parties,
            locks: KeyedLocks::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn held_locks(&self) -> usize {
        self.locks.len()
    }

    // =========================================================================
    // Parties
    // =========================================================================

    pub async fn create_investor(
        &self,
        full_name: String,
        opening: &[Money],
    ) -> AppResult<Investor> {
        let investor = Investor::create(full_name, opening)?;
        self.parties.create_investor(&investor).await?;

        tracing::info!(
            investor_id = %investor.id(),
            buckets = investor.balances().len(),
            "Investor created"
        );
        Ok(investor)
    }

    pub async fn create_issuer(&self, full_name: String) -> AppResult<Issuer> {
        let issuer = Issuer::create(full_name);
        self.parties.create_issuer(&issuer).await?;

        tracing::info!(issuer_id = %issuer.id(), "Issuer created");
        Ok(issuer)
    }

    pub async fn investor(&self, investor_id: Uuid) -> AppResult<Investor> {
        self.parties
            .investor(investor_id)
            .await?
            .ok_or_else(|| DomainError::not_found("investor", investor_id).into())
    }

    /// Investors among `ids`; unknown ids are skipped
    pub async fn investors(&self, ids: &[Uuid]) -> AppResult<Vec<Investor>> {
        Ok(self.parties.investors(ids).await?)
    }

    pub async fn issuer(&self, issuer_id: Uuid) -> AppResult<Issuer> {
        self.parties
            .issuer(issuer_id)
            .await?
            .ok_or_else(|| DomainError::not_found("issuer", issuer_id).into())
    }

    // =========================================================================
    // Balance mutations
    // =========================================================================

    /// Take `amount` from the investor's bucket in that currency.
    /// A missing bucket counts as zero and is not created.
    /// Returns the new bucket value.
    pub async fn debit(&self, investor_id: Uuid, amount: &Money) -> AppResult<Money> {
        let _guard = self.locks.lock(investor_id).await;

        let investor = self.investor(investor_id).await?;
        let mut balances = investor.balances().clone();
        let updated = balances.debit(investor_id, amount)?;

        self.parties.update_balance(investor_id, &updated).await?;

        tracing::debug!(
            investor_id = %investor_id,
            amount = %amount,
            balance = %updated,
            "Investor debited"
        );
        Ok(updated)
    }

    /// Give `amount` back to an investor, creating the bucket if needed
    pub async fn credit_compensation(&self, investor_id: Uuid, amount: &Money) -> AppResult<Money> {
        let _guard = self.locks.lock(investor_id).await;

        let investor = self.investor(investor_id).await?;
        let mut balances = investor.balances().clone();
        let updated = balances.credit(amount)?;

        self.parties.update_balance(investor_id, &updated).await?;

        tracing::info!(
            investor_id = %investor_id,
            amount = %amount,
            balance = %updated,
            "Investor compensated"
        );
        Ok(updated)
    }

    /// Pay trade proceeds to an issuer, creating the bucket if needed
    pub async fn issuer_credit(&self, issuer_id: Uuid, amount: &Money) -> AppResult<Money> {
        let _guard = self.locks.lock(issuer_id).await;

        let issuer = self.issuer(issuer_id).await?;
        let mut balances = issuer.balances().clone();
        let updated = balances.credit(amount)?;

        self.parties.update_balance(issuer_id, &updated).await?;

        tracing::info!(
            issuer_id = %issuer_id,
            amount = %amount,
            balance = %updated,
            "Issuer credited"
        );
        Ok(updated)
    }

    /// Refund many (investor, amount) pairs.
    ///
    /// Amounts are summed per investor and currency first, so each investor
    /// gets exactly one balance update; all updates go to the store in one
    /// atomic write. Returns the updates written.
    pub async fn batch_compensate(
        &self,
        entries: &[(Uuid, Money)],
    ) -> AppResult<Vec<BalanceUpdate>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut refunds: BTreeMap<Uuid, Balances> = BTreeMap::new();
        for (investor_id, amount) in entries {
            refunds.entry(*investor_id).or_default().credit(amount)?;
        }

        let ids: Vec<Uuid> = refunds.keys().copied().collect();
        let _guards = self.locks.lock_many(&ids).await;

        let investors = self.parties.investors(&ids).await?;
        if let Some(missing) = ids
            .iter()
            .find(|id| !investors.iter().any(|investor| investor.id() == **id))
        {
            return Err(DomainError::not_found("investor", *missing).into());
        }

        let mut updates = Vec::with_capacity(investors.len());
        for investor in &investors {
            let Some(refund) = refunds.get(&investor.id()) else {
                continue;
            };
            let mut balances = investor.balances().clone();
            let mut changed = Vec::with_capacity(refund.len());
            for amount in refund.iter() {
                changed.push(balances.credit(&amount)?);
            }
            updates.push(BalanceUpdate {
                party_id: investor.id(),
                balances: changed,
            });
        }

        self.parties.update_balances(&updates).await?;

        tracing::info!(
            investors = updates.len(),
            entries = entries.len(),
            "Batch compensation applied"
        );
        Ok(updates)
    }
}

#[async_trait]
impl SettlementLedger for LedgerService {
    async fn issuer_credit(&self, issuer_id: Uuid, amount: &Money) -> AppResult<()> {
        LedgerService::issuer_credit(self, issuer_id, amount)
            .await
            .map(|_| ())
    }

    async fn credit_compensation(&self, investor_id: Uuid, amount: &Money) -> AppResult<()> {
        LedgerService::credit_compensation(self, investor_id, amount)
            .await
            .map(|_| ())
    }

    async fn batch_compensate(&self, entries: &[(Uuid, Money)]) -> AppResult<()> {
        LedgerService::batch_compensate(self, entries)
            .await
            .map(|_| ())
    }
}
