//! Handler tests
//!
//! Bid and trade flows against the in-memory stores with a running broker.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    use crate::aggregate::{Aggregate, InvoiceStatus};
    use crate::broker::{Broker, BrokerConfig};
    use crate::domain::{Currency, CurrencyConverter, DomainError, Money, NominalConverter, RateTable};
    use crate::error::AppError;
    use crate::handlers::{
        BidHandler, InvoiceService, LedgerService, PlaceBidCommand, PlaceBidResult, TradeCommand,
        TradeHandler,
    };
    use crate::store::{MemoryAttachmentStore, MemoryStore};

    struct Engine {
        invoices: Arc<InvoiceService>,
        ledger: Arc<LedgerService>,
        broker: Arc<Broker>,
        bids: BidHandler,
        trades: TradeHandler,
    }

    impl Engine {
        fn new() -> Self {
            Self::with_converter(Arc::new(NominalConverter))
        }

        fn with_converter(converter: Arc<dyn CurrencyConverter>) -> Self {
            let store = Arc::new(MemoryStore::new());
            let ledger = Arc::new(LedgerService::new(store.clone()));
            let invoices = Arc::new(
                InvoiceService::new(
                    store.clone(),
                    store,
                    Arc::new(MemoryAttachmentStore::new()),
                )
                .with_converter(converter),
            );

            let config = BrokerConfig {
                retry_base_delay: Duration::ZERO,
                retry_max_delay: Duration::ZERO,
                ..BrokerConfig::default()
            };
            let broker =
                Arc::new(Broker::new(config, invoices.clone(), ledger.clone()).unwrap());
            broker.start().unwrap();

            Self {
                bids: BidHandler::new(invoices.clone(), ledger.clone(), broker.clone()),
                trades: TradeHandler::new(invoices.clone(), broker.clone()),
                invoices,
                ledger,
                broker,
            }
        }

        async fn drain(&self) {
            self.broker
                .shutdown(Instant::now() + Duration::from_secs(5))
                .await
                .unwrap();
        }

        async fn investor(&self, eur: &str) -> Uuid {
            self.ledger
                .create_investor("Investor".to_string(), &[money(eur)])
                .await
                .unwrap()
                .id()
        }

        async fn invoice(&self, price: &str) -> (Uuid, Uuid) {
            let issuer = self.ledger.create_issuer("Issuer".to_string()).await.unwrap();
            let invoice = self
                .invoices
                .create_invoice(issuer.id(), money(price), b"pdf")
                .await
                .unwrap();
            (issuer.id(), invoice.id())
        }

        async fn bid(
            &self,
            invoice_id: Uuid,
            investor_id: Uuid,
            amount: &str,
        ) -> Result<PlaceBidResult, AppError> {
            self.bids
                .execute(PlaceBidCommand::new(invoice_id, investor_id, money(amount)))
                .await
        }

        async fn eur_balance(&self, investor_id: Uuid) -> rust_decimal::Decimal {
            self.ledger
                .investor(investor_id)
                .await
                .unwrap()
                .balances()
                .get(&eur())
                .amount()
        }
    }

    fn eur() -> Currency {
        Currency::new("EUR").unwrap()
    }

    fn money(amount: &str) -> Money {
        Money::parse(amount, "EUR").unwrap()
    }

    // =========================================================================
    // Bid flow
    // =========================================================================

    #[tokio::test]
    async fn test_partial_fill_clips_and_locks() {
        let engine = Engine::new();
        let (_, invoice_id) = engine.invoice("1000").await;
        let a = engine.investor("1000").await;
        let b = engine.investor("1000").await;

        let first = assert_ok!(engine.bid(invoice_id, a, "600").await);
        assert_eq!(first.amount.amount(), dec!(600));
        assert!(!first.invoice_locked);

        let remaining = engine.invoices.get_remaining_price(invoice_id).await.unwrap();
        assert_eq!(remaining.amount(), dec!(400));

        let second = assert_ok!(engine.bid(invoice_id, b, "500").await);
        assert_eq!(second.amount.amount(), dec!(400));
        assert!(second.invoice_locked);

        let invoice = engine.invoices.get_invoice(invoice_id).await.unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Locked);
        assert_eq!(invoice.version(), 4);

        // B is charged for the allocation, not the request
        assert_eq!(engine.eur_balance(a).await, dec!(400));
        assert_eq!(engine.eur_balance(b).await, dec!(600));

        engine.drain().await;
        assert_eq!(engine.broker.stats().enqueued, 0);
    }

    #[tokio::test]
    async fn test_bid_on_locked_invoice_is_not_debited() {
        let engine = Engine::new();
        let (_, invoice_id) = engine.invoice("100").await;
        let a = engine.investor("100").await;
        let b = engine.investor("100").await;

        engine.bid(invoice_id, a, "100").await.unwrap();

        let err = assert_err!(engine.bid(invoice_id, b, "10").await);
        assert!(matches!(
            err.domain(),
            Some(DomainError::InvalidState {
                status: InvoiceStatus::Locked,
                ..
            })
        ));
        assert_eq!(engine.eur_balance(b).await, dec!(100));
    }

    #[tokio::test]
    async fn test_bid_unknown_investor() {
        let engine = Engine::new();
        let (_, invoice_id) = engine.invoice("100").await;

        let err = assert_err!(engine.bid(invoice_id, Uuid::new_v4(), "10").await);
        assert!(matches!(
            err.domain(),
            Some(DomainError::NotFound {
                entity: "investor",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_bid_insufficient_funds_places_nothing() {
        let engine = Engine::new();
        let (_, invoice_id) = engine.invoice("100").await;
        let poor = engine.investor("5").await;

        let err = assert_err!(engine.bid(invoice_id, poor, "50").await);
        assert!(matches!(
            err.domain(),
            Some(DomainError::InsufficientFunds { .. })
        ));

        let invoice = engine.invoices.get_invoice(invoice_id).await.unwrap();
        assert!(invoice.bids().is_empty());
        assert_eq!(engine.eur_balance(poor).await, dec!(5));
    }

    #[tokio::test]
    async fn test_bid_without_currency_bucket() {
        let engine = Engine::new();
        let (_, invoice_id) = engine.invoice("100").await;
        let investor = engine
            .ledger
            .create_investor(
                "Dollar only".to_string(),
                &[Money::parse("500", "USD").unwrap()],
            )
            .await
            .unwrap();

        let err = assert_err!(engine.bid(invoice_id, investor.id(), "10").await);
        assert!(matches!(
            err.domain(),
            Some(DomainError::InsufficientFunds { .. })
        ));

        let investor = engine.ledger.investor(investor.id()).await.unwrap();
        assert!(investor.balances().bucket(&eur()).is_none());
    }

    #[tokio::test]
    async fn test_foreign_currency_bid_is_converted() {
        let usd = Currency::new("USD").unwrap();
        let rates = RateTable::new()
            .with_rate(usd, eur(), dec!(0.9))
            .unwrap();
        let engine = Engine::with_converter(Arc::new(rates));
        let (_, invoice_id) = engine.invoice("100").await;
        let a = engine.investor("100").await;

        let result = engine
            .bids
            .execute(PlaceBidCommand::new(
                invoice_id,
                a,
                Money::parse("50", "USD").unwrap(),
            ))
            .await
            .unwrap();

        // Allocated and charged in the price currency
        assert_eq!(result.amount, money("45"));
        assert_eq!(engine.eur_balance(a).await, dec!(55));

        // No rate for GBP
        let err = assert_err!(
            engine
                .bids
                .execute(PlaceBidCommand::new(
                    invoice_id,
                    a,
                    Money::parse("10", "GBP").unwrap(),
                ))
                .await
        );
        assert!(matches!(
            err.domain(),
            Some(DomainError::CurrencyConversion { .. })
        ));
    }

    // =========================================================================
    // Trade flow
    // =========================================================================

    #[tokio::test]
    async fn test_approved_trade_pays_issuer() {
        let engine = Engine::new();
        let (issuer_id, invoice_id) = engine.invoice("250").await;
        let a = engine.investor("300").await;
        engine.bid(invoice_id, a, "250").await.unwrap();

        let result = assert_ok!(engine.trades.execute(TradeCommand::approve(invoice_id)).await);
        assert_eq!(result.status, InvoiceStatus::Traded);
        assert_eq!(result.bid_ids.len(), 1);

        engine.drain().await;

        let issuer = engine.ledger.issuer(issuer_id).await.unwrap();
        assert_eq!(issuer.balances().get(&eur()).amount(), dec!(250));
        assert_eq!(engine.eur_balance(a).await, dec!(50));

        let again = engine.invoices.approve_trade(invoice_id, true).await;
        assert!(matches!(
            again.unwrap_err().domain(),
            Some(DomainError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejected_trade_refunds_investors() {
        let engine = Engine::new();
        let (issuer_id, invoice_id) = engine.invoice("100").await;
        let a = engine.investor("100").await;
        let b = engine.investor("100").await;
        engine.bid(invoice_id, a, "30").await.unwrap();
        engine.bid(invoice_id, b, "70").await.unwrap();

        let result = engine
            .trades
            .execute(TradeCommand::reject(invoice_id))
            .await
            .unwrap();
        assert_eq!(result.status, InvoiceStatus::Open);
        assert_eq!(result.bid_ids.len(), 2);

        engine.drain().await;

        assert_eq!(engine.eur_balance(a).await, dec!(100));
        assert_eq!(engine.eur_balance(b).await, dec!(100));

        let invoice = engine.invoices.get_invoice(invoice_id).await.unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Open);
        assert_eq!(invoice.active_bids().count(), 0);
        assert_eq!(
            engine.invoices.get_remaining_price(invoice_id).await.unwrap(),
            money("100")
        );

        let issuer = engine.ledger.issuer(issuer_id).await.unwrap();
        assert!(issuer.balances().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_invoice_is_rejected_without_locking() {
        let engine = Engine::new();
        let a = engine.investor("100").await;

        let trade = engine.invoices.approve_trade(Uuid::new_v4(), true).await;
        assert!(matches!(
            trade.unwrap_err().domain(),
            Some(DomainError::NotFound { entity: "invoice", .. })
        ));

        let bid = engine
            .invoices
            .place_bid(Uuid::new_v4(), a, &money("10"))
            .await;
        assert!(matches!(
            bid.unwrap_err().domain(),
            Some(DomainError::NotFound { entity: "invoice", .. })
        ));

        assert_eq!(engine.invoices.held_locks(), 0);
    }

    #[tokio::test]
    async fn test_locks_are_released_after_settlement() {
        let engine = Engine::new();
        let (_, invoice_id) = engine.invoice("100").await;
        let a = engine.investor("60").await;
        let b = engine.investor("60").await;
        engine.bid(invoice_id, a, "60").await.unwrap();
        engine.bid(invoice_id, b, "60").await.unwrap();

        assert_ok!(engine.trades.execute(TradeCommand::reject(invoice_id)).await);
        engine.drain().await;

        assert_eq!(engine.eur_balance(a).await, dec!(60));
        assert_eq!(engine.invoices.held_locks(), 0);
        assert_eq!(engine.ledger.held_locks(), 0);
    }

    #[tokio::test]
    async fn test_issuer_credit_past_max_is_an_error() {
        let engine = Engine::new();
        let issuer = engine.ledger.create_issuer("Issuer".to_string()).await.unwrap();
        let half = Money::new(
            rust_decimal::Decimal::from(crate::domain::MAX_AMOUNT / 2 + 1),
            eur(),
        )
        .unwrap();

        assert_ok!(engine.ledger.issuer_credit(issuer.id(), &half).await);
        let err = assert_err!(engine.ledger.issuer_credit(issuer.id(), &half).await);
        assert!(matches!(err.domain(), Some(DomainError::InvalidAmount(_))));

        let stored = engine.ledger.issuer(issuer.id()).await.unwrap();
        assert_eq!(stored.balances().get(&eur()), half);
    }

    #[tokio::test]
    async fn test_trade_on_open_invoice_fails() {
        let engine = Engine::new();
        let (_, invoice_id) = engine.invoice("100").await;

        let err = assert_err!(engine.trades.execute(TradeCommand::approve(invoice_id)).await);
        assert!(matches!(err.domain(), Some(DomainError::InvalidState { .. })));

        engine.drain().await;
        assert_eq!(engine.broker.stats().enqueued, 0);
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    #[tokio::test]
    async fn test_batch_compensate_merges_per_investor() {
        let engine = Engine::new();
        let x = engine.investor("10").await;

        let updates = engine
            .ledger
            .batch_compensate(&[(x, money("100")), (x, money("50"))])
            .await
            .unwrap();

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].party_id, x);
        assert_eq!(updates[0].balances, vec![money("160")]);
        assert_eq!(engine.eur_balance(x).await, dec!(160));
    }

    #[tokio::test]
    async fn test_batch_compensate_unknown_investor_writes_nothing() {
        let engine = Engine::new();
        let x = engine.investor("10").await;

        let result = engine
            .ledger
            .batch_compensate(&[(x, money("5")), (Uuid::new_v4(), money("5"))])
            .await;
        assert!(matches!(
            result.unwrap_err().domain(),
            Some(DomainError::NotFound { .. })
        ));
        assert_eq!(engine.eur_balance(x).await, dec!(10));
    }

    #[tokio::test]
    async fn test_create_invoice_requires_issuer() {
        let engine = Engine::new();
        let result = engine
            .invoices
            .create_invoice(Uuid::new_v4(), money("10"), b"")
            .await;
        assert!(matches!(
            result.unwrap_err().domain(),
            Some(DomainError::NotFound { entity: "issuer", .. })
        ));
    }
}
