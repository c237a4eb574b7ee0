//! Bid storm
//!
//! Hammers the in-memory engine with concurrent bidders, resolves every
//! invoice, drains the settlement broker and checks that no invoice was
//! oversubscribed and that no money was created or lost.
//!
//! Run with: cargo run --bin bid_storm --release -- --bidders 200 --invoices 20

use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;

use invoice_bidder::aggregate::{Aggregate, InvoiceStatus};
use invoice_bidder::api::AppState;
use invoice_bidder::broker::BrokerConfig;
use invoice_bidder::domain::{Currency, Money};
use invoice_bidder::handlers::{PlaceBidCommand, TradeCommand};
use invoice_bidder::store::{MemoryAttachmentStore, MemoryStore};

const CURRENCY: &str = "EUR";

fn arg(args: &[String], name: &str, default: usize) -> usize {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let bidders = arg(&args, "--bidders", 200);
    let invoice_count = arg(&args, "--invoices", 20).max(1);
    let opening = Decimal::from(1_000);
    let price = Decimal::from(2_500);

    println!(
        "Bid storm - {} bidders across {} invoices",
        bidders, invoice_count
    );

    let store = Arc::new(MemoryStore::new());
    let state = AppState::from_stores(
        store.clone(),
        store,
        Arc::new(MemoryAttachmentStore::new()),
        BrokerConfig::default(),
    )?;
    state.broker.start()?;

    let currency = Currency::new(CURRENCY)?;
    let issuer = state.ledger.create_issuer("Storm Issuer".to_string()).await?;

    let mut invoice_ids = Vec::with_capacity(invoice_count);
    for _ in 0..invoice_count {
        let invoice = state
            .invoices
            .create_invoice(issuer.id(), Money::new(price, currency.clone())?, b"storm")
            .await?;
        invoice_ids.push(invoice.id());
    }

    let mut investor_ids = Vec::with_capacity(bidders);
    for i in 0..bidders {
        let investor = state
            .ledger
            .create_investor(
                format!("Bidder {i}"),
                &[Money::new(opening, currency.clone())?],
            )
            .await?;
        investor_ids.push(investor.id());
    }
    let total_money = opening * Decimal::from(bidders as u64);

    let start = Instant::now();
    let mut tasks = Vec::with_capacity(bidders);
    for (i, investor_id) in investor_ids.iter().copied().enumerate() {
        let state = state.clone();
        let invoice_id = invoice_ids[i % invoice_count];
        let amount = Money::new(Decimal::from(100 + (i as u64 * 37) % 400), currency.clone())?;
        tasks.push(tokio::spawn(async move {
            state
                .bids
                .execute(PlaceBidCommand::new(invoice_id, investor_id, amount))
                .await
        }));
    }

    let mut placed = 0u64;
    let mut refused = 0u64;
    for task in tasks {
        match task.await? {
            Ok(_) => placed += 1,
            Err(_) => refused += 1,
        }
    }
    let bidding = start.elapsed();

    let mut violations = Vec::new();
    for invoice_id in &invoice_ids {
        let invoice = state.invoices.get_invoice(*invoice_id).await?;
        let subscribed: Decimal = invoice.active_bids().map(|bid| bid.amount.amount()).sum();
        if subscribed > price {
            violations.push(format!(
                "invoice {} oversubscribed: {} > {}",
                invoice_id, subscribed, price
            ));
        }
    }

    // Approve locked invoices with an even index, reject the rest
    let mut traded = 0u64;
    for (i, invoice_id) in invoice_ids.iter().enumerate() {
        let invoice = state.invoices.get_invoice(*invoice_id).await?;
        if invoice.status() != InvoiceStatus::Locked {
            continue;
        }
        let command = if i % 2 == 0 {
            traded += 1;
            TradeCommand::approve(*invoice_id)
        } else {
            TradeCommand::reject(*invoice_id)
        };
        state.trades.execute(command).await?;
    }

    state
        .broker
        .shutdown(tokio::time::Instant::now() + std::time::Duration::from_secs(30))
        .await?;
    let elapsed = start.elapsed();

    let investors = state.ledger.investors(&investor_ids).await?;
    let held: Decimal = investors
        .iter()
        .map(|investor| investor.balances().get(&currency).amount())
        .sum();
    let issuer = state.ledger.issuer(issuer.id()).await?;
    let paid = issuer.balances().get(&currency).amount();

    // Funds still reserved on invoices that were never resolved
    let mut reserved = Decimal::ZERO;
    for invoice_id in &invoice_ids {
        let invoice = state.invoices.get_invoice(*invoice_id).await?;
        if invoice.status() != InvoiceStatus::Traded {
            reserved += invoice
                .active_bids()
                .map(|bid| bid.amount.amount())
                .sum::<Decimal>();
        }
    }

    if held + paid + reserved != total_money {
        violations.push(format!(
            "money not conserved: held {} + paid {} + reserved {} != {}",
            held, paid, reserved, total_money
        ));
    }

    let stats = state.broker.stats();
    println!("\n=== Bid Storm Results ===");
    println!("Bids placed: {}", placed);
    println!("Bids refused: {}", refused);
    println!("Invoices traded: {}", traded);
    println!("Bidding time: {:.2}s", bidding.as_secs_f64());
    println!("Total time: {:.2}s", elapsed.as_secs_f64());
    println!(
        "Broker: {} enqueued, {} succeeded, {} retried, {} dropped",
        stats.enqueued, stats.succeeded, stats.retried, stats.dropped
    );

    if violations.is_empty() {
        println!("Invariants hold");
        Ok(())
    } else {
        for violation in &violations {
            eprintln!("VIOLATION: {}", violation);
        }
        Err(anyhow::anyhow!("{} invariant violations", violations.len()))
    }
}
