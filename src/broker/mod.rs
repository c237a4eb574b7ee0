//! Settlement Broker
//!
//! In-process event bus that settles trades and refunds failed bids
//! asynchronously. Producers push [`SettlementEvent`]s into one bounded
//! queue; a fixed pool of worker tasks pulls from it and calls back into the
//! ledger. Failures are delivered again with exponential backoff until the
//! retry budget is spent, then dropped with an error log.
//!
//! Senders never learn the outcome: delivery is fire-and-forget.
//!
//! # Lifecycle
//! ```text
//! new --> start --> (send_* ...) --> shutdown(deadline)
//! ```
//! `shutdown` stops admissions and waits, up to the deadline, for every
//! queued, in-flight and pending-retry event to finish. Workers are never
//! aborted; a timed-out shutdown may be awaited again.
//!
//! Each delivery runs on its own task, so a handler that panics counts as a
//! failed attempt and goes through the same retry budget as an error.

mod error;
mod events;
mod retry;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::aggregate::{Bid, Invoice};
use crate::domain::Money;
use crate::error::AppResult;

pub use error::BrokerError;
pub use events::{QueuedEvent, SettlementEvent};
pub use retry::RetryPolicy;

// =========================================================================
// Collaborators
// =========================================================================

/// Read access to invoices needed to settle a trade
#[async_trait]
pub trait InvoiceLookup: Send + Sync {
    async fn invoice(&self, invoice_id: Uuid) -> AppResult<Invoice>;

    async fn bids(&self, bid_ids: &[Uuid]) -> AppResult<Vec<Bid>>;
}

/// Balance mutations performed by settlement
#[async_trait]
pub trait SettlementLedger: Send + Sync {
    async fn issuer_credit(&self, issuer_id: Uuid, amount: &Money) -> AppResult<()>;

    async fn credit_compensation(&self, investor_id: Uuid, amount: &Money) -> AppResult<()>;

    async fn batch_compensate(&self, entries: &[(Uuid, Money)]) -> AppResult<()>;
}

// =========================================================================
// Configuration & statistics
// =========================================================================

/// Broker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Worker tasks pulling from the queue
    pub workers: usize,
    /// Queue capacity; producers wait when it is full
    pub queue_capacity: usize,
    /// Re-deliveries before an event is dropped
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            max_retries: 5,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.workers == 0 {
            return Err(BrokerError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(BrokerError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err(BrokerError::InvalidConfig(
                "retry_max_delay must not be below retry_base_delay".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
        }
    }
}

/// Broker runtime statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Events admitted into the queue
    pub enqueued: u64,
    /// Handler invocations, including re-deliveries
    pub processed: u64,
    pub succeeded: u64,
    /// Re-deliveries scheduled
    pub retried: u64,
    /// Events dropped after exhausting retries
    pub dropped: u64,
    /// Submissions refused during shutdown
    pub rejected: u64,
    /// Events admitted but not yet settled
    pub outstanding: usize,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    processed: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =========================================================================
// Broker
// =========================================================================

/// State shared by the broker handle, its workers and retry tasks
struct Shared {
    policy: RetryPolicy,
    invoices: Arc<dyn InvoiceLookup>,
    ledger: Arc<dyn SettlementLedger>,
    /// Dropping the last sender closes the queue and lets workers exit
    sender: Mutex<Option<mpsc::Sender<QueuedEvent>>>,
    receiver: AsyncMutex<mpsc::Receiver<QueuedEvent>>,
    accepting: AtomicBool,
    /// Admitted events that have not yet succeeded or been dropped
    outstanding: AtomicUsize,
    /// Workers whose task ended in a panic
    failed_workers: AtomicUsize,
    counters: Counters,
}

/// Settlement broker
pub struct Broker {
    config: BrokerConfig,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Broker {
    /// Create a broker. No worker runs until [`Broker::start`].
    pub fn new(
        config: BrokerConfig,
        invoices: Arc<dyn InvoiceLookup>,
        ledger: Arc<dyn SettlementLedger>,
    ) -> Result<Self, BrokerError> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);

        let shared = Arc::new(Shared {
            policy: config.retry_policy(),
            invoices,
            ledger,
            sender: Mutex::new(Some(sender)),
            receiver: AsyncMutex::new(receiver),
            accepting: AtomicBool::new(true),
            outstanding: AtomicUsize::new(0),
            failed_workers: AtomicUsize::new(0),
            counters: Counters::default(),
        });

        Ok(Self {
            config,
            shared,
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the worker pool. Must be called within a tokio runtime.
    pub fn start(&self) -> Result<(), BrokerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadyStarted);
        }

        let mut workers = locked(&self.workers);
        for worker_id in 0..self.config.workers {
            workers.push(tokio::spawn(worker_loop(self.shared.clone(), worker_id)));
        }

        tracing::info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            max_retries = self.config.max_retries,
            "Settlement broker started"
        );
        Ok(())
    }

    /// Queue a trade settlement. Waits while the queue is full.
    pub async fn send_trade_event(&self, invoice_id: Uuid, bid_ids: Vec<Uuid>, approved: bool) {
        self.submit(SettlementEvent::Trade {
            invoice_id,
            bid_ids,
            approved,
        })
        .await;
    }

    /// Queue a refund for a bid that did not go through. Waits while the
    /// queue is full.
    pub async fn send_failed_bid_event(&self, investor_id: Uuid, amount: Money) {
        self.submit(SettlementEvent::FailedBid {
            investor_id,
            amount,
        })
        .await;
    }

    /// Queue any settlement event
    pub async fn submit(&self, event: SettlementEvent) {
        let shared = &self.shared;

        // Counted before the admission check so shutdown cannot close the
        // queue between the check and the send.
        shared.outstanding.fetch_add(1, Ordering::SeqCst);

        let sender = if shared.accepting.load(Ordering::SeqCst) {
            shared.sender()
        } else {
            None
        };

        let event_type = event.event_type();
        let subject_id = event.subject_id();

        let admitted = match sender {
            Some(sender) => sender.send(QueuedEvent::new(event)).await.is_ok(),
            None => false,
        };

        if admitted {
            bump(&shared.counters.enqueued);
            tracing::debug!(event_type, subject_id = %subject_id, "Settlement event queued");
        } else {
            bump(&shared.counters.rejected);
            tracing::warn!(
                event_type,
                subject_id = %subject_id,
                "Settlement event rejected: broker is shutting down"
            );
            shared.settle_one();
        }
    }

    /// Stop admissions and wait until every admitted event is settled and
    /// all workers have exited, or until `deadline`.
    ///
    /// On timeout the workers keep running and `ShutdownTimeout` is
    /// returned; calling `shutdown` again resumes waiting. Once the workers
    /// are gone, `Unsettled` reports admitted events that never finished.
    pub async fn shutdown(&self, deadline: Instant) -> Result<(), BrokerError> {
        let shared = &self.shared;

        if shared.accepting.swap(false, Ordering::SeqCst) {
            tracing::info!(
                outstanding = shared.outstanding.load(Ordering::SeqCst),
                "Settlement broker shutting down"
            );
        }
        if shared.outstanding.load(Ordering::SeqCst) == 0 {
            shared.close_queue();
        } else if !self.started.load(Ordering::SeqCst) {
            tracing::warn!(
                outstanding = shared.outstanding.load(Ordering::SeqCst),
                "Settlement broker was never started; queued events will not be settled"
            );
        }

        let mut handles = std::mem::take(&mut *locked(&self.workers));

        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(handle) = handles.last_mut() {
                if let Err(e) = handle.await {
                    shared.failed_workers.fetch_add(1, Ordering::SeqCst);
                    tracing::error!(error = %e, "Settlement worker terminated abnormally");
                }
                handles.pop();
            }
        })
        .await;

        match drained {
            Ok(()) => {
                let outstanding = shared.outstanding.load(Ordering::SeqCst);
                let failed_workers = shared.failed_workers.load(Ordering::SeqCst);
                if outstanding > 0 || failed_workers > 0 {
                    tracing::error!(
                        outstanding,
                        failed_workers,
                        stats = ?self.stats(),
                        "Settlement broker stopped with unsettled events"
                    );
                    return Err(BrokerError::Unsettled {
                        outstanding,
                        failed_workers,
                    });
                }
                tracing::info!(stats = ?self.stats(), "Settlement broker stopped");
                Ok(())
            }
            Err(_) => {
                let pending = handles.len();
                locked(&self.workers).extend(handles);
                tracing::warn!(
                    pending_workers = pending,
                    outstanding = shared.outstanding.load(Ordering::SeqCst),
                    "Settlement broker shutdown deadline elapsed"
                );
                Err(BrokerError::ShutdownTimeout { pending })
            }
        }
    }

    /// Whether new events are still admitted
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Snapshot of the broker counters
    pub fn stats(&self) -> BrokerStats {
        let counters = &self.shared.counters;
        BrokerStats {
            enqueued: counters.enqueued.load(Ordering::Relaxed),
            processed: counters.processed.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            outstanding: self.shared.outstanding.load(Ordering::SeqCst),
        }
    }
}

impl Shared {
    fn sender(&self) -> Option<mpsc::Sender<QueuedEvent>> {
        locked(&self.sender).clone()
    }

    fn close_queue(&self) {
        if locked(&self.sender).take().is_some() {
            tracing::debug!("Settlement queue closed");
        }
    }

    /// Mark one admitted event as finished
    fn settle_one(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && !self.accepting.load(Ordering::SeqCst) {
            self.close_queue();
        }
    }

    async fn process(self: &Arc<Self>, mut queued: QueuedEvent) {
        bump(&self.counters.processed);

        let event_type = queued.event.event_type();
        let subject_id = queued.event.subject_id();

        match self.deliver(&queued.event).await {
            Ok(()) => {
                bump(&self.counters.succeeded);
                tracing::debug!(
                    event_type,
                    subject_id = %subject_id,
                    retries = queued.retries,
                    "Settlement event processed"
                );
                self.settle_one();
            }
            Err(e) => {
                queued.retries += 1;

                if self.policy.exhausted(queued.retries) {
                    let dropped = BrokerError::MaxRetriesExceeded {
                        attempts: queued.retries,
                        last_error: e,
                    };
                    bump(&self.counters.dropped);
                    tracing::error!(
                        event_type,
                        subject_id = %subject_id,
                        retries = queued.retries,
                        error = %dropped,
                        "Settlement event dropped"
                    );
                    self.settle_one();
                } else {
                    let delay = self.policy.delay(queued.retries);
                    bump(&self.counters.retried);
                    tracing::warn!(
                        event_type,
                        subject_id = %subject_id,
                        retries = queued.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Settlement event failed, retrying"
                    );
                    self.requeue(queued, delay);
                }
            }
        }
    }

    /// Put a failed event back at the tail of the queue after `delay`.
    /// Runs on its own task so a full queue never blocks a worker.
    fn requeue(self: &Arc<Self>, queued: QueuedEvent, delay: Duration) {
        let shared = self.clone();
        let Some(sender) = self.sender() else {
            // Unreachable while the event is outstanding
            tracing::error!(
                event_type = queued.event.event_type(),
                "Settlement queue closed with a retry pending"
            );
            self.settle_one();
            return;
        };

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(mpsc::error::SendError(lost)) = sender.send(queued).await {
                tracing::error!(
                    event_type = lost.event.event_type(),
                    "Settlement queue closed with a retry pending"
                );
                shared.settle_one();
            }
        });
    }

    /// Run one delivery attempt on its own task. A panic in the handler is
    /// reported as a failure instead of taking the worker down.
    async fn deliver(self: &Arc<Self>, event: &SettlementEvent) -> Result<(), String> {
        let shared = self.clone();
        let event = event.clone();
        match tokio::spawn(async move { shared.dispatch(&event).await }).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) if e.is_panic() => Err(format!("settlement handler panicked: {e}")),
            Err(e) => Err(format!("settlement handler was cancelled: {e}")),
        }
    }

    async fn dispatch(&self, event: &SettlementEvent) -> AppResult<()> {
        match event {
            SettlementEvent::Trade {
                invoice_id,
                approved: true,
                ..
            } => {
                let invoice = self.invoices.invoice(*invoice_id).await?;
                self.ledger
                    .issuer_credit(invoice.issuer_id(), invoice.price())
                    .await
            }

            SettlementEvent::Trade {
                invoice_id,
                bid_ids,
                approved: false,
            } => {
                let bids = self.invoices.bids(bid_ids).await?;
                if bids.len() != bid_ids.len() {
                    tracing::warn!(
                        invoice_id = %invoice_id,
                        requested = bid_ids.len(),
                        found = bids.len(),
                        "Some rejected bids could not be resolved"
                    );
                }

                let entries: Vec<(Uuid, Money)> = bids
                    .into_iter()
                    .map(|bid| (bid.investor_id, bid.amount))
                    .collect();
                self.ledger.batch_compensate(&entries).await
            }

            SettlementEvent::FailedBid {
                investor_id,
                amount,
            } => self.ledger.credit_compensation(*investor_id, amount).await,
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    tracing::debug!(worker_id, "Settlement worker started");

    loop {
        let next = {
            let mut receiver = shared.receiver.lock().await;
            receiver.recv().await
        };

        let Some(queued) = next else {
            break;
        };

        shared.process(queued).await;
    }

    tracing::debug!(worker_id, "Settlement worker stopped");
}
