//! Broker Errors

/// Errors raised by the settlement broker
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    /// Event failed on every delivery and was dropped
    #[error("Settlement event dropped after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    /// Workers were still running when the shutdown deadline passed
    #[error("Shutdown deadline elapsed with {pending} worker(s) still running")]
    ShutdownTimeout { pending: usize },

    /// Workers exited while admitted events were still unsettled
    #[error(
        "Shutdown finished with {outstanding} unsettled event(s) and {failed_workers} failed worker(s)"
    )]
    Unsettled {
        outstanding: usize,
        failed_workers: usize,
    },

    #[error("Broker already started")]
    AlreadyStarted,

    #[error("Invalid broker configuration: {0}")]
    InvalidConfig(String),
}

impl BrokerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrokerError::ShutdownTimeout { .. })
    }
}
