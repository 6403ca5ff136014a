//! Error types for the cadence scheduler.

/// Top-level error type for task registration, scheduling and ledger access.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Two tasks resolved to the same ledger name.
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    /// A task was registered after the pool stopped accepting registrations.
    #[error("task pool is finalized, cannot register {0}")]
    RegistrationClosed(String),

    /// No registered task carries the given name.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Cadence parameters that cannot describe a schedule (e.g. non-positive period).
    #[error("invalid cadence: {0}")]
    InvalidCadence(String),

    /// Execution ledger read or write failure.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SchedulerError>;
