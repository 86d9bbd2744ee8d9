//! Payment engine: commission periods, notification scheduling and the
//! handling of delivered notification stages.

mod commission;
mod payment_cycle;
mod payment_schedule;
mod payment_stages;

pub use commission::*;
pub use payment_cycle::*;
pub use payment_schedule::*;
pub use payment_stages::*;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("unexpected status: {0}")]
    InvalidState(String),
}
