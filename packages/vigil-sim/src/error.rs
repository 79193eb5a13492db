//! Error taxonomy for the simulation engine.
//!
//! Lifecycle and configuration failures surface to the caller of
//! `start_simulation` / `stop_simulation` as [`SimError`]. Subscriber and
//! per-trigger failures are caught where they happen and only logged.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SimError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// `start_simulation` while a run is active
    #[error("a simulation is already running")]
    AlreadyRunning,

    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),

    /// `stop_simulation` with no active run
    #[error("no simulation is running")]
    NotRunning,

    /// A bus subscriber failed. Logged by the bus, never returned to an emitter.
    #[error("subscriber on '{topic}' failed: {message}")]
    Handler { topic: String, message: String },

    /// The clock needs a Tokio runtime to schedule ticks
    #[error("no Tokio runtime available to drive the simulation clock")]
    NoRuntime,

    #[error("config file: {0}")]
    ConfigFile(String),
}

/// Failure returned by a bus handler.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A trigger condition that could not be evaluated this tick.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TriggerError {
    #[error("probability {0} is outside [0, 1]")]
    BadProbability(f64),

    #[error("{field} must be a finite, non-negative number (got {value})")]
    BadNumber { field: &'static str, value: f64 },

    #[error("window starts at {from}s after it ends at {until}s")]
    InvertedWindow { from: f64, until: f64 },

    #[error("'{0}' condition has no nested conditions")]
    EmptyComposite(&'static str),
}
