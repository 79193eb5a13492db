//! # vigil-sim
//!
//! Operational simulation engine for planned CCTV/network installations.
//! Models how a deployed system behaves over a virtual timeline and publishes
//! status transitions and events so a dashboard can visualize system health
//! under configurable conditions and what-if scenarios.
//!
//! ```text
//!   SimulationService ── start/stop/get_state
//!         │
//!   Ticker (1 tick / s) ──▶ StateMachine::tick
//!                               ├─ link::sample        (latency/jitter)
//!                               ├─ TriggerEngine        (patches + events)
//!                               ├─ NoiseGenerator       (background chatter)
//!                               └─ EventBus ──▶ "simulation:updated" / "simulation:stopped"
//! ```

pub mod bus;
pub mod clock;
pub mod config;
pub mod entropy;
pub mod error;
pub mod link;
pub mod machine;
pub mod noise;
pub mod scenarios;
pub mod service;
pub mod triggers;

pub use bus::{EventBus, SubscriptionHandle, TOPIC_STOPPED, TOPIC_UPDATED};
pub use clock::{Ticker, SIM_SECONDS_PER_TICK, TICK_INTERVAL};
pub use entropy::{EntropySource, OsEntropy, Seeded, SimRng};
pub use error::{HandlerError, Result, SimError, TriggerError};
pub use machine::{
    Phase, RunLifecycle, SimulationBus, SimulationMessage, StateMachine, EVENT_QUEUE_CAPACITY,
};
pub use service::{ServicePhase, SimulationService};
pub use triggers::{EvalContext, Evaluation, EventDraft, StatusPatch, TriggerEngine, TriggerRef};
