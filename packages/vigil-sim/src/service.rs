//! service.rs — Public control surface for simulations
//!
//! One service owns at most one live run. `start_simulation` validates the
//! config, builds a fresh state machine and hands it to a new clock task;
//! after that the only links back into the run are its `RunLifecycle` and the
//! bus. Starting while a run is active fails instead of replacing it, so no
//! orphaned clock keeps firing into a discarded state.
//!
//! Lifecycle of the service cell: uninitialized (never started) → active
//! (a run is ticking) → idle (last run stopped; its final snapshot stays
//! readable until the next start).
//!
//! Tests build isolated services with [`SimulationService::with_entropy`];
//! application code that wants one process-wide instance uses
//! [`SimulationService::global`].

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{info, warn};
use uuid::Uuid;

use vigil_types::{SimulationConfig, SimulationState, StopReason};

use crate::bus::SubscriptionHandle;
use crate::clock::Ticker;
use crate::config;
use crate::entropy::{EntropySource, OsEntropy};
use crate::error::{HandlerError, Result, SimError};
use crate::machine::{RunLifecycle, SimulationBus, SimulationMessage, StateMachine};

static GLOBAL: OnceCell<SimulationService> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePhase {
    Uninitialized,
    Active,
    Idle,
}

pub struct SimulationService {
    bus: SimulationBus,
    entropy: Arc<dyn EntropySource>,
    active: Mutex<Option<Arc<RunLifecycle>>>,
}

impl Default for SimulationService {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationService {
    pub fn new() -> Self {
        Self::with_entropy(Arc::new(OsEntropy))
    }

    pub fn with_entropy(entropy: Arc<dyn EntropySource>) -> Self {
        Self {
            bus: SimulationBus::new(),
            entropy,
            active: Mutex::new(None),
        }
    }

    /// Process-wide instance, created on first access.
    pub fn global() -> &'static SimulationService {
        GLOBAL.get_or_init(SimulationService::new)
    }

    pub fn bus(&self) -> &SimulationBus {
        &self.bus
    }

    pub fn on<F>(&self, topic: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&SimulationMessage) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.bus.on(topic, handler)
    }

    pub fn off(&self, handle: SubscriptionHandle) {
        self.bus.off(handle)
    }

    /// Start a run. Returns once the first tick is scheduled, one tick
    /// interval from now. Must be called from inside a Tokio runtime.
    pub fn start_simulation(&self, config: SimulationConfig) -> Result<Uuid> {
        config::validate(&config)?;
        Handle::try_current().map_err(|_| SimError::NoRuntime)?;

        let mut active = self.active.lock();
        if let Some(run) = active.as_ref() {
            if run.is_running() {
                warn!("start rejected: run {} still active", run.run_id());
                return Err(SimError::AlreadyRunning);
            }
        }

        let ticker = Ticker::new();
        let mut machine =
            StateMachine::new(config, self.bus.clone(), ticker.clone(), self.entropy.rng());
        machine.start()?;
        let lifecycle = machine.lifecycle();

        if let Err(e) = ticker.start(move |delta| {
            machine.tick(delta);
        }) {
            lifecycle.abandon();
            return Err(e);
        }

        let run_id = lifecycle.run_id();
        *active = Some(lifecycle);
        info!("🎬 Simulation {run_id} scheduled");
        Ok(run_id)
    }

    /// Stop the active run. `NotRunning` when nothing is running, including
    /// a second stop of the same run or a run that already reached its duration.
    pub fn stop_simulation(&self) -> Result<()> {
        // Release the cell before stopping: stop publishes, and subscribers
        // may call back into the service.
        let run = self.active.lock().clone();
        match run {
            Some(run) if run.stop(StopReason::Requested) => Ok(()),
            _ => Err(SimError::NotRunning),
        }
    }

    /// Latest published snapshot of the current or most recent run.
    pub fn get_state(&self) -> Option<Arc<SimulationState>> {
        self.active.lock().as_ref().and_then(|run| run.latest())
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().as_ref().is_some_and(|run| run.is_running())
    }

    pub fn current_run(&self) -> Option<Uuid> {
        self.active.lock().as_ref().map(|run| run.run_id())
    }

    pub fn phase(&self) -> ServicePhase {
        match self.active.lock().as_ref() {
            None => ServicePhase::Uninitialized,
            Some(run) if run.is_running() => ServicePhase::Active,
            Some(_) => ServicePhase::Idle,
        }
    }
}
