//! machine.rs — Simulation state machine
//!
//! Owns the authoritative `SimulationState` for one run and is the only code
//! that mutates it. Lifecycle: idle → running → stopped (terminal); a new run
//! always gets a new machine.
//!
//! Per tick:
//!   1. advance elapsed time, sample the link
//!   2. evaluate triggers against the pre-tick status
//!   3. apply winning status patches, append trigger events, then one noise event
//!   4. publish an immutable snapshot on `simulation:updated`
//!   5. stop with `DurationReached` once elapsed ≥ duration
//!
//! The machine itself lives inside the clock task. Callers elsewhere hold the
//! run's [`RunLifecycle`], which can read the latest snapshot and stop the run
//! without touching the machine.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, info};
use uuid::Uuid;

use vigil_types::{
    Event, SimulationConfig, SimulationState, StopNotice, StopReason, Subsystem,
};

use crate::bus::{EventBus, TOPIC_STOPPED, TOPIC_UPDATED};
use crate::clock::Ticker;
use crate::entropy::SimRng;
use crate::error::{Result, SimError};
use crate::link;
use crate::noise::NoiseGenerator;
use crate::triggers::{EvalContext, EventDraft, StatusSince, TriggerEngine};

/// Maximum events kept in a snapshot's queue; oldest are evicted first.
pub const EVENT_QUEUE_CAPACITY: usize = 200;

/// Payloads carried on the simulation bus.
#[derive(Debug, Clone)]
pub enum SimulationMessage {
    Updated(Arc<SimulationState>),
    Stopped(StopNotice),
}

pub type SimulationBus = EventBus<SimulationMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopped,
}

struct RunCell {
    phase: Phase,
    elapsed: f64,
    latest: Option<Arc<SimulationState>>,
}

/// Run-scoped handle shared between the tick task and control callers.
pub struct RunLifecycle {
    run_id: Uuid,
    bus: SimulationBus,
    ticker: Ticker,
    // Serializes publications so `stopped` never precedes an in-flight
    // `updated`. Reentrant so a subscriber may stop the run mid-delivery.
    gate: ReentrantMutex<()>,
    cell: Mutex<RunCell>,
}

impl RunLifecycle {
    fn new(run_id: Uuid, bus: SimulationBus, ticker: Ticker) -> Self {
        Self {
            run_id,
            bus,
            ticker,
            gate: ReentrantMutex::new(()),
            cell: Mutex::new(RunCell { phase: Phase::Idle, elapsed: 0.0, latest: None }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn phase(&self) -> Phase {
        self.cell.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Most recent snapshot; after a stop its `is_running` is false.
    pub fn latest(&self) -> Option<Arc<SimulationState>> {
        self.cell.lock().latest.clone()
    }

    fn begin(&self, initial: Arc<SimulationState>) -> Result<()> {
        let mut cell = self.cell.lock();
        if cell.phase != Phase::Idle {
            return Err(SimError::AlreadyRunning);
        }
        cell.phase = Phase::Running;
        cell.latest = Some(initial);
        Ok(())
    }

    fn publish(&self, snapshot: Arc<SimulationState>) -> bool {
        let _gate = self.gate.lock();
        {
            let mut cell = self.cell.lock();
            if cell.phase != Phase::Running {
                return false;
            }
            cell.elapsed = snapshot.elapsed;
            cell.latest = Some(snapshot.clone());
        }
        self.bus.emit(TOPIC_UPDATED, &SimulationMessage::Updated(snapshot));
        true
    }

    /// End the run: flip the phase, halt the clock, publish `simulation:stopped`.
    /// Returns false (and does nothing) unless the run was running. Never
    /// re-enters `tick`, so it is safe from inside a bus handler.
    pub fn stop(&self, reason: StopReason) -> bool {
        let _gate = self.gate.lock();
        let notice = {
            let mut cell = self.cell.lock();
            if cell.phase != Phase::Running {
                return false;
            }
            cell.phase = Phase::Stopped;
            if let Some(latest) = &cell.latest {
                let mut last = (**latest).clone();
                last.is_running = false;
                cell.latest = Some(Arc::new(last));
            }
            StopNotice { run_id: self.run_id, elapsed: cell.elapsed, reason }
        };
        self.ticker.stop();
        info!("⏹ Run {} stopped at t={}s ({:?})", self.run_id, notice.elapsed, reason);
        self.bus.emit(TOPIC_STOPPED, &SimulationMessage::Stopped(notice));
        true
    }

    /// Retire a run whose clock never started. Publishes nothing.
    pub(crate) fn abandon(&self) {
        self.cell.lock().phase = Phase::Stopped;
        self.ticker.stop();
        debug!("Run {} abandoned before its first tick", self.run_id);
    }
}

pub struct StateMachine {
    config: SimulationConfig,
    state: SimulationState,
    triggers: TriggerEngine,
    noise: NoiseGenerator,
    status_since: StatusSince,
    next_event_id: u64,
    rng: SimRng,
    lifecycle: Arc<RunLifecycle>,
}

impl StateMachine {
    /// Build an idle machine for one run. `ticker` is halted when the run stops.
    pub fn new(config: SimulationConfig, bus: SimulationBus, ticker: Ticker, rng: SimRng) -> Self {
        let run_id = Uuid::new_v4();
        let mut triggers = TriggerEngine::new();
        triggers.arm(&config.scenarios);
        let mut state = SimulationState::fresh(run_id, Utc::now());
        state.is_running = false;
        Self {
            noise: NoiseGenerator::new(config.event_frequency),
            status_since: Subsystem::ALL.iter().map(|s| (*s, 0.0)).collect(),
            config,
            state,
            triggers,
            next_event_id: 1,
            rng,
            lifecycle: Arc::new(RunLifecycle::new(run_id, bus, ticker)),
        }
    }

    pub fn lifecycle(&self) -> Arc<RunLifecycle> {
        self.lifecycle.clone()
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn triggers(&self) -> &TriggerEngine {
        &self.triggers
    }

    /// Move idle → running with all-normal status, an empty queue and zero elapsed.
    /// Fails with `AlreadyRunning` on a machine that has already been started.
    pub fn start(&mut self) -> Result<()> {
        let mut fresh = SimulationState::fresh(self.lifecycle.run_id(), Utc::now());
        fresh.is_running = true;
        self.lifecycle.begin(Arc::new(fresh.clone()))?;
        self.state = fresh;
        info!(
            "▶ Run {} started: {}s, {} scenarios, {} triggers, {:.1} noise events/min",
            self.lifecycle.run_id(),
            self.config.duration,
            self.config.scenarios.len(),
            self.triggers.armed_count(),
            self.config.event_frequency
        );
        Ok(())
    }

    /// Advance by `delta` simulated seconds and publish the resulting snapshot.
    /// Does nothing once the run has stopped. Returns the published snapshot.
    pub fn tick(&mut self, delta: f64) -> Option<Arc<SimulationState>> {
        if !self.lifecycle.is_running() {
            self.state.is_running = false;
            return None;
        }

        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };
        self.state.elapsed += delta;
        self.state.tick += 1;
        let elapsed = self.state.elapsed;

        self.state.link = link::sample(
            self.config.network_condition,
            &self.config.environment_conditions,
            self.rng.as_mut(),
        );

        let evaluation = {
            let ctx = EvalContext {
                elapsed,
                status: &self.state.system_status,
                status_since: &self.status_since,
                environment: &self.config.environment_conditions,
                link: self.state.link,
            };
            self.triggers.evaluate(&ctx, self.rng.as_mut())
        };

        for patch in evaluation.winning_patches() {
            let previous = self.state.system_status.set(patch.subsystem, patch.status);
            if previous != patch.status {
                self.status_since.insert(patch.subsystem, elapsed);
                info!(
                    "t={elapsed}s {}: {previous} → {} (by {})",
                    patch.subsystem, patch.status, patch.source
                );
            }
        }
        for draft in evaluation.new_events {
            self.push_event(draft);
        }
        if let Some(draft) = self.noise.sample(delta, self.rng.as_mut()) {
            self.push_event(draft);
        }

        let snapshot = Arc::new(self.state.clone());
        self.lifecycle.publish(snapshot.clone());
        debug!(
            "tick {} t={elapsed}s events={} latency={:.0}ms",
            self.state.tick,
            self.state.event_queue.len(),
            self.state.link.latency_ms
        );

        if elapsed >= self.config.duration {
            self.stop_with(StopReason::DurationReached);
        }
        Some(snapshot)
    }

    /// Stop the run. Idempotent: false when it was not running.
    pub fn stop(&mut self) -> bool {
        self.stop_with(StopReason::Requested)
    }

    fn stop_with(&mut self, reason: StopReason) -> bool {
        let stopped = self.lifecycle.stop(reason);
        self.state.is_running = false;
        stopped
    }

    fn push_event(&mut self, draft: EventDraft) {
        let event = Event {
            id: self.next_event_id,
            severity: draft.severity,
            message: draft.message,
            timestamp: self.state.elapsed,
            related_subsystems: draft.related_subsystems,
            scenario_id: draft.scenario_id,
        };
        self.next_event_id += 1;
        self.state.event_queue.push_back(event);
        while self.state.event_queue.len() > EVENT_QUEUE_CAPACITY {
            self.state.event_queue.pop_front();
        }
    }
}
