//! clock.rs — Wall-clock ticker driving simulated time
//!
//! Pure time source: fires `on_tick(delta_seconds)` every [`TICK_INTERVAL`]
//! on a Tokio task until stopped. Knows nothing about simulation semantics.
//! Ticks run one after another on the same task, so they never overlap; a
//! slow tick delays the next one instead of bunching them up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{Result, SimError};

/// Real time between ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Simulated seconds each tick advances. Fixed so dashboards stay responsive
/// whatever the scenario duration.
pub const SIM_SECONDS_PER_TICK: f64 = 1.0;

#[derive(Default)]
struct TickerInner {
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle; every clone controls the same ticker.
#[derive(Clone, Default)]
pub struct Ticker {
    inner: Arc<TickerInner>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start firing `on_tick`. The first tick lands one interval from now.
    /// Must be called from inside a Tokio runtime.
    pub fn start<F>(&self, on_tick: F) -> Result<()>
    where
        F: FnMut(f64) + Send + 'static,
    {
        self.start_with(TICK_INTERVAL, SIM_SECONDS_PER_TICK, on_tick)
    }

    fn start_with<F>(&self, period: Duration, delta: f64, mut on_tick: F) -> Result<()>
    where
        F: FnMut(f64) + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| SimError::NoRuntime)?;
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("clock: start ignored, already running");
            return Ok(());
        }

        let inner = self.inner.clone();
        let task = handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                on_tick(delta);
            }
            debug!("clock: tick loop exited");
        });
        *self.inner.task.lock() = Some(task);
        debug!("clock: started ({period:?} per {delta}s tick)");
        Ok(())
    }

    /// Halt the ticker. No-op when not running; safe to call from inside `on_tick`.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        debug!("clock: stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}
