//! noise.rs — Background telemetry chatter
//!
//! Emits informational events at an average of `event_frequency` per
//! simulated minute, independent of scenario triggers. One draw per tick.

use rand::{Rng, RngCore};

use vigil_types::{Severity, Subsystem};

use crate::triggers::EventDraft;

const CHATTER: &[(&str, Subsystem)] = &[
    ("NVR heartbeat received", Subsystem::StorageStatus),
    ("Camera keyframe interval nominal", Subsystem::CameraStatus),
    ("PoE switch port stats polled", Subsystem::NetworkStatus),
    ("UPS self-test passed", Subsystem::PowerStatus),
    ("Recording segment rotated", Subsystem::StorageStatus),
    ("ONVIF time sync completed", Subsystem::CameraStatus),
    ("Uplink throughput sample recorded", Subsystem::NetworkStatus),
    ("PSU voltage within tolerance", Subsystem::PowerStatus),
];

pub struct NoiseGenerator {
    per_second: f64,
}

impl NoiseGenerator {
    pub fn new(event_frequency: f64) -> Self {
        Self { per_second: event_frequency.max(0.0) / 60.0 }
    }

    /// Chance that a tick of `delta` simulated seconds carries one noise event.
    pub fn probability(&self, delta: f64) -> f64 {
        (self.per_second * delta.max(0.0)).min(1.0)
    }

    pub fn sample(&self, delta: f64, rng: &mut dyn RngCore) -> Option<EventDraft> {
        let p = self.probability(delta);
        if p <= 0.0 || rng.gen::<f64>() >= p {
            return None;
        }
        let (message, subsystem) = CHATTER[rng.gen_range(0..CHATTER.len())];
        Some(EventDraft {
            severity: Severity::Info,
            message: message.to_string(),
            related_subsystems: vec![subsystem],
            scenario_id: None,
        })
    }
}
