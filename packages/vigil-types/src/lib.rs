//! # vigil-types
//!
//! Shared simulation model for the Vigil CCTV/network health simulator.
//!
//! These types are used by:
//! - `vigil-sim`: the simulation engine (trigger evaluation, state machine, bus)
//! - dashboards: every snapshot and stop notice is serialized from these structs
//!
//! ## Wire conventions
//!
//! - JSON (and TOML config files) use camelCase field names
//! - Trigger conditions are tagged by `type` and flattened into the trigger:
//!   `{"type": "threshold", "atSeconds": 30, "effect": {...}}`
//! - Times are simulated seconds since the run started (`f64`)

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Subsystems & Status ───────────────────────────────────────────────────────

/// Key of one monitored subsystem. Serialized with its status-map key name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Subsystem {
    NetworkStatus,
    CameraStatus,
    StorageStatus,
    PowerStatus,
}

impl Subsystem {
    pub const ALL: [Subsystem; 4] = [
        Subsystem::NetworkStatus,
        Subsystem::CameraStatus,
        Subsystem::StorageStatus,
        Subsystem::PowerStatus,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Subsystem::NetworkStatus => "networkStatus",
            Subsystem::CameraStatus => "cameraStatus",
            Subsystem::StorageStatus => "storageStatus",
            Subsystem::PowerStatus => "powerStatus",
        }
    }
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Normal,
    Degraded,
    Critical,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Normal => "normal",
            Status::Degraded => "degraded",
            Status::Critical => "critical",
        })
    }
}

/// Status of every subsystem. All four keys always exist; a fresh value is all-normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub network_status: Status,
    pub camera_status: Status,
    pub storage_status: Status,
    pub power_status: Status,
}

impl SystemStatus {
    pub fn get(&self, subsystem: Subsystem) -> Status {
        match subsystem {
            Subsystem::NetworkStatus => self.network_status,
            Subsystem::CameraStatus => self.camera_status,
            Subsystem::StorageStatus => self.storage_status,
            Subsystem::PowerStatus => self.power_status,
        }
    }

    /// Set a subsystem's status, returning the previous value.
    pub fn set(&mut self, subsystem: Subsystem, status: Status) -> Status {
        let slot = match subsystem {
            Subsystem::NetworkStatus => &mut self.network_status,
            Subsystem::CameraStatus => &mut self.camera_status,
            Subsystem::StorageStatus => &mut self.storage_status,
            Subsystem::PowerStatus => &mut self.power_status,
        };
        std::mem::replace(slot, status)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Subsystem, Status)> + '_ {
        Subsystem::ALL.into_iter().map(move |s| (s, self.get(s)))
    }

    /// True when no subsystem is degraded or critical.
    pub fn all_normal(&self) -> bool {
        self.iter().all(|(_, s)| s == Status::Normal)
    }
}

// ── Environment ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkCondition {
    #[default]
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Light {
    #[default]
    Day,
    Night,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Weather {
    #[default]
    Clear,
    Rain,
    Fog,
    Snow,
    Storm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConditions {
    #[serde(default)]
    pub light: Light,
    #[serde(default)]
    pub weather: Weather,
    /// RF/electrical interference level, ≥ 0
    #[serde(default)]
    pub interference: f64,
}

// ── Scenarios & Triggers ──────────────────────────────────────────────────────

/// A named bundle of triggers describing one what-if condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

impl Scenario {
    /// Human label used in logs: id, else name, else the list position.
    pub fn label(&self, index: usize) -> String {
        if !self.id.is_empty() {
            self.id.clone()
        } else if !self.name.is_empty() {
            self.name.clone()
        } else {
            format!("scenario#{index}")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub condition: TriggerCondition,
    #[serde(default)]
    pub effect: TriggerEffect,
    /// Non-repeatable triggers fire at most once per run
    #[serde(default)]
    pub repeatable: bool,
}

impl Trigger {
    pub fn new(condition: TriggerCondition, effect: TriggerEffect) -> Self {
        Self { id: None, condition, effect, repeatable: false }
    }

    pub fn repeatable(mut self) -> Self {
        self.repeatable = true;
        self
    }
}

/// When a trigger fires. Tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerCondition {
    /// Elapsed simulated time has reached `at_seconds`
    #[serde(rename_all = "camelCase")]
    Threshold { at_seconds: f64 },
    /// Elapsed time is inside `[from_seconds, until_seconds)`
    #[serde(rename_all = "camelCase")]
    Window { from_seconds: f64, until_seconds: f64 },
    /// One independent uniform draw per tick, fires when below `chance`
    Probability { chance: f64 },
    /// A subsystem currently has the given status
    Status { subsystem: Subsystem, is: Status },
    /// Every field that is set matches the run's environment
    #[serde(rename_all = "camelCase")]
    Environment {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        light: Option<Light>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weather: Option<Weather>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_interference: Option<f64>,
    },
    /// This tick's sampled link latency exceeds `above_ms`
    #[serde(rename_all = "camelCase")]
    Latency { above_ms: f64 },
    /// A subsystem has been away from normal for at least `after_seconds`
    #[serde(rename_all = "camelCase")]
    Recovery { subsystem: Subsystem, after_seconds: f64 },
    All { conditions: Vec<TriggerCondition> },
    Any { conditions: Vec<TriggerCondition> },
}

impl TriggerCondition {
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerCondition::Threshold { .. } => "threshold",
            TriggerCondition::Window { .. } => "window",
            TriggerCondition::Probability { .. } => "probability",
            TriggerCondition::Status { .. } => "status",
            TriggerCondition::Environment { .. } => "environment",
            TriggerCondition::Latency { .. } => "latency",
            TriggerCondition::Recovery { .. } => "recovery",
            TriggerCondition::All { .. } => "all",
            TriggerCondition::Any { .. } => "any",
        }
    }
}

/// What a trigger does when it fires: status patches and/or one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEffect {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status: BTreeMap<Subsystem, Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventTemplate>,
}

impl TriggerEffect {
    pub fn status(subsystem: Subsystem, status: Status) -> Self {
        let mut map = BTreeMap::new();
        map.insert(subsystem, status);
        Self { status: map, event: None }
    }

    pub fn with_status(mut self, subsystem: Subsystem, status: Status) -> Self {
        self.status.insert(subsystem, status);
        self
    }

    pub fn with_event(mut self, severity: Severity, message: impl Into<String>) -> Self {
        self.event = Some(EventTemplate {
            severity,
            message: message.into(),
            related_subsystems: Vec::new(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTemplate {
    #[serde(default = "default_template_severity")]
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_subsystems: Vec<Subsystem>,
}

fn default_template_severity() -> Severity {
    Severity::Warning
}

// ── Config ────────────────────────────────────────────────────────────────────

/// Input to one run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    /// Total simulated seconds; the run stops itself once elapsed reaches this
    pub duration: f64,
    #[serde(default)]
    pub network_condition: NetworkCondition,
    #[serde(default)]
    pub environment_conditions: EnvironmentConditions,
    /// Order is the tie-break priority between triggers firing on the same tick
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    /// Average background info events per simulated minute
    #[serde(default)]
    pub event_frequency: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration: 300.0,
            network_condition: NetworkCondition::Good,
            environment_conditions: EnvironmentConditions::default(),
            scenarios: Vec::new(),
            event_frequency: 6.0,
        }
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// An immutable record in the bounded event queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Monotonically increasing per run
    pub id: u64,
    pub severity: Severity,
    pub message: String,
    /// Simulated clock value when the event was created
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_subsystems: Vec<Subsystem>,
    /// Scenario that produced the event; `None` for background noise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
}

// ── Link metrics ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LinkMetrics {
    pub latency_ms: f64,
    pub jitter_ms: f64,
}

// ── Simulation State (broadcast payload) ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub is_running: bool,
    /// Simulated seconds since start
    pub elapsed: f64,
    /// Number of ticks applied so far
    pub tick: u64,
    pub system_status: SystemStatus,
    pub link: LinkMetrics,
    /// Bounded, newest last
    pub event_queue: VecDeque<Event>,
}

impl SimulationState {
    /// State of a run that has just started: all-normal, empty queue, zero elapsed.
    pub fn fresh(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            is_running: true,
            elapsed: 0.0,
            tick: 0,
            system_status: SystemStatus::default(),
            link: LinkMetrics::default(),
            event_queue: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Requested,
    DurationReached,
}

/// Payload of `simulation:stopped`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopNotice {
    pub run_id: Uuid,
    pub elapsed: f64,
    pub reason: StopReason,
}
