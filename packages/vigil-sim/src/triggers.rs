//! triggers.rs — Scenario trigger engine
//!
//! Evaluates every armed trigger once per tick, in scenario order then
//! trigger order, and reports what fired as status patches plus event drafts.
//! It never touches `SimulationState`; the state machine applies the result.
//!
//! Rules:
//! - a non-repeatable trigger fires at most once per run
//! - no trigger fires twice for the same tick (keyed on the elapsed value)
//! - `status`/`recovery` conditions see the status from before this tick's patches
//! - when two patches hit the same subsystem in one tick, the later one wins
//! - a condition that cannot be evaluated is logged and counts as "not fired"

use std::collections::BTreeMap;
use std::fmt;

use rand::{Rng, RngCore};
use tracing::{debug, warn};

use vigil_types::{
    EnvironmentConditions, LinkMetrics, Scenario, Severity, Status, Subsystem, SystemStatus,
    Trigger, TriggerCondition,
};

use crate::error::TriggerError;

/// Elapsed time at which each subsystem last changed status.
pub type StatusSince = BTreeMap<Subsystem, f64>;

/// Everything a condition may look at on one tick.
pub struct EvalContext<'a> {
    pub elapsed: f64,
    pub status: &'a SystemStatus,
    pub status_since: &'a StatusSince,
    pub environment: &'a EnvironmentConditions,
    pub link: LinkMetrics,
}

/// Which trigger produced a patch or event.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRef {
    pub scenario: String,
    pub trigger_index: usize,
    pub trigger_id: Option<String>,
}

impl fmt::Display for TriggerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.trigger_id {
            Some(id) => write!(f, "{}/{}", self.scenario, id),
            None => write!(f, "{}/#{}", self.scenario, self.trigger_index),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusPatch {
    pub subsystem: Subsystem,
    pub status: Status,
    pub source: TriggerRef,
}

/// An event before the state machine stamps it with an id.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub severity: Severity,
    pub message: String,
    pub related_subsystems: Vec<Subsystem>,
    pub scenario_id: Option<String>,
}

/// Result of one evaluation pass, in evaluation order.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub status_patches: Vec<StatusPatch>,
    pub new_events: Vec<EventDraft>,
}

impl Evaluation {
    pub fn is_empty(&self) -> bool {
        self.status_patches.is_empty() && self.new_events.is_empty()
    }

    /// The patch that wins for each subsystem (the last one evaluated).
    pub fn winning_patches(&self) -> Vec<&StatusPatch> {
        let mut last: BTreeMap<Subsystem, &StatusPatch> = BTreeMap::new();
        for patch in &self.status_patches {
            last.insert(patch.subsystem, patch);
        }
        last.into_values().collect()
    }
}

struct ArmedTrigger {
    scenario_index: usize,
    source: TriggerRef,
    scenario_id: Option<String>,
    trigger: Trigger,
    fire_count: u64,
    last_fired_at: Option<f64>,
}

#[derive(Default)]
pub struct TriggerEngine {
    armed: Vec<ArmedTrigger>,
}

impl TriggerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the armed set with `scenarios`, clearing all fired state.
    pub fn arm(&mut self, scenarios: &[Scenario]) {
        self.armed = scenarios
            .iter()
            .enumerate()
            .flat_map(|(si, scenario)| {
                let label = scenario.label(si);
                let scenario_id = (!scenario.id.is_empty()).then(|| scenario.id.clone());
                scenario.triggers.iter().enumerate().map(move |(ti, trigger)| ArmedTrigger {
                    scenario_index: si,
                    source: TriggerRef {
                        scenario: label.clone(),
                        trigger_index: ti,
                        trigger_id: trigger.id.clone(),
                    },
                    scenario_id: scenario_id.clone(),
                    trigger: trigger.clone(),
                    fire_count: 0,
                    last_fired_at: None,
                })
            })
            .collect();
        debug!("triggers: armed {} triggers from {} scenarios", self.armed.len(), scenarios.len());
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// How many times the trigger at (scenario position, trigger position) has fired.
    pub fn fire_count(&self, scenario: usize, trigger: usize) -> Option<u64> {
        self.armed
            .iter()
            .find(|a| a.scenario_index == scenario && a.source.trigger_index == trigger)
            .map(|a| a.fire_count)
    }

    pub fn evaluate(&mut self, ctx: &EvalContext<'_>, rng: &mut dyn RngCore) -> Evaluation {
        let mut out = Evaluation::default();

        for armed in &mut self.armed {
            if !armed.trigger.repeatable && armed.fire_count > 0 {
                continue;
            }
            if armed.last_fired_at == Some(ctx.elapsed) {
                continue;
            }

            match holds(&armed.trigger.condition, ctx, rng) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!("triggers: {} skipped at t={}s: {e}", armed.source, ctx.elapsed);
                    continue;
                }
            }

            let effect = &armed.trigger.effect;
            for (&subsystem, &status) in &effect.status {
                out.status_patches.push(StatusPatch {
                    subsystem,
                    status,
                    source: armed.source.clone(),
                });
            }
            if let Some(template) = &effect.event {
                let related_subsystems = if template.related_subsystems.is_empty() {
                    effect.status.keys().copied().collect()
                } else {
                    template.related_subsystems.clone()
                };
                out.new_events.push(EventDraft {
                    severity: template.severity,
                    message: template.message.clone(),
                    related_subsystems,
                    scenario_id: armed.scenario_id.clone(),
                });
            }

            armed.fire_count += 1;
            armed.last_fired_at = Some(ctx.elapsed);
            debug!(
                "triggers: {} ({}) fired at t={}s",
                armed.source,
                armed.trigger.condition.kind(),
                ctx.elapsed
            );
        }

        out
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<f64, TriggerError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(TriggerError::BadNumber { field, value })
    }
}

/// Check a condition's parameters without evaluating it.
pub fn validate(condition: &TriggerCondition) -> Result<(), TriggerError> {
    match condition {
        TriggerCondition::Threshold { at_seconds } => {
            non_negative("atSeconds", *at_seconds)?;
        }
        TriggerCondition::Window { from_seconds, until_seconds } => {
            let from = non_negative("fromSeconds", *from_seconds)?;
            let until = non_negative("untilSeconds", *until_seconds)?;
            if from > until {
                return Err(TriggerError::InvertedWindow { from, until });
            }
        }
        TriggerCondition::Probability { chance } => {
            if !(0.0..=1.0).contains(chance) {
                return Err(TriggerError::BadProbability(*chance));
            }
        }
        TriggerCondition::Status { .. } => {}
        TriggerCondition::Environment { min_interference, .. } => {
            if let Some(min) = min_interference {
                non_negative("minInterference", *min)?;
            }
        }
        TriggerCondition::Latency { above_ms } => {
            non_negative("aboveMs", *above_ms)?;
        }
        TriggerCondition::Recovery { after_seconds, .. } => {
            non_negative("afterSeconds", *after_seconds)?;
        }
        TriggerCondition::All { conditions } | TriggerCondition::Any { conditions } => {
            if conditions.is_empty() {
                return Err(TriggerError::EmptyComposite(condition.kind()));
            }
            for c in conditions {
                validate(c)?;
            }
        }
    }
    Ok(())
}

fn holds(
    condition: &TriggerCondition,
    ctx: &EvalContext<'_>,
    rng: &mut dyn RngCore,
) -> Result<bool, TriggerError> {
    let fired = match condition {
        TriggerCondition::Threshold { at_seconds } => {
            ctx.elapsed >= non_negative("atSeconds", *at_seconds)?
        }
        TriggerCondition::Window { from_seconds, until_seconds } => {
            validate(condition)?;
            *from_seconds <= ctx.elapsed && ctx.elapsed < *until_seconds
        }
        TriggerCondition::Probability { chance } => {
            validate(condition)?;
            rng.gen::<f64>() < *chance
        }
        TriggerCondition::Status { subsystem, is } => ctx.status.get(*subsystem) == *is,
        TriggerCondition::Environment { light, weather, min_interference } => {
            let min = match min_interference {
                Some(m) => Some(non_negative("minInterference", *m)?),
                None => None,
            };
            light.map_or(true, |l| l == ctx.environment.light)
                && weather.map_or(true, |w| w == ctx.environment.weather)
                && min.map_or(true, |m| ctx.environment.interference >= m)
        }
        TriggerCondition::Latency { above_ms } => {
            ctx.link.latency_ms > non_negative("aboveMs", *above_ms)?
        }
        TriggerCondition::Recovery { subsystem, after_seconds } => {
            let after = non_negative("afterSeconds", *after_seconds)?;
            let since = ctx.status_since.get(subsystem).copied().unwrap_or(0.0);
            ctx.status.get(*subsystem) != Status::Normal && ctx.elapsed - since >= after
        }
        TriggerCondition::All { conditions } => {
            if conditions.is_empty() {
                return Err(TriggerError::EmptyComposite("all"));
            }
            for c in conditions {
                if !holds(c, ctx, rng)? {
                    return Ok(false);
                }
            }
            true
        }
        TriggerCondition::Any { conditions } => {
            if conditions.is_empty() {
                return Err(TriggerError::EmptyComposite("any"));
            }
            for c in conditions {
                if holds(c, ctx, rng)? {
                    return Ok(true);
                }
            }
            false
        }
    };
    Ok(fired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use vigil_types::{Light, TriggerEffect, Weather};

    struct World {
        status: SystemStatus,
        since: StatusSince,
        env: EnvironmentConditions,
        link: LinkMetrics,
        rng: StdRng,
    }

    impl World {
        fn new() -> Self {
            Self {
                status: SystemStatus::default(),
                since: StatusSince::new(),
                env: EnvironmentConditions::default(),
                link: LinkMetrics { latency_ms: 20.0, jitter_ms: 1.0 },
                rng: StdRng::seed_from_u64(42),
            }
        }

        fn eval(&mut self, engine: &mut TriggerEngine, elapsed: f64) -> Evaluation {
            let ctx = EvalContext {
                elapsed,
                status: &self.status,
                status_since: &self.since,
                environment: &self.env,
                link: self.link,
            };
            engine.evaluate(&ctx, &mut self.rng)
        }
    }

    fn scenario(id: &str, triggers: Vec<Trigger>) -> Scenario {
        Scenario { id: id.into(), name: id.into(), description: String::new(), triggers }
    }

    fn degrade_network_at(at: f64) -> Trigger {
        Trigger::new(
            TriggerCondition::Threshold { at_seconds: at },
            TriggerEffect::status(Subsystem::NetworkStatus, Status::Degraded),
        )
    }

    #[test]
    fn threshold_fires_exactly_once() {
        let mut engine = TriggerEngine::new();
        engine.arm(&[scenario("s", vec![degrade_network_at(30.0)])]);
        let mut world = World::new();

        let mut fired_at = Vec::new();
        for t in 1..=60 {
            let eval = world.eval(&mut engine, t as f64);
            if !eval.status_patches.is_empty() {
                fired_at.push(t);
            }
        }
        assert_eq!(fired_at, vec![30]);
        assert_eq!(engine.fire_count(0, 0), Some(1));
    }

    #[test]
    fn later_scenario_wins_conflicting_patch() {
        let mut engine = TriggerEngine::new();
        let critical = Trigger::new(
            TriggerCondition::Threshold { at_seconds: 1.0 },
            TriggerEffect::status(Subsystem::NetworkStatus, Status::Critical),
        );
        engine.arm(&[
            scenario("first", vec![degrade_network_at(1.0)]),
            scenario("second", vec![critical]),
        ]);
        let mut world = World::new();

        let eval = world.eval(&mut engine, 1.0);
        assert_eq!(eval.status_patches.len(), 2);
        let winners = eval.winning_patches();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].status, Status::Critical);
        assert_eq!(winners[0].source.scenario, "second");
    }

    #[test]
    fn repeatable_trigger_fires_once_per_tick() {
        let mut engine = TriggerEngine::new();
        let always = Trigger::new(
            TriggerCondition::Threshold { at_seconds: 0.0 },
            TriggerEffect::default().with_event(Severity::Info, "tick"),
        )
        .repeatable();
        engine.arm(&[scenario("s", vec![always])]);
        let mut world = World::new();

        assert_eq!(world.eval(&mut engine, 1.0).new_events.len(), 1);
        assert_eq!(world.eval(&mut engine, 1.0).new_events.len(), 0);
        assert_eq!(world.eval(&mut engine, 2.0).new_events.len(), 1);
        assert_eq!(engine.fire_count(0, 0), Some(2));
    }

    #[test]
    fn probability_extremes_and_independent_draws() {
        let mut engine = TriggerEngine::new();
        let coin = |id: &str| Trigger {
            id: Some(id.into()),
            ..Trigger::new(
                TriggerCondition::Probability { chance: 0.5 },
                TriggerEffect::default().with_event(Severity::Info, id),
            )
            .repeatable()
        };
        let never = Trigger::new(
            TriggerCondition::Probability { chance: 0.0 },
            TriggerEffect::default().with_event(Severity::Info, "never"),
        )
        .repeatable();
        let always = Trigger::new(
            TriggerCondition::Probability { chance: 1.0 },
            TriggerEffect::default().with_event(Severity::Info, "always"),
        )
        .repeatable();
        engine.arm(&[scenario("s", vec![coin("a"), coin("b"), never, always])]);
        let mut world = World::new();

        let (mut a, mut b, mut differ) = (0, 0, 0);
        for t in 1..=400 {
            let eval = world.eval(&mut engine, t as f64);
            let msgs: Vec<&str> = eval.new_events.iter().map(|e| e.message.as_str()).collect();
            assert!(!msgs.contains(&"never"));
            assert!(msgs.contains(&"always"));
            let (fa, fb) = (msgs.contains(&"a"), msgs.contains(&"b"));
            a += fa as u32;
            b += fb as u32;
            differ += (fa != fb) as u32;
        }
        assert!((120..280).contains(&a), "a fired {a} times");
        assert!((120..280).contains(&b), "b fired {b} times");
        assert!(differ > 50, "draws look correlated: {differ}");
    }

    #[test]
    fn malformed_trigger_is_skipped_without_blocking_others() {
        let mut engine = TriggerEngine::new();
        let broken = Trigger::new(
            TriggerCondition::Probability { chance: 2.0 },
            TriggerEffect::status(Subsystem::CameraStatus, Status::Critical),
        );
        engine.arm(&[scenario("s", vec![broken, degrade_network_at(0.0)])]);
        let mut world = World::new();

        let eval = world.eval(&mut engine, 1.0);
        assert_eq!(eval.status_patches.len(), 1);
        assert_eq!(eval.status_patches[0].subsystem, Subsystem::NetworkStatus);
        assert_eq!(engine.fire_count(0, 0), Some(0));
    }

    #[test]
    fn recovery_waits_for_hold_time() {
        let mut engine = TriggerEngine::new();
        let recover = Trigger::new(
            TriggerCondition::Recovery { subsystem: Subsystem::StorageStatus, after_seconds: 10.0 },
            TriggerEffect::status(Subsystem::StorageStatus, Status::Normal),
        )
        .repeatable();
        engine.arm(&[scenario("s", vec![recover])]);
        let mut world = World::new();

        assert!(world.eval(&mut engine, 5.0).is_empty());
        world.status.set(Subsystem::StorageStatus, Status::Degraded);
        world.since.insert(Subsystem::StorageStatus, 5.0);
        assert!(world.eval(&mut engine, 14.0).is_empty());
        let eval = world.eval(&mut engine, 15.0);
        assert_eq!(eval.status_patches[0].status, Status::Normal);
    }

    #[test]
    fn environment_latency_and_status_conditions() {
        let mut engine = TriggerEngine::new();
        let night_fog = Trigger::new(
            TriggerCondition::All {
                conditions: vec![
                    TriggerCondition::Environment {
                        light: Some(Light::Night),
                        weather: Some(Weather::Fog),
                        min_interference: None,
                    },
                    TriggerCondition::Status { subsystem: Subsystem::PowerStatus, is: Status::Normal },
                ],
            },
            TriggerEffect::status(Subsystem::CameraStatus, Status::Degraded),
        );
        let slow = Trigger::new(
            TriggerCondition::Latency { above_ms: 100.0 },
            TriggerEffect::status(Subsystem::NetworkStatus, Status::Degraded)
                .with_event(Severity::Warning, "Backhaul latency high"),
        );
        engine.arm(&[scenario("env", vec![night_fog, slow])]);
        let mut world = World::new();

        assert!(world.eval(&mut engine, 1.0).is_empty());

        world.env.light = Light::Night;
        world.env.weather = Weather::Fog;
        world.link.latency_ms = 180.0;
        let eval = world.eval(&mut engine, 2.0);
        assert_eq!(eval.status_patches.len(), 2);
        assert_eq!(eval.new_events.len(), 1);
        assert_eq!(eval.new_events[0].related_subsystems, vec![Subsystem::NetworkStatus]);
        assert_eq!(eval.new_events[0].scenario_id.as_deref(), Some("env"));
    }

    #[test]
    fn window_is_half_open() {
        let mut engine = TriggerEngine::new();
        let inside = Trigger::new(
            TriggerCondition::Window { from_seconds: 2.0, until_seconds: 4.0 },
            TriggerEffect::default().with_event(Severity::Info, "inside window"),
        )
        .repeatable();
        engine.arm(&[scenario("w", vec![inside])]);
        let mut world = World::new();

        let fired: Vec<usize> =
            (1..=5).map(|t| world.eval(&mut engine, t as f64).new_events.len()).collect();
        assert_eq!(fired, vec![0, 1, 1, 0, 0]);
    }

    #[test]
    fn any_holds_when_one_branch_matches() {
        let mut engine = TriggerEngine::new();
        let night_or_noisy = Trigger::new(
            TriggerCondition::Any {
                conditions: vec![
                    TriggerCondition::Environment {
                        light: Some(Light::Night),
                        weather: None,
                        min_interference: None,
                    },
                    TriggerCondition::Environment {
                        light: None,
                        weather: None,
                        min_interference: Some(2.0),
                    },
                ],
            },
            TriggerEffect::status(Subsystem::CameraStatus, Status::Degraded),
        )
        .repeatable();
        engine.arm(&[scenario("any", vec![night_or_noisy])]);
        let mut world = World::new();

        world.env.interference = 1.0;
        assert!(world.eval(&mut engine, 1.0).is_empty());
        world.env.interference = 2.0;
        assert_eq!(world.eval(&mut engine, 2.0).status_patches.len(), 1);
        world.env.interference = 0.0;
        world.env.light = Light::Night;
        assert_eq!(world.eval(&mut engine, 3.0).status_patches.len(), 1);
    }

    #[test]
    fn min_interference_is_inclusive() {
        let mut engine = TriggerEngine::new();
        let noisy = Trigger::new(
            TriggerCondition::Environment {
                light: None,
                weather: None,
                min_interference: Some(1.5),
            },
            TriggerEffect::default().with_event(Severity::Warning, "RF interference high"),
        )
        .repeatable();
        engine.arm(&[scenario("rf", vec![noisy])]);
        let mut world = World::new();

        world.env.interference = 1.4;
        assert!(world.eval(&mut engine, 1.0).is_empty());
        world.env.interference = 1.5;
        assert_eq!(world.eval(&mut engine, 2.0).new_events.len(), 1);
        assert_eq!(
            validate(&TriggerCondition::Environment {
                light: None,
                weather: None,
                min_interference: Some(-1.0),
            }),
            Err(TriggerError::BadNumber { field: "minInterference", value: -1.0 })
        );
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        assert!(validate(&TriggerCondition::Threshold { at_seconds: -1.0 }).is_err());
        assert!(validate(&TriggerCondition::Probability { chance: f64::NAN }).is_err());
        assert_eq!(
            validate(&TriggerCondition::Window { from_seconds: 9.0, until_seconds: 3.0 }),
            Err(TriggerError::InvertedWindow { from: 9.0, until: 3.0 })
        );
        assert_eq!(
            validate(&TriggerCondition::Any { conditions: vec![] }),
            Err(TriggerError::EmptyComposite("any"))
        );
        assert!(validate(&TriggerCondition::Latency { above_ms: 80.0 }).is_ok());
    }
}
