//! scenarios.rs — Built-in what-if scenarios
//!
//! Each preset models one operational failure mode of a deployed CCTV system
//! and carries its own recovery triggers, so a run never ends up stuck in a
//! degraded state purely because of a preset. Selectable from the CLI
//! (`--preset`) and the control WebSocket.

use vigil_types::{
    Light, Scenario, Severity, Status, Subsystem, Trigger, TriggerCondition, TriggerEffect,
    Weather,
};

pub const PRESET_NAMES: &[&str] = &[
    "storm",
    "network-congestion",
    "power-outage",
    "storage-pressure",
    "camera-faults",
];

pub fn preset_names() -> &'static [&'static str] {
    PRESET_NAMES
}

/// Look up a preset by name.
pub fn preset(name: &str) -> Option<Scenario> {
    match name {
        "storm" => Some(preset_storm()),
        "network-congestion" => Some(preset_network_congestion()),
        "power-outage" => Some(preset_power_outage()),
        "storage-pressure" => Some(preset_storage_pressure()),
        "camera-faults" => Some(preset_camera_faults()),
        _ => None,
    }
}

fn named(id: &str, name: &str, description: &str, triggers: Vec<Trigger>) -> Scenario {
    Scenario {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        triggers,
    }
}

fn threshold(at_seconds: f64) -> TriggerCondition {
    TriggerCondition::Threshold { at_seconds }
}

fn recovery(subsystem: Subsystem, after_seconds: f64, message: &str) -> Trigger {
    Trigger::new(
        TriggerCondition::Recovery { subsystem, after_seconds },
        TriggerEffect::status(subsystem, Status::Normal).with_event(Severity::Info, message),
    )
    .repeatable()
}

/// Storm weather: rain fade on wireless links, lens obstruction, lightning surge risk
pub fn preset_storm() -> Scenario {
    let in_storm = TriggerCondition::Environment {
        light: None,
        weather: Some(Weather::Storm),
        min_interference: None,
    };
    named(
        "storm",
        "Storm event",
        "Heavy weather degrades wireless backhaul and outdoor cameras",
        vec![
            Trigger::new(
                TriggerCondition::All {
                    conditions: vec![in_storm.clone(), TriggerCondition::Latency { above_ms: 120.0 }],
                },
                TriggerEffect::status(Subsystem::NetworkStatus, Status::Degraded)
                    .with_event(Severity::Warning, "Wireless bridge rain fade, link latency high"),
            )
            .repeatable(),
            Trigger::new(
                TriggerCondition::All {
                    conditions: vec![in_storm, TriggerCondition::Probability { chance: 0.05 }],
                },
                TriggerEffect::status(Subsystem::CameraStatus, Status::Degraded)
                    .with_event(Severity::Warning, "Outdoor camera image obstructed"),
            )
            .repeatable(),
            Trigger::new(
                TriggerCondition::Probability { chance: 0.002 },
                TriggerEffect::status(Subsystem::PowerStatus, Status::Critical)
                    .with_event(Severity::Critical, "Surge protector tripped on pole feed"),
            ),
            recovery(Subsystem::NetworkStatus, 45.0, "Wireless bridge link restored"),
            recovery(Subsystem::CameraStatus, 60.0, "Outdoor camera image clear"),
            recovery(Subsystem::PowerStatus, 90.0, "Pole feed power restored"),
        ],
    )
}

/// Uplink congestion: latency-driven degradation, escalates when sustained
pub fn preset_network_congestion() -> Scenario {
    named(
        "network-congestion",
        "Network congestion",
        "Core switch uplink saturates under concurrent high-bitrate streams",
        vec![
            Trigger::new(
                TriggerCondition::Latency { above_ms: 100.0 },
                TriggerEffect::status(Subsystem::NetworkStatus, Status::Degraded)
                    .with_event(Severity::Warning, "Uplink latency above 100 ms"),
            )
            .repeatable(),
            Trigger::new(
                TriggerCondition::All {
                    conditions: vec![
                        TriggerCondition::Status {
                            subsystem: Subsystem::NetworkStatus,
                            is: Status::Degraded,
                        },
                        TriggerCondition::Latency { above_ms: 200.0 },
                    ],
                },
                TriggerEffect::status(Subsystem::NetworkStatus, Status::Critical)
                    .with_status(Subsystem::CameraStatus, Status::Degraded)
                    .with_event(Severity::Critical, "Uplink saturated, camera streams dropping frames"),
            )
            .repeatable(),
            recovery(Subsystem::NetworkStatus, 30.0, "Uplink utilisation back to normal"),
            recovery(Subsystem::CameraStatus, 30.0, "Camera streams at full frame rate"),
        ],
    )
}

/// Mains failure at t=60 with UPS cascade into storage and cameras
pub fn preset_power_outage() -> Scenario {
    named(
        "power-outage",
        "Power outage",
        "Mains power lost; UPS carries the NVR until the generator starts",
        vec![
            Trigger::new(
                threshold(60.0),
                TriggerEffect::status(Subsystem::PowerStatus, Status::Critical)
                    .with_event(Severity::Critical, "Mains power lost, running on UPS"),
            ),
            Trigger::new(
                TriggerCondition::All {
                    conditions: vec![
                        threshold(90.0),
                        TriggerCondition::Status {
                            subsystem: Subsystem::PowerStatus,
                            is: Status::Critical,
                        },
                    ],
                },
                TriggerEffect::status(Subsystem::StorageStatus, Status::Degraded)
                    .with_status(Subsystem::CameraStatus, Status::Degraded)
                    .with_event(Severity::Warning, "Non-essential cameras shed to extend UPS runtime"),
            ),
            Trigger::new(
                threshold(150.0),
                TriggerEffect::status(Subsystem::PowerStatus, Status::Degraded)
                    .with_event(Severity::Warning, "Generator online, mains still absent"),
            ),
            recovery(Subsystem::StorageStatus, 90.0, "NVR back on stable supply"),
            recovery(Subsystem::CameraStatus, 90.0, "All cameras powered"),
            Trigger::new(
                threshold(300.0),
                TriggerEffect::status(Subsystem::PowerStatus, Status::Normal)
                    .with_event(Severity::Info, "Mains power restored"),
            ),
        ],
    )
}

/// Recording volume fills up over time until a retention purge
pub fn preset_storage_pressure() -> Scenario {
    named(
        "storage-pressure",
        "Storage pressure",
        "Recording retention outgrows NVR capacity",
        vec![
            Trigger::new(
                threshold(120.0),
                TriggerEffect::status(Subsystem::StorageStatus, Status::Degraded)
                    .with_event(Severity::Warning, "NVR volume above 85% capacity"),
            ),
            Trigger::new(
                threshold(240.0),
                TriggerEffect::status(Subsystem::StorageStatus, Status::Critical)
                    .with_event(Severity::Critical, "NVR volume above 95%, overwriting oldest footage"),
            ),
            Trigger::new(
                TriggerCondition::Window { from_seconds: 240.0, until_seconds: 300.0 },
                TriggerEffect::default().with_event(Severity::Warning, "Disk write queue backing up"),
            )
            .repeatable(),
            Trigger::new(
                threshold(360.0),
                TriggerEffect::status(Subsystem::StorageStatus, Status::Normal)
                    .with_event(Severity::Info, "Retention purge completed"),
            ),
        ],
    )
}

/// Random per-tick camera faults, worse at night
pub fn preset_camera_faults() -> Scenario {
    named(
        "camera-faults",
        "Camera faults",
        "Intermittent stream drops; IR illuminator failures at night",
        vec![
            Trigger::new(
                TriggerCondition::Probability { chance: 0.01 },
                TriggerEffect::status(Subsystem::CameraStatus, Status::Degraded)
                    .with_event(Severity::Warning, "Camera stream dropped"),
            )
            .repeatable(),
            Trigger::new(
                TriggerCondition::All {
                    conditions: vec![
                        TriggerCondition::Environment {
                            light: Some(Light::Night),
                            weather: None,
                            min_interference: None,
                        },
                        TriggerCondition::Probability { chance: 0.02 },
                    ],
                },
                TriggerEffect::status(Subsystem::CameraStatus, Status::Critical)
                    .with_event(Severity::Critical, "IR illuminator failure, camera blind"),
            )
            .repeatable(),
            recovery(Subsystem::CameraStatus, 30.0, "Camera stream reconnected"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use vigil_types::SimulationConfig;

    #[test]
    fn every_named_preset_resolves_and_validates() {
        let scenarios: Vec<Scenario> = preset_names()
            .iter()
            .map(|name| {
                let s = preset(name).unwrap_or_else(|| panic!("missing preset {name}"));
                assert_eq!(s.id, *name);
                assert!(!s.triggers.is_empty());
                s
            })
            .collect();
        let cfg = SimulationConfig { scenarios, ..Default::default() };
        config::validate(&cfg).unwrap();
    }

    #[test]
    fn unknown_preset_is_none() {
        assert!(preset("meteor").is_none());
    }

    #[test]
    fn every_degrading_preset_has_a_way_back() {
        for name in preset_names() {
            let s = preset(name).unwrap();
            let sets_normal = s
                .triggers
                .iter()
                .any(|t| t.effect.status.values().any(|st| *st == Status::Normal));
            assert!(sets_normal, "{name} never restores a subsystem");
        }
    }
}
