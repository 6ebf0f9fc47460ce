//! Simulation parameters with enforced ranges.
//!
//! Every recognised knob is named here; unknown settings are errors, not
//! silently accepted. Range checks apply to updates — a value outside its
//! range is rejected with the previous value retained, so a bad
//! `settings_update` can never wedge the kernel.

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// One parameter's legal range.
struct Range {
    min: f64,
    max: f64,
}

const ATTRACTION: Range = Range { min: 0.001, max: 0.1 };
const REPULSION: Range = Range { min: 0.1, max: 0.5 };
const SPRING: Range = Range { min: 0.001, max: 0.15 };
const DAMPING: Range = Range { min: 0.5, max: 0.95 };
const MAX_VELOCITY: Range = Range { min: 0.1, max: 5.0 };
const COLLISION_RADIUS: Range = Range { min: 0.1, max: 1.0 };
const BOUNDS_SIZE: Range = Range { min: 0.1, max: 2.0 };
const ITERATIONS: Range = Range { min: 1.0, max: 1000.0 };

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhysicsParams {
    /// Centre pull for connected nodes.
    pub attraction: f32,
    /// Pairwise quadratic-falloff push.
    pub repulsion: f32,
    /// Edge-length restoration toward natural length 1.0.
    pub spring: f32,
    /// Per-tick velocity decay.
    pub damping: f32,
    /// Hard component-wise clamp after integration.
    pub max_velocity: f32,
    /// Minimum pairwise distance before force saturates.
    pub collision_radius: f32,
    /// Soft cube bound; positions clamp to ±(bounds_size · 1000).
    pub bounds_size: f32,
    /// Ticks per batch when driven manually.
    pub iterations: u32,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        PhysicsParams {
            attraction: 0.02,
            repulsion: 0.05,
            spring: 0.08,
            damping: 0.85,
            max_velocity: 0.2,
            collision_radius: 0.1,
            bounds_size: 0.5,
            iterations: 100,
        }
    }
}

impl PhysicsParams {
    /// Apply a single named update, range-checked. Unknown names and
    /// out-of-range values leave the previous value untouched.
    pub fn apply(&mut self, setting: &str, value: f64) -> Result<(), GraphError> {
        match setting {
            "attraction" => self.attraction = checked(setting, value, &ATTRACTION)? as f32,
            "repulsion" => self.repulsion = checked(setting, value, &REPULSION)? as f32,
            "spring" => self.spring = checked(setting, value, &SPRING)? as f32,
            "damping" => self.damping = checked(setting, value, &DAMPING)? as f32,
            "max_velocity" => self.max_velocity = checked(setting, value, &MAX_VELOCITY)? as f32,
            "collision_radius" => {
                self.collision_radius = checked(setting, value, &COLLISION_RADIUS)? as f32
            }
            "bounds_size" => self.bounds_size = checked(setting, value, &BOUNDS_SIZE)? as f32,
            "iterations" => self.iterations = checked(setting, value, &ITERATIONS)? as u32,
            other => return Err(GraphError::UnknownSetting(other.to_string())),
        }
        Ok(())
    }
}

fn checked(setting: &str, value: f64, range: &Range) -> Result<f64, GraphError> {
    if !value.is_finite() || value < range.min || value > range.max {
        return Err(GraphError::ValidationFailed {
            setting: setting.to_string(),
            value,
            min: range.min,
            max: range.max,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_table() {
        let p = PhysicsParams::default();
        assert_eq!(p.attraction, 0.02);
        assert_eq!(p.repulsion, 0.05);
        assert_eq!(p.spring, 0.08);
        assert_eq!(p.damping, 0.85);
        assert_eq!(p.max_velocity, 0.2);
        assert_eq!(p.collision_radius, 0.1);
        assert_eq!(p.bounds_size, 0.5);
        assert_eq!(p.iterations, 100);
    }

    #[test]
    fn in_range_update_applies() {
        let mut p = PhysicsParams::default();
        p.apply("damping", 0.9).unwrap();
        assert_eq!(p.damping, 0.9);
        p.apply("iterations", 250.0).unwrap();
        assert_eq!(p.iterations, 250);
    }

    #[test]
    fn out_of_range_update_keeps_previous_value() {
        let mut p = PhysicsParams::default();
        let err = p.apply("damping", 0.2).unwrap_err();
        match err {
            GraphError::ValidationFailed { setting, value, min, max } => {
                assert_eq!(setting, "damping");
                assert_eq!(value, 0.2);
                assert_eq!((min, max), (0.5, 0.95));
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
        assert_eq!(p.damping, 0.85);
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let mut p = PhysicsParams::default();
        assert!(p.apply("spring", f64::NAN).is_err());
        assert!(p.apply("spring", f64::INFINITY).is_err());
        assert_eq!(p.spring, 0.08);
    }

    #[test]
    fn unknown_setting_is_an_error() {
        let mut p = PhysicsParams::default();
        assert!(matches!(
            p.apply("fog_density", 0.5),
            Err(GraphError::UnknownSetting(_))
        ));
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let err = serde_json::from_str::<PhysicsParams>(r#"{"springiness": 0.1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let p: PhysicsParams = serde_json::from_str(r#"{"damping": 0.6}"#).unwrap();
        assert_eq!(p.damping, 0.6);
        assert_eq!(p.spring, 0.08);
    }
}
