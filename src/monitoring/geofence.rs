//! Rectangular geofence with edge-triggered breach detection

use crate::core::{Coordinate, DEFAULT_GEOFENCE};
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle `[x0, x1] x [y0, y1]` in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Default for Geofence {
    fn default() -> Self {
        let (x0, y0, x1, y1) = DEFAULT_GEOFENCE;
        Self { x0, y0, x1, y1 }
    }
}

impl Geofence {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Inclusive membership; points on the boundary are inside
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.x0 <= x && x <= self.x1 && self.y0 <= y && y <= self.y1
    }

    pub fn contains_point(&self, point: &Coordinate) -> bool {
        self.contains(point.x, point.y)
    }

    pub fn is_well_formed(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1].iter().all(|v| v.is_finite())
            && self.x0 < self.x1
            && self.y0 < self.y1
    }
}

/// When a position outside the fence produces a breach event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachPolicy {
    /// Once per inside -> outside transition
    #[default]
    EdgeTriggered,
    /// On every position observed outside
    EverySample,
}

/// Outcome of evaluating one position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeofenceTransition {
    pub inside: bool,
    pub breach: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GeofenceEvaluator {
    region: Geofence,
    policy: BreachPolicy,
}

impl GeofenceEvaluator {
    pub fn new(region: Geofence, policy: BreachPolicy) -> Self {
        Self { region, policy }
    }

    pub fn region(&self) -> &Geofence {
        &self.region
    }

    pub fn policy(&self) -> BreachPolicy {
        self.policy
    }

    /// Compare the stored membership flag with the membership at (x, y).
    /// Re-entering is silent under both policies.
    pub fn evaluate(&self, was_inside: bool, x: f64, y: f64) -> GeofenceTransition {
        let inside = self.region.contains(x, y);
        let breach = match self.policy {
            BreachPolicy::EdgeTriggered => was_inside && !inside,
            BreachPolicy::EverySample => !inside,
        };
        GeofenceTransition { inside, breach }
    }

    /// Membership of a tag's first position. Never a breach, whatever the
    /// policy: a tag first seen outside is not reported.
    pub fn evaluate_first(&self, x: f64, y: f64) -> GeofenceTransition {
        GeofenceTransition {
            inside: self.region.contains(x, y),
            breach: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_is_inside() {
        let fence = Geofence::default();
        assert!(fence.contains(0.2, 0.2));
        assert!(fence.contains(5.8, 3.3));
        assert!(fence.contains(3.0, 2.0));
        assert!(!fence.contains(6.0, 2.0));
        assert!(!fence.contains(3.0, 0.19));
    }

    #[test]
    fn test_edge_triggered_sequence() {
        let evaluator = GeofenceEvaluator::default();
        let mut inside = true;
        let mut breaches = 0;

        for (x, y) in [(3.0, 2.0), (6.0, 2.0), (6.1, 2.0), (6.2, 2.5), (3.0, 2.0), (6.0, 2.0)] {
            let t = evaluator.evaluate(inside, x, y);
            inside = t.inside;
            if t.breach {
                breaches += 1;
            }
        }

        assert_eq!(breaches, 2);
        assert!(!inside);
    }

    #[test]
    fn test_every_sample_policy() {
        let evaluator = GeofenceEvaluator::new(Geofence::default(), BreachPolicy::EverySample);
        assert!(evaluator.evaluate(false, 6.0, 2.0).breach);
        assert!(evaluator.evaluate(true, 6.0, 2.0).breach);
        assert!(!evaluator.evaluate(false, 3.0, 2.0).breach);
    }

    #[test]
    fn test_recovery_is_silent() {
        let evaluator = GeofenceEvaluator::default();
        let t = evaluator.evaluate(false, 3.0, 2.0);
        assert!(t.inside);
        assert!(!t.breach);
    }

    #[test]
    fn test_first_position_never_breaches() {
        for policy in [BreachPolicy::EdgeTriggered, BreachPolicy::EverySample] {
            let evaluator = GeofenceEvaluator::new(Geofence::default(), policy);
            let t = evaluator.evaluate_first(7.0, 1.0);
            assert!(!t.inside);
            assert!(!t.breach);
        }
    }

    #[test]
    fn test_well_formed() {
        assert!(Geofence::default().is_well_formed());
        assert!(!Geofence::new(5.0, 0.0, 1.0, 3.0).is_well_formed());
        assert!(!Geofence::new(0.0, 0.0, f64::NAN, 3.0).is_well_formed());
    }

    #[test]
    fn test_policy_serde_names() {
        let policy: BreachPolicy = serde_json::from_str("\"every_sample\"").unwrap();
        assert_eq!(policy, BreachPolicy::EverySample);
    }
}
