//! Linearized least-squares multilateration
//!
//! Each anchor contributes a circle `(x - xi)^2 + (y - yi)^2 = ri^2`. Taking
//! the first anchor (in id order) as reference and subtracting its equation
//! from every other one removes the quadratic terms:
//!
//! ```text
//! 2(xi - x1) x + 2(yi - y1) y = r1^2 - ri^2 + xi^2 + yi^2 - x1^2 - y1^2
//! ```
//!
//! The resulting `A p = b` (one row per non-reference anchor) is solved in the
//! least-squares sense through an SVD, which also gives the conditioning used
//! to reject colinear layouts.

use crate::core::{
    AnchorMap, Coordinate, PositionEstimate, PositionSource, RangeMeasurement, RangingSample,
    SolveError, MIN_ANCHORS_2D,
};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

/// Result of a successful solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Solution {
    pub position: Coordinate,
    /// Number of (anchor, distance) pairs that entered the system
    pub anchors_used: usize,
    /// RMS of `|p - anchor_i| - r_i` over all pairs used (meters)
    pub residual_m: f64,
}

/// Multilateration solver. Stateless apart from its numeric tolerances.
#[derive(Debug, Clone)]
pub struct Multilateration {
    /// Smallest accepted ratio between the smallest and largest singular value
    /// of `A`; below it the anchor layout is treated as degenerate
    pub min_singular_ratio: f64,
    /// Cut-off passed to the SVD back-substitution
    pub svd_epsilon: f64,
}

impl Default for Multilateration {
    fn default() -> Self {
        Self {
            min_singular_ratio: 1e-9,
            svd_epsilon: 1e-12,
        }
    }
}

impl Multilateration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Solve a tag's ranges against the configured anchors.
    ///
    /// Ranges to anchors missing from `anchors` are ignored and do not count
    /// towards the three-anchor minimum.
    pub fn solve(
        &self,
        anchors: &AnchorMap,
        ranges: &BTreeMap<String, RangeMeasurement>,
    ) -> Result<Solution, SolveError> {
        let pairs: Vec<(Coordinate, f64)> = ranges
            .iter()
            .filter_map(|(anchor_id, m)| anchors.get(anchor_id).map(|pos| (*pos, m.distance_m)))
            .collect();

        self.solve_pairs(&pairs)
    }

    /// Solve a ranging sample into a position estimate
    pub fn solve_sample(
        &self,
        anchors: &AnchorMap,
        sample: &RangingSample,
    ) -> Result<PositionEstimate, SolveError> {
        let solution = self.solve(anchors, &sample.ranges)?;

        Ok(PositionEstimate {
            tag_id: sample.tag_id.clone(),
            x: solution.position.x,
            y: solution.position.y,
            timestamp: sample.timestamp,
            source: PositionSource::Solved {
                anchors_used: solution.anchors_used,
                residual_m: solution.residual_m,
            },
        })
    }

    /// Solve from explicit (anchor position, distance) pairs. The first pair is
    /// the reference anchor.
    pub fn solve_pairs(&self, pairs: &[(Coordinate, f64)]) -> Result<Solution, SolveError> {
        if pairs.len() < MIN_ANCHORS_2D {
            return Err(SolveError::InsufficientAnchors {
                available: pairs.len(),
                required: MIN_ANCHORS_2D,
            });
        }

        let (reference, r1) = pairs[0];
        let rows = pairs.len() - 1;
        let mut a_matrix = DMatrix::<f64>::zeros(rows, 2);
        let mut b_vector = DVector::<f64>::zeros(rows);

        for (row, (anchor, ri)) in pairs[1..].iter().enumerate() {
            a_matrix[(row, 0)] = 2.0 * (anchor.x - reference.x);
            a_matrix[(row, 1)] = 2.0 * (anchor.y - reference.y);
            b_vector[row] = r1 * r1 - ri * ri + anchor.x * anchor.x + anchor.y * anchor.y
                - reference.x * reference.x
                - reference.y * reference.y;
        }

        if !a_matrix.iter().chain(b_vector.iter()).all(|v| v.is_finite()) {
            return Err(SolveError::SolveFailed {
                reason: "non-finite input".to_string(),
            });
        }

        let svd = a_matrix.svd(true, true);
        let max_sv = svd.singular_values.max();
        let min_sv = svd.singular_values.min();

        if max_sv <= 0.0 || min_sv / max_sv < self.min_singular_ratio {
            return Err(SolveError::SolveFailed {
                reason: format!(
                    "degenerate anchor geometry (singular values {:.3e} / {:.3e})",
                    min_sv, max_sv
                ),
            });
        }

        let solution = svd
            .solve(&b_vector, self.svd_epsilon)
            .map_err(|e| SolveError::SolveFailed {
                reason: e.to_string(),
            })?;

        let position = Coordinate::new(solution[0], solution[1]);
        if !position.x.is_finite() || !position.y.is_finite() {
            return Err(SolveError::SolveFailed {
                reason: "non-finite solution".to_string(),
            });
        }

        Ok(Solution {
            position,
            anchors_used: pairs.len(),
            residual_m: rms_range_residual(&position, pairs),
        })
    }
}

fn rms_range_residual(position: &Coordinate, pairs: &[(Coordinate, f64)]) -> f64 {
    let sum_sq: f64 = pairs
        .iter()
        .map(|(anchor, range)| {
            let r = position.distance_to(anchor) - range;
            r * r
        })
        .sum();
    (sum_sq / pairs.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_distr::Normal;

    fn room_anchors() -> AnchorMap {
        let mut anchors = AnchorMap::new();
        anchors.insert("A1".to_string(), Coordinate::new(0.0, 0.0));
        anchors.insert("A2".to_string(), Coordinate::new(6.0, 0.0));
        anchors.insert("A3".to_string(), Coordinate::new(6.0, 3.5));
        anchors.insert("A4".to_string(), Coordinate::new(0.0, 3.5));
        anchors
    }

    fn exact_ranges(anchors: &AnchorMap, truth: Coordinate) -> BTreeMap<String, RangeMeasurement> {
        anchors
            .iter()
            .map(|(id, pos)| (id.clone(), RangeMeasurement::new(pos.distance_to(&truth))))
            .collect()
    }

    #[test]
    fn test_exact_ranges_recover_position() {
        let anchors = room_anchors();
        let truth = Coordinate::new(3.0, 2.0);
        let solver = Multilateration::new();

        let solution = solver.solve(&anchors, &exact_ranges(&anchors, truth)).unwrap();

        assert!((solution.position.x - 3.0).abs() < 1e-6);
        assert!((solution.position.y - 2.0).abs() < 1e-6);
        assert_eq!(solution.anchors_used, 4);
        assert!(solution.residual_m < 1e-6);
    }

    #[test]
    fn test_three_anchors_are_enough() {
        let mut anchors = room_anchors();
        anchors.remove("A4");
        let truth = Coordinate::new(1.25, 0.75);

        let solution = Multilateration::new()
            .solve(&anchors, &exact_ranges(&anchors, truth))
            .unwrap();

        assert!((solution.position.x - truth.x).abs() < 1e-6);
        assert!((solution.position.y - truth.y).abs() < 1e-6);
    }

    #[test]
    fn test_noisy_ranges_stay_near_truth() {
        let anchors = room_anchors();
        let truth = Coordinate::new(3.0, 2.0);
        let solver = Multilateration::new();
        let noise = Normal::new(0.0, 0.05).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let trials = 1000;
        let mut within = 0;
        for _ in 0..trials {
            let ranges: BTreeMap<String, RangeMeasurement> = anchors
                .iter()
                .map(|(id, pos)| {
                    let d = (pos.distance_to(&truth) + noise.sample(&mut rng)).max(0.0);
                    (id.clone(), RangeMeasurement::new(d))
                })
                .collect();

            let solution = solver.solve(&anchors, &ranges).unwrap();
            if solution.position.distance_to(&truth) <= 0.3 {
                within += 1;
            }
        }

        // sigma = 0.05 m puts nearly every fix well inside 0.3 m
        assert!(within as f64 / trials as f64 >= 0.99, "only {within}/{trials} within 0.3 m");
    }

    #[test]
    fn test_two_anchors_is_insufficient() {
        let mut anchors = room_anchors();
        anchors.remove("A3");
        anchors.remove("A4");
        let ranges = exact_ranges(&anchors, Coordinate::new(3.0, 2.0));

        let result = Multilateration::new().solve(&anchors, &ranges);
        assert_eq!(
            result,
            Err(SolveError::InsufficientAnchors {
                available: 2,
                required: 3
            })
        );
    }

    #[test]
    fn test_unknown_anchor_ids_do_not_count() {
        let anchors = room_anchors();
        let mut ranges = BTreeMap::new();
        ranges.insert("A1".to_string(), RangeMeasurement::new(3.6));
        ranges.insert("A2".to_string(), RangeMeasurement::new(3.6));
        ranges.insert("Z9".to_string(), RangeMeasurement::new(1.0));

        let result = Multilateration::new().solve(&anchors, &ranges);
        assert!(matches!(
            result,
            Err(SolveError::InsufficientAnchors { available: 2, .. })
        ));
    }

    #[test]
    fn test_colinear_anchors_fail() {
        let pairs = [
            (Coordinate::new(0.0, 0.0), 2.0),
            (Coordinate::new(2.0, 0.0), 1.0),
            (Coordinate::new(4.0, 0.0), 2.5),
        ];

        let result = Multilateration::new().solve_pairs(&pairs);
        assert!(matches!(result, Err(SolveError::SolveFailed { .. })));
    }

    #[test]
    fn test_solve_is_deterministic() {
        let anchors = room_anchors();
        let mut ranges = exact_ranges(&anchors, Coordinate::new(4.2, 1.1));
        ranges.get_mut("A2").unwrap().distance_m += 0.07;
        let solver = Multilateration::new();

        let first = solver.solve(&anchors, &ranges).unwrap();
        let second = solver.solve(&anchors, &ranges).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_solve_sample_keeps_tag_and_timestamp() {
        let anchors = room_anchors();
        let truth = Coordinate::new(2.0, 1.0);
        let sample = RangingSample::from_distances(
            "tag07",
            anchors.iter().map(|(id, p)| (id.clone(), p.distance_to(&truth))),
            1_700_000_000.5,
        );

        let estimate = Multilateration::new().solve_sample(&anchors, &sample).unwrap();
        assert_eq!(estimate.tag_id, "tag07");
        assert_eq!(estimate.timestamp, 1_700_000_000.5);
        assert!(matches!(
            estimate.source,
            PositionSource::Solved { anchors_used: 4, .. }
        ));
    }
}
