//! Nearest-neighbour matching of a probe signature against the catalog.

use crate::types::{euclidean_distance, EncodingCatalog, FaceSignature, MatchResult};
use serde::Serialize;

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a probe signature against the enrolled catalog.
pub trait Matcher {
    fn compare(&self, probe: &[f32], catalog: &EncodingCatalog) -> MatchResult;
}

/// Map a distance to a confidence score: `1 - distance`, clamped to [0, 1].
pub fn confidence_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Euclidean nearest-neighbour matcher.
///
/// Scans the whole catalog and keeps the minimum distance; the first
/// candidate in catalog order wins a tie. The best candidate is accepted
/// when `distance <= threshold`.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &[f32], catalog: &EncodingCatalog) -> MatchResult {
        let mut best: Option<(&FaceSignature, f32)> = None;

        for signature in catalog.iter() {
            if signature.vector.len() != probe.len() {
                tracing::debug!(
                    enrollee_id = %signature.enrollee_id,
                    expected = probe.len(),
                    actual = signature.vector.len(),
                    "skipping catalog entry with mismatched dimension"
                );
                continue;
            }

            let distance = euclidean_distance(probe, &signature.vector);
            if !distance.is_finite() {
                continue;
            }
            // Strict comparison keeps the earliest entry on ties.
            if best.map_or(true, |(_, best_distance)| distance < best_distance) {
                best = Some((signature, distance));
            }
        }

        match best {
            Some((signature, distance)) if distance <= self.threshold => MatchResult::Match {
                enrollee_id: signature.enrollee_id.clone(),
                confidence: confidence_from_distance(distance),
                distance,
            },
            _ => MatchResult::NoMatch,
        }
    }
}

/// Outcome of checking a probe against one expected enrollee.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verification {
    /// The probe matched the expected enrollee.
    Confirmed { confidence: f32 },
    /// The probe matched a different enrollee.
    Mismatch { recognized: String, confidence: f32 },
    /// The probe matched nobody.
    Unrecognized,
}

impl Verification {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Verification::Confirmed { .. })
    }
}

/// Identify the probe against the whole catalog, then compare the winner
/// with the enrollee the caller expected.
pub fn verify<M: Matcher + ?Sized>(
    matcher: &M,
    expected_id: &str,
    probe: &[f32],
    catalog: &EncodingCatalog,
) -> Verification {
    match matcher.compare(probe, catalog) {
        MatchResult::Match {
            enrollee_id,
            confidence,
            ..
        } if enrollee_id == expected_id => Verification::Confirmed { confidence },
        MatchResult::Match {
            enrollee_id,
            confidence,
            ..
        } => Verification::Mismatch {
            recognized: enrollee_id,
            confidence,
        },
        MatchResult::NoMatch => Verification::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(entries: &[(&str, Vec<f32>)]) -> EncodingCatalog {
        let mut catalog = EncodingCatalog::new();
        for (id, vector) in entries {
            catalog.upsert(*id, vector.clone()).unwrap();
        }
        catalog
    }

    #[test]
    fn test_best_candidate_below_threshold() {
        // distance(probe, S1) = 0.2, distance(probe, S2) = 0.7
        let catalog = catalog(&[("S1", vec![0.2, 0.0]), ("S2", vec![0.0, 0.7])]);
        let result = EuclideanMatcher::default().compare(&[0.0, 0.0], &catalog);

        match result {
            MatchResult::Match { enrollee_id, confidence, distance } => {
                assert_eq!(enrollee_id, "S1");
                assert!((confidence - 0.8).abs() < 1e-6);
                assert!((distance - 0.2).abs() < 1e-6);
            }
            MatchResult::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn test_empty_catalog_is_no_match() {
        let result = EuclideanMatcher::default().compare(&[0.0, 0.0], &EncodingCatalog::new());
        assert_eq!(result, MatchResult::NoMatch);
    }

    #[test]
    fn test_all_candidates_too_far() {
        let catalog = catalog(&[("S1", vec![0.7, 0.0]), ("S2", vec![0.0, 0.9])]);
        let result = EuclideanMatcher::default().compare(&[0.0, 0.0], &catalog);
        assert_eq!(result, MatchResult::NoMatch);
    }

    #[test]
    fn test_tie_resolves_to_first_in_catalog_order() {
        let catalog = catalog(&[
            ("S3", vec![0.0, 0.3]),
            ("S1", vec![0.3, 0.0]),
            ("S2", vec![-0.3, 0.0]),
        ]);
        let result = EuclideanMatcher::default().compare(&[0.0, 0.0], &catalog);
        assert_eq!(result.enrollee_id(), Some("S3"));
    }

    #[test]
    fn test_full_scan_finds_last_entry() {
        let catalog = catalog(&[
            ("decoy1", vec![1.0, 1.0]),
            ("decoy2", vec![0.9, 0.9]),
            ("target", vec![0.05, 0.0]),
        ]);
        let result = EuclideanMatcher::default().compare(&[0.0, 0.0], &catalog);
        assert_eq!(result.enrollee_id(), Some("target"));
    }

    #[test]
    fn test_deterministic() {
        let catalog = catalog(&[("S1", vec![0.1, 0.2, 0.3]), ("S2", vec![0.3, 0.2, 0.1])]);
        let probe = [0.15, 0.2, 0.25];
        let matcher = EuclideanMatcher::default();
        let first = matcher.compare(&probe, &catalog);
        for _ in 0..10 {
            assert_eq!(matcher.compare(&probe, &catalog), first);
        }
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        // Use a representable threshold so the boundary distance is exact.
        let matcher = EuclideanMatcher::new(0.5);
        let catalog = catalog(&[("S1", vec![0.5])]);
        let result = matcher.compare(&[0.0], &catalog);
        assert_eq!(
            result,
            MatchResult::Match { enrollee_id: "S1".into(), confidence: 0.5, distance: 0.5 }
        );
    }

    #[test]
    fn test_threshold_sweep_monotonic_confidence() {
        let matcher = EuclideanMatcher::default();
        let mut last_confidence = f32::INFINITY;
        let mut accepted_after_rejection = false;
        let mut rejected = false;

        for step in 0..=100 {
            let d = step as f32 * 0.012; // 0.0 ..= 1.2
            let catalog = catalog(&[("S1", vec![d])]);
            match matcher.compare(&[0.0], &catalog) {
                MatchResult::Match { confidence, distance, .. } => {
                    assert!(distance <= matcher.threshold());
                    assert!(confidence <= last_confidence);
                    assert!((0.0..=1.0).contains(&confidence));
                    last_confidence = confidence;
                    if rejected {
                        accepted_after_rejection = true;
                    }
                }
                MatchResult::NoMatch => {
                    assert!(d > matcher.threshold() - 1e-6);
                    rejected = true;
                }
            }
        }

        assert!(rejected);
        assert!(!accepted_after_rejection);
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(confidence_from_distance(1.5), 0.0);
        assert_eq!(confidence_from_distance(0.0), 1.0);
        assert_eq!(confidence_from_distance(-0.5), 1.0);
    }

    #[test]
    fn test_verify_outcomes() {
        let catalog = catalog(&[("S1", vec![0.0, 0.0]), ("S2", vec![5.0, 5.0])]);
        let matcher = EuclideanMatcher::default();

        assert!(verify(&matcher, "S1", &[0.1, 0.0], &catalog).is_confirmed());
        assert_eq!(
            verify(&matcher, "S2", &[0.0, 0.0], &catalog),
            Verification::Mismatch { recognized: "S1".into(), confidence: 1.0 }
        );
        assert_eq!(
            verify(&matcher, "S1", &[2.5, 2.5], &catalog),
            Verification::Unrecognized
        );
    }
}
