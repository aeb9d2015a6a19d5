//! Nearest-profile matching over Euclidean embedding distance.

use crate::types::{Embedding, Profile};

/// Maximum embedding distance accepted as a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Result of matching one probe embedding against the enrolled gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// The gallery was empty — there was nothing to compare against.
    NoCandidates,
    /// Best candidate was farther than the threshold.
    Unknown { distance: f32 },
    /// Positive match.
    Match { label: String, distance: f32 },
}

impl MatchOutcome {
    /// Distance of the best candidate, if any candidate existed.
    pub fn distance(&self) -> Option<f32> {
        match self {
            MatchOutcome::NoCandidates => None,
            MatchOutcome::Unknown { distance } | MatchOutcome::Match { distance, .. } => {
                Some(*distance)
            }
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            MatchOutcome::Match { label, .. } => Some(label),
            _ => None,
        }
    }
}

/// Strategy for comparing a probe embedding against enrolled profiles.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, gallery: &[Profile], threshold: f32) -> MatchOutcome;
}

/// Euclidean nearest-neighbor matcher.
///
/// Takes the minimum distance per profile over all of its embeddings, then
/// the global minimum across profiles. Equal minima resolve to the profile
/// encountered first in gallery order (strict `<` while scanning) — this
/// tie-break is part of the contract, not incidental.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(&self, probe: &Embedding, gallery: &[Profile], threshold: f32) -> MatchOutcome {
        let mut best_idx: Option<usize> = None;
        let mut best_dist = f32::INFINITY;

        for (i, profile) in gallery.iter().enumerate() {
            let mut profile_dist = f32::INFINITY;
            for emb in &profile.embeddings {
                profile_dist = profile_dist.min(probe.euclidean_distance(emb));
            }
            if profile.embeddings.is_empty() {
                continue;
            }
            if profile_dist < best_dist {
                best_dist = profile_dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            None => MatchOutcome::NoCandidates,
            Some(idx) if best_dist <= threshold => MatchOutcome::Match {
                label: gallery[idx].name.clone(),
                distance: best_dist,
            },
            Some(_) => MatchOutcome::Unknown {
                distance: best_dist,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn profile(name: &str, embeddings: Vec<Vec<f32>>) -> Profile {
        Profile {
            id: 0,
            name: name.to_string(),
            created_at: Utc::now(),
            embeddings: embeddings.into_iter().map(Embedding::new).collect(),
        }
    }

    #[test]
    fn test_empty_gallery_has_no_candidates() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let outcome = EuclideanMatcher.best_match(&probe, &[], DEFAULT_MATCH_THRESHOLD);
        assert_eq!(outcome, MatchOutcome::NoCandidates);
        assert_eq!(outcome.distance(), None);
    }

    #[test]
    fn test_match_within_threshold() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![profile("alice", vec![vec![0.3, 0.0]])];
        let outcome = EuclideanMatcher.best_match(&probe, &gallery, 0.6);
        assert_eq!(outcome.label(), Some("alice"));
        assert!((outcome.distance().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_distance_exactly_at_threshold_matches() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![profile("alice", vec![vec![0.6, 0.0]])];
        let outcome = EuclideanMatcher.best_match(&probe, &gallery, 0.6);
        assert_eq!(outcome.label(), Some("alice"));
    }

    #[test]
    fn test_distance_above_threshold_is_unknown() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![profile("alice", vec![vec![2.0, 0.0]])];
        let outcome = EuclideanMatcher.best_match(&probe, &gallery, 0.6);
        assert_eq!(outcome, MatchOutcome::Unknown { distance: 2.0 });
    }

    #[test]
    fn test_per_profile_minimum_over_all_embeddings() {
        // alice's second embedding is the closest of her set
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            profile("alice", vec![vec![1.0, 0.0], vec![0.1, 0.0]]),
            profile("bob", vec![vec![0.5, 0.0]]),
        ];
        let outcome = EuclideanMatcher.best_match(&probe, &gallery, 0.6);
        assert_eq!(outcome.label(), Some("alice"));
        assert!((outcome.distance().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_equal_minima_resolve_to_first_in_gallery_order() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            profile("first", vec![vec![0.4, 0.0]]),
            profile("second", vec![vec![0.0, 0.4]]),
        ];
        let outcome = EuclideanMatcher.best_match(&probe, &gallery, 0.6);
        assert_eq!(outcome.label(), Some("first"));

        // and the reverse ordering flips the winner
        let reversed: Vec<Profile> = gallery.into_iter().rev().collect();
        let outcome = EuclideanMatcher.best_match(&probe, &reversed, 0.6);
        assert_eq!(outcome.label(), Some("second"));
    }

    #[test]
    fn test_closest_profile_wins() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            profile("far", vec![vec![0.5, 0.0]]),
            profile("near", vec![vec![0.2, 0.0]]),
        ];
        let outcome = EuclideanMatcher.best_match(&probe, &gallery, 0.6);
        assert_eq!(outcome.label(), Some("near"));
    }
}
