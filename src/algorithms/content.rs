use super::features::FeatureMatrix;
use super::{Ranker, RankingInput};
use crate::models::{RankOutcome, Rating, ScoredItem, Strategy};
use crate::utils::top_k;
use nalgebra::DVector;
use std::collections::HashSet;

/// Ranks unseen items by cosine similarity between their feature vector and
/// the user's profile vector.
#[derive(Debug, Clone)]
pub struct ContentRanker {
    rating_max: f64,
}

impl ContentRanker {
    pub fn new(rating_max: f64) -> Self {
        Self { rating_max }
    }

    pub fn rank_with_features(&self, features: &FeatureMatrix, user_ratings: &[Rating], k: usize) -> RankOutcome {
        let Some(profile) = user_profile_vector(features, user_ratings, self.rating_max) else {
            return RankOutcome::ColdStart;
        };

        let seen: HashSet<i64> = user_ratings.iter().map(|r| r.item_id).collect();
        let scores = features.scores(&profile);

        let candidates = features
            .item_ids()
            .iter()
            .zip(scores.iter())
            .map(|(&item_id, &score)| {
                let score = if seen.contains(&item_id) { f64::NEG_INFINITY } else { score };
                ScoredItem::new(item_id, score)
            });

        RankOutcome::Ranked(top_k(candidates, k))
    }
}

impl Ranker for ContentRanker {
    fn strategy(&self) -> Strategy {
        Strategy::Content
    }

    fn rank(&self, input: &RankingInput<'_>, user_id: i64, k: usize) -> RankOutcome {
        let features = FeatureMatrix::build(input.items);
        let user_ratings: Vec<Rating> = input
            .ratings
            .iter()
            .filter(|r| r.user_id == user_id)
            .copied()
            .collect();
        self.rank_with_features(&features, &user_ratings, k)
    }
}

/// Unit-norm rating-weighted sum of the feature vectors of the user's rated
/// items. `None` when none of the rated items is in the catalog.
pub fn user_profile_vector(features: &FeatureMatrix, user_ratings: &[Rating], rating_max: f64) -> Option<DVector<f64>> {
    let mut profile = DVector::<f64>::zeros(features.dimension());
    let mut used = 0usize;

    for rating in user_ratings {
        if let Some(vector) = features.vector(rating.item_id) {
            profile.axpy(rating.value / rating_max, &vector, 1.0);
            used += 1;
        }
    }

    if used == 0 {
        return None;
    }

    let norm = profile.norm();
    if norm > 0.0 {
        profile.unscale_mut(norm);
    }
    Some(profile)
}
