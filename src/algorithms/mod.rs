pub mod collaborative;
pub mod content;
pub mod features;
pub mod popularity;

pub use collaborative::{CollaborativeRanker, ItemItemModel};
pub use content::{user_profile_vector, ContentRanker};
pub use features::{FeatureMatrix, YearScale};
pub use popularity::{rank_by_weighted_rating, weighted_rating, PopularityParams, PopularityRanker};

use crate::models::{Item, RankOutcome, Rating, Strategy};

/// Snapshot of the data a ranker reads. Rankers are pure over this input.
#[derive(Debug, Clone, Copy)]
pub struct RankingInput<'a> {
    pub items: &'a [Item],
    pub ratings: &'a [Rating],
}

pub trait Ranker: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Top `k` unseen items for `user_id`, or [`RankOutcome::ColdStart`] when
    /// the user has no history this ranker can use.
    fn rank(&self, input: &RankingInput<'_>, user_id: i64, k: usize) -> RankOutcome;
}
