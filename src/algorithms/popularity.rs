//! Bayesian-shrunk popularity ranking used for cold start.

use super::{Ranker, RankingInput};
use crate::models::{ItemStats, RankOutcome, Rating, ScoredItem, Strategy};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// `WR = v/(v+m)·R + m/(v+m)·C`. With no votes and no prior the item sits at `C`.
pub fn weighted_rating(mean: f64, votes: u64, global_mean: f64, prior_weight: f64) -> f64 {
    let v = votes as f64;
    let denominator = v + prior_weight;
    if denominator <= 0.0 {
        return global_mean;
    }
    (v / denominator) * mean + (prior_weight / denominator) * global_mean
}

/// Per-item mean and vote count plus the global mean over every rating.
pub fn aggregate(ratings: &[Rating]) -> (Vec<ItemStats>, Option<f64>) {
    let mut sums: HashMap<i64, (f64, u64)> = HashMap::new();
    let mut total = 0.0;
    for rating in ratings {
        let entry = sums.entry(rating.item_id).or_insert((0.0, 0));
        entry.0 += rating.value;
        entry.1 += 1;
        total += rating.value;
    }

    let global_mean = if ratings.is_empty() {
        None
    } else {
        Some(total / ratings.len() as f64)
    };

    let mut stats: Vec<ItemStats> = sums
        .into_iter()
        .map(|(item_id, (sum, votes))| ItemStats {
            item_id,
            mean: sum / votes as f64,
            votes,
        })
        .collect();
    stats.sort_by_key(|s| s.item_id);
    (stats, global_mean)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopularityParams {
    pub min_votes: u64,
    pub prior_weight: f64,
}

struct Candidate {
    item_id: i64,
    votes: u64,
    score: f64,
}

fn popularity_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.votes.cmp(&a.votes))
        .then_with(|| a.item_id.cmp(&b.item_id))
}

/// Ranks catalog items by weighted rating, excluding `seen` and items below
/// `min_votes`. Stats for ids outside `catalog` are ignored. Catalog items
/// nobody rated only qualify when `min_votes` is 0. Empty when there are no
/// ratings at all.
pub fn rank_by_weighted_rating(
    stats: &[ItemStats],
    catalog: &[i64],
    global_mean: Option<f64>,
    seen: &HashSet<i64>,
    limit: usize,
    params: PopularityParams,
) -> Vec<ScoredItem> {
    let Some(global_mean) = global_mean else {
        return Vec::new();
    };
    if limit == 0 {
        return Vec::new();
    }

    let known: HashSet<i64> = catalog.iter().copied().collect();
    let mut candidates: Vec<Candidate> = stats
        .iter()
        .filter(|s| known.contains(&s.item_id))
        .filter(|s| s.votes >= params.min_votes && !seen.contains(&s.item_id))
        .map(|s| Candidate {
            item_id: s.item_id,
            votes: s.votes,
            score: weighted_rating(s.mean, s.votes, global_mean, params.prior_weight),
        })
        .collect();

    if params.min_votes == 0 {
        let rated: HashSet<i64> = stats.iter().map(|s| s.item_id).collect();
        candidates.extend(
            catalog
                .iter()
                .filter(|id| !rated.contains(id) && !seen.contains(id))
                .map(|&item_id| Candidate {
                    item_id,
                    votes: 0,
                    score: global_mean,
                }),
        );
    }

    candidates.sort_by(popularity_order);
    candidates.truncate(limit);
    candidates
        .into_iter()
        .map(|c| ScoredItem::new(c.item_id, c.score))
        .collect()
}

#[derive(Debug, Clone)]
pub struct PopularityRanker {
    params: PopularityParams,
}

impl PopularityRanker {
    pub fn new(min_votes: u64, prior_weight: f64) -> Self {
        Self {
            params: PopularityParams {
                min_votes,
                prior_weight,
            },
        }
    }

    pub fn params(&self) -> PopularityParams {
        self.params
    }
}

impl Ranker for PopularityRanker {
    fn strategy(&self) -> Strategy {
        Strategy::Popular
    }

    /// Never cold-starts: an empty list only means nothing qualifies.
    fn rank(&self, input: &RankingInput<'_>, user_id: i64, k: usize) -> RankOutcome {
        let (stats, global_mean) = aggregate(input.ratings);
        let catalog: Vec<i64> = input.items.iter().map(|i| i.item_id).collect();
        let seen: HashSet<i64> = input
            .ratings
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.item_id)
            .collect();
        RankOutcome::Ranked(rank_by_weighted_rating(
            &stats,
            &catalog,
            global_mean,
            &seen,
            k,
            self.params,
        ))
    }
}
