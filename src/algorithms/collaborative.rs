//! Item-item collaborative filtering over L2-normalized rating columns.
//!
//! The item×item similarity matrix is never materialized for ranking: the
//! score of candidate `j` is `Â[:,j] · Σ_i r_i Â[:,i]`, which equals
//! `Σ_i sim[j,i] · r_i` for cosine similarity on normalized columns.

use super::{Ranker, RankingInput};
use crate::models::{RankOutcome, Rating, ScoredItem, Strategy};
use crate::utils::top_k;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct ItemItemModel {
    item_ids: Vec<i64>,
    item_index: HashMap<i64, usize>,
    user_index: HashMap<i64, usize>,
    /// Sparse normalized columns: `(user row, value / (‖column‖ + ε))`.
    columns: Vec<Vec<(usize, f64)>>,
}

impl ItemItemModel {
    pub fn fit(ratings: &[Rating], epsilon: f64) -> Self {
        let item_ids: Vec<i64> = ratings
            .iter()
            .map(|r| r.item_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let user_ids: BTreeSet<i64> = ratings.iter().map(|r| r.user_id).collect();

        let item_index: HashMap<i64, usize> = item_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let user_index: HashMap<i64, usize> = user_ids.into_iter().enumerate().map(|(i, id)| (id, i)).collect();

        let mut cells: HashMap<(usize, usize), f64> = HashMap::with_capacity(ratings.len());
        for rating in ratings {
            cells.insert((user_index[&rating.user_id], item_index[&rating.item_id]), rating.value);
        }

        let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); item_ids.len()];
        for ((row, col), value) in cells {
            columns[col].push((row, value));
        }

        for column in columns.iter_mut() {
            column.sort_by_key(|(row, _)| *row);
            let norm = column.iter().map(|(_, v)| v * v).sum::<f64>().sqrt() + epsilon;
            for (_, value) in column.iter_mut() {
                *value /= norm;
            }
        }

        Self {
            item_ids,
            item_index,
            user_index,
            columns,
        }
    }

    pub fn item_ids(&self) -> &[i64] {
        &self.item_ids
    }

    pub fn num_users(&self) -> usize {
        self.user_index.len()
    }

    /// Dense normalized user×item matrix.
    pub fn normalized_matrix(&self) -> DMatrix<f64> {
        let mut matrix = DMatrix::<f64>::zeros(self.num_users(), self.item_ids.len());
        for (col, column) in self.columns.iter().enumerate() {
            for &(row, value) in column {
                matrix[(row, col)] = value;
            }
        }
        matrix
    }

    /// Full item×item cosine similarity, indexed like [`Self::item_ids`].
    pub fn similarity_matrix(&self) -> DMatrix<f64> {
        let normalized = self.normalized_matrix();
        normalized.transpose() * &normalized
    }

    pub fn similarity(&self, a: i64, b: i64) -> Option<f64> {
        let a = self.columns.get(*self.item_index.get(&a)?)?;
        let b = self.columns.get(*self.item_index.get(&b)?)?;
        Some(sparse_dot(a, b))
    }

    /// Similarity-weighted scores for every item, with the user's own items
    /// masked to −∞. `None` when the user has no ratings.
    pub fn score_user(&self, user_ratings: &[Rating]) -> Option<Vec<ScoredItem>> {
        let mut query = DVector::<f64>::zeros(self.num_users());
        let mut rated = vec![false; self.item_ids.len()];
        let mut any = false;

        for rating in user_ratings {
            let Some(&col) = self.item_index.get(&rating.item_id) else {
                continue;
            };
            rated[col] = true;
            any = true;
            for &(row, value) in &self.columns[col] {
                query[row] += rating.value * value;
            }
        }

        if !any {
            return None;
        }

        let scored: Vec<ScoredItem> = self
            .columns
            .par_iter()
            .enumerate()
            .map(|(col, column)| {
                let score = if rated[col] {
                    f64::NEG_INFINITY
                } else {
                    column.iter().map(|&(row, value)| value * query[row]).sum()
                };
                ScoredItem::new(self.item_ids[col], score)
            })
            .collect();
        Some(scored)
    }
}

fn sparse_dot(a: &[(usize, f64)], b: &[(usize, f64)]) -> f64 {
    let (mut i, mut j, mut sum) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

#[derive(Debug, Clone)]
pub struct CollaborativeRanker {
    epsilon: f64,
}

impl CollaborativeRanker {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }
}

impl Ranker for CollaborativeRanker {
    fn strategy(&self) -> Strategy {
        Strategy::Collaborative
    }

    fn rank(&self, input: &RankingInput<'_>, user_id: i64, k: usize) -> RankOutcome {
        let user_ratings: Vec<Rating> = input
            .ratings
            .iter()
            .filter(|r| r.user_id == user_id)
            .copied()
            .collect();
        if user_ratings.is_empty() {
            return RankOutcome::ColdStart;
        }

        let model = ItemItemModel::fit(input.ratings, self.epsilon);
        match model.score_user(&user_ratings) {
            Some(scored) => RankOutcome::Ranked(top_k(scored, k)),
            None => RankOutcome::ColdStart,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratings() -> Vec<Rating> {
        vec![
            Rating::new(1, 10, 5.0, 0),
            Rating::new(1, 20, 4.0, 0),
            Rating::new(2, 10, 4.0, 0),
            Rating::new(2, 20, 5.0, 0),
            Rating::new(2, 30, 1.0, 0),
            Rating::new(3, 30, 5.0, 0),
            Rating::new(3, 40, 4.5, 0),
            Rating::new(4, 10, 3.0, 0),
            Rating::new(4, 40, 2.0, 0),
        ]
    }

    #[test]
    fn test_similarity_matrix_is_symmetric_with_unit_diagonal() {
        let model = ItemItemModel::fit(&ratings(), 1e-9);
        let sim = model.similarity_matrix();
        let n = model.item_ids().len();
        for i in 0..n {
            assert!((sim[(i, i)] - 1.0).abs() < 1e-6);
            for j in 0..n {
                assert!((sim[(i, j)] - sim[(j, i)]).abs() < 1e-12);
            }
        }
        assert!(model.similarity(10, 20).unwrap() > model.similarity(10, 30).unwrap());
        assert!(model.similarity(10, 99).is_none());
    }

    #[test]
    fn test_scores_match_dense_similarity_sum() {
        let all = ratings();
        let model = ItemItemModel::fit(&all, 1e-9);
        let sim = model.similarity_matrix();
        let user: Vec<Rating> = all.iter().filter(|r| r.user_id == 1).copied().collect();

        let scored = model.score_user(&user).unwrap();
        for (col, item) in scored.iter().enumerate() {
            if user.iter().any(|r| r.item_id == item.item_id) {
                assert_eq!(item.score, f64::NEG_INFINITY);
                continue;
            }
            let expected: f64 = user
                .iter()
                .map(|r| sim[(col, model.item_ids().iter().position(|id| *id == r.item_id).unwrap())] * r.value)
                .sum();
            assert!((item.score - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rank_excludes_rated_and_orders_descending() {
        let all = ratings();
        let input = RankingInput {
            items: &[],
            ratings: &all,
        };
        let ranked = CollaborativeRanker::new(1e-9).rank(&input, 1, 10).into_items();
        let ids: Vec<i64> = ranked.iter().map(|s| s.item_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&10) && !ids.contains(&20));
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn test_rank_returns_fewer_than_k() {
        let all = ratings();
        let input = RankingInput {
            items: &[],
            ratings: &all,
        };
        let ranked = CollaborativeRanker::new(1e-9).rank(&input, 2, 10).into_items();
        assert_eq!(ranked.iter().map(|s| s.item_id).collect::<Vec<_>>(), vec![40]);
    }

    #[test]
    fn test_cold_start_without_history() {
        let all = ratings();
        let input = RankingInput {
            items: &[],
            ratings: &all,
        };
        assert!(CollaborativeRanker::new(1e-9).rank(&input, 77, 5).is_cold_start());
    }
}
