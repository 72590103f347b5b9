use crate::models::ScoredItem;
use std::cmp::Ordering;

pub mod validation;

/// Highest score first, then lowest item id.
pub fn rank_order(a: &ScoredItem, b: &ScoredItem) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.item_id.cmp(&b.item_id))
}

/// Keeps the `k` best finite scores in deterministic order.
pub fn top_k(scored: impl IntoIterator<Item = ScoredItem>, k: usize) -> Vec<ScoredItem> {
    if k == 0 {
        return Vec::new();
    }

    let mut finite: Vec<ScoredItem> = scored
        .into_iter()
        .filter(|item| item.score.is_finite())
        .collect();

    if finite.len() > k {
        finite.select_nth_unstable_by(k - 1, rank_order);
        finite.truncate(k);
    }
    finite.sort_by(rank_order);
    finite
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_breaks_ties_by_id() {
        let scored = vec![
            ScoredItem::new(9, 0.5),
            ScoredItem::new(4, 0.9),
            ScoredItem::new(2, 0.5),
            ScoredItem::new(7, f64::NEG_INFINITY),
            ScoredItem::new(5, 0.1),
        ];
        let top = top_k(scored.clone(), 3);
        let ids: Vec<i64> = top.iter().map(|s| s.item_id).collect();
        assert_eq!(ids, vec![4, 2, 9]);

        let all = top_k(scored, 10);
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|s| s.item_id != 7));
    }

    #[test]
    fn test_top_k_is_prefix_stable() {
        let scored: Vec<ScoredItem> = (0..50)
            .map(|i| ScoredItem::new(i, ((i * 37) % 11) as f64))
            .collect();
        let small = top_k(scored.clone(), 5);
        let large = top_k(scored, 20);
        assert_eq!(&large[..5], &small[..]);
    }
}
