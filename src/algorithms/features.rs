//! Item feature vectors: multi-hot genres followed by a standardized release year.

use crate::models::Item;
use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    item_ids: Vec<i64>,
    index: HashMap<i64, usize>,
    genres: Vec<String>,
    /// One unit-norm row per item (all-zero rows stay zero).
    rows: DMatrix<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearScale {
    pub mean: f64,
    pub std_dev: f64,
}

impl YearScale {
    /// Sample mean and standard deviation of the known years. A degenerate
    /// spread becomes 1.0; with no known years every item gets z = 0.
    pub fn fit(items: &[Item]) -> Option<Self> {
        let years: Vec<f64> = items.iter().filter_map(|i| i.year).map(f64::from).collect();
        if years.is_empty() {
            return None;
        }

        let n = years.len() as f64;
        let mean = years.iter().sum::<f64>() / n;
        let std_dev = if years.len() > 1 {
            (years.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        Some(Self {
            mean,
            std_dev: if std_dev > 0.0 && std_dev.is_finite() { std_dev } else { 1.0 },
        })
    }

    pub fn z_score(&self, year: Option<i32>) -> f64 {
        match year {
            Some(year) => (f64::from(year) - self.mean) / self.std_dev,
            None => 0.0,
        }
    }
}

impl FeatureMatrix {
    pub fn build(items: &[Item]) -> Self {
        let genres: Vec<String> = items
            .iter()
            .flat_map(|item| item.genre_tags())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let genre_index: HashMap<&str, usize> = genres
            .iter()
            .enumerate()
            .map(|(i, g)| (g.as_str(), i))
            .collect();

        let scale = YearScale::fit(items);
        let dimension = genres.len() + 1;
        let mut rows = DMatrix::<f64>::zeros(items.len(), dimension);

        for (r, item) in items.iter().enumerate() {
            for tag in item.genre_tags() {
                if let Some(&c) = genre_index.get(tag) {
                    rows[(r, c)] = 1.0;
                }
            }
            rows[(r, dimension - 1)] = scale.map_or(0.0, |s| s.z_score(item.year));

            let norm = rows.row(r).norm();
            if norm > 0.0 {
                rows.row_mut(r).unscale_mut(norm);
            }
        }

        let item_ids: Vec<i64> = items.iter().map(|i| i.item_id).collect();
        let index = item_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        Self {
            item_ids,
            index,
            genres,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.rows.ncols()
    }

    pub fn item_ids(&self) -> &[i64] {
        &self.item_ids
    }

    pub fn genre_vocabulary(&self) -> &[String] {
        &self.genres
    }

    pub fn row_index(&self, item_id: i64) -> Option<usize> {
        self.index.get(&item_id).copied()
    }

    pub fn vector(&self, item_id: i64) -> Option<DVector<f64>> {
        self.row_index(item_id)
            .map(|r| self.rows.row(r).transpose().into_owned())
    }

    /// Dot product of every item row with `query`, in `item_ids()` order.
    pub fn scores(&self, query: &DVector<f64>) -> DVector<f64> {
        &self.rows * query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Item> {
        vec![
            Item::new(1, "Alpha", Some(1990), "Action|Comedy"),
            Item::new(2, "Beta", Some(2000), "Comedy"),
            Item::new(3, "Gamma", None, "(no genres listed)"),
            Item::new(4, "Delta", Some(2010), "Drama"),
        ]
    }

    #[test]
    fn test_vocabulary_is_sorted_and_excludes_sentinel() {
        let features = FeatureMatrix::build(&catalog());
        assert_eq!(features.genre_vocabulary(), &["Action", "Comedy", "Drama"]);
        assert_eq!(features.dimension(), 4);
    }

    #[test]
    fn test_rows_are_unit_norm() {
        let features = FeatureMatrix::build(&catalog());
        for id in [1, 2, 4] {
            let v = features.vector(id).unwrap();
            assert!((v.norm() - 1.0).abs() < 1e-12, "item {} norm {}", id, v.norm());
        }
        // No genres and the mean year: nothing to encode.
        assert_eq!(features.vector(3).unwrap().norm(), 0.0);
    }

    #[test]
    fn test_year_standardization() {
        let scale = YearScale::fit(&catalog()).unwrap();
        assert_eq!(scale.mean, 2000.0);
        assert!((scale.std_dev - 10.0).abs() < 1e-12);
        assert_eq!(scale.z_score(Some(2010)), 1.0);
        assert_eq!(scale.z_score(None), 0.0);
    }

    #[test]
    fn test_missing_or_single_year() {
        let undated = vec![Item::new(1, "A", None, "Action"), Item::new(2, "B", None, "Comedy")];
        assert!(YearScale::fit(&undated).is_none());
        let features = FeatureMatrix::build(&undated);
        assert_eq!(features.vector(1).unwrap().as_slice(), &[1.0, 0.0, 0.0]);

        let single = vec![Item::new(1, "A", Some(1999), "Action")];
        assert_eq!(YearScale::fit(&single).unwrap().std_dev, 1.0);
    }

    #[test]
    fn test_empty_catalog() {
        let features = FeatureMatrix::build(&[]);
        assert!(features.is_empty());
        assert_eq!(features.dimension(), 1);
    }
}
