pub mod snapshot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Genre tag MovieLens uses for items without any genre.
pub const NO_GENRES_TAG: &str = "(no genres listed)";

const TRAILING_ARTICLES: [&str; 3] = ["The", "A", "An"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: i64,
    pub title: String,
    pub year: Option<i32>,
    /// Pipe-separated genre tags exactly as stored.
    pub genres: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: i64,
    pub item_id: i64,
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub username: String,
}

/// Per-item rating aggregate: mean value and vote count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemStats {
    pub item_id: i64,
    pub mean: f64,
    pub votes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Content,
    Collaborative,
    Popular,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: i64,
    pub score: f64,
}

/// Result of a similarity ranker. `ColdStart` means the user has no usable
/// rating history and the caller should fall back to popularity.
#[derive(Debug, Clone, PartialEq)]
pub enum RankOutcome {
    Ranked(Vec<ScoredItem>),
    ColdStart,
}

/// Final ordered list together with the ranker that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub strategy: Strategy,
    pub items: Vec<ScoredItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: i64,
    pub num_recommendations: usize,
    pub strategy: Option<Strategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id: i64,
    /// Ranker that actually produced the list, after any fallback.
    pub strategy: Strategy,
    pub recommendations: Vec<RecommendationItem>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub item_id: i64,
    pub score: f64,
    pub title: String,
    pub year: Option<i32>,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreCount {
    pub genre: String,
    pub count: u64,
}

/// One stored rating with the item's display title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedItem {
    pub item_id: i64,
    pub title: String,
    pub rating: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRatingStats {
    pub user_id: i64,
    pub total_ratings: u64,
    pub average_rating: f64,
    pub top_genres: Vec<GenreCount>,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Content => write!(f, "content"),
            Strategy::Collaborative => write!(f, "collaborative"),
            Strategy::Popular => write!(f, "popular"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content" => Ok(Strategy::Content),
            "collaborative" | "item-item" => Ok(Strategy::Collaborative),
            "popular" | "popularity" => Ok(Strategy::Popular),
            other => Err(anyhow::anyhow!("Unknown strategy: {}", other)),
        }
    }
}

impl Item {
    pub fn new(item_id: i64, title: impl Into<String>, year: Option<i32>, genres: impl Into<String>) -> Self {
        Self {
            item_id,
            title: title.into(),
            year,
            genres: genres.into(),
        }
    }

    pub fn genre_tags(&self) -> Vec<&str> {
        parse_genre_tags(&self.genres)
    }
}

impl Rating {
    pub fn new(user_id: i64, item_id: i64, value: f64, timestamp: i64) -> Self {
        Self {
            user_id,
            item_id,
            value,
            timestamp,
        }
    }

    pub fn now(user_id: i64, item_id: i64, value: f64) -> Self {
        Self::new(user_id, item_id, value, Utc::now().timestamp())
    }
}

impl ScoredItem {
    pub fn new(item_id: i64, score: f64) -> Self {
        Self { item_id, score }
    }
}

impl RankOutcome {
    pub fn into_items(self) -> Vec<ScoredItem> {
        match self {
            RankOutcome::Ranked(items) => items,
            RankOutcome::ColdStart => Vec::new(),
        }
    }

    pub fn is_cold_start(&self) -> bool {
        matches!(self, RankOutcome::ColdStart)
    }
}

pub fn parse_genre_tags(genres: &str) -> Vec<&str> {
    genres
        .split('|')
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && !tag.eq_ignore_ascii_case(NO_GENRES_TAG))
        .collect()
}

/// Rewrites `"Matrix, The"` as `"The Matrix"`. A trailing `(YYYY)` stays at the end.
pub fn display_title(raw: &str) -> String {
    let raw = raw.trim();
    let (base, year_suffix) = split_year_suffix(raw);

    for article in TRAILING_ARTICLES {
        let suffix = format!(", {}", article);
        if let Some(stem) = base.strip_suffix(suffix.as_str()) {
            let stem = stem.trim_end();
            if stem.is_empty() {
                break;
            }
            return match year_suffix {
                Some(year) => format!("{} {} {}", article, stem, year),
                None => format!("{} {}", article, stem),
            };
        }
    }

    raw.to_string()
}

fn split_year_suffix(title: &str) -> (&str, Option<&str>) {
    if let Some(open) = title.rfind(" (") {
        let tail = &title[open + 1..];
        let digits = tail.trim_start_matches('(').trim_end_matches(')');
        if tail.starts_with('(')
            && tail.ends_with(')')
            && digits.len() == 4
            && digits.chars().all(|c| c.is_ascii_digit())
        {
            return (title[..open].trim_end(), Some(tail));
        }
    }
    (title, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_title_moves_article() {
        assert_eq!(display_title("Matrix, The"), "The Matrix");
        assert_eq!(display_title("Few Good Men, A"), "A Few Good Men");
        assert_eq!(display_title("American Tail, An"), "An American Tail");
        assert_eq!(
            display_title("Shawshank Redemption, The (1994)"),
            "The Shawshank Redemption (1994)"
        );
    }

    #[test]
    fn test_display_title_leaves_other_titles() {
        assert_eq!(display_title("Toy Story (1995)"), "Toy Story (1995)");
        assert_eq!(display_title("Heat"), "Heat");
        assert_eq!(display_title("Them, Theo"), "Them, Theo");
        assert_eq!(display_title(", The"), ", The");
    }

    #[test]
    fn test_genre_tags_skip_sentinel() {
        let item = Item::new(1, "Alpha", Some(1999), "Action| Comedy ||(no genres listed)");
        assert_eq!(item.genre_tags(), vec!["Action", "Comedy"]);

        let empty = Item::new(2, "Beta", None, "(no genres listed)");
        assert!(empty.genre_tags().is_empty());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Content".parse::<Strategy>().unwrap(), Strategy::Content);
        assert_eq!("item-item".parse::<Strategy>().unwrap(), Strategy::Collaborative);
        assert!("bogus".parse::<Strategy>().is_err());
    }
}
