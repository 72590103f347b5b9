use crate::algorithms::{
    rank_by_weighted_rating, CollaborativeRanker, ContentRanker, FeatureMatrix, PopularityParams, Ranker,
    RankingInput,
};
use crate::config::Config;
use crate::error::StoreError;
use crate::models::*;
use crate::services::cache::{CacheKey, RecommendationCache};
use crate::services::store::RatingStore;
use crate::utils::validation::{validate_k, validate_rating_value};
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};

const TOP_GENRES: usize = 5;

pub struct RecommendationService {
    store: Arc<dyn RatingStore>,
    cache: Arc<dyn RecommendationCache>,
    config: Arc<Config>,
}

impl RecommendationService {
    pub fn new(store: Arc<dyn RatingStore>, cache: Arc<dyn RecommendationCache>, config: Arc<Config>) -> Self {
        Self { store, cache, config }
    }

    /// Top `k` items for the user using the configured strategy. Store faults
    /// are logged and yield an empty list.
    pub async fn recommend(&self, user_id: i64, k: usize) -> Vec<ScoredItem> {
        let strategy = self.config.recommendation.strategy;
        match self.recommend_with(user_id, k, strategy).await {
            Ok(ranking) => ranking.items,
            Err(e) => {
                error!("Recommendation for user {} failed: {:#}", user_id, e);
                Vec::new()
            }
        }
    }

    pub async fn try_recommend(&self, request: &RecommendationRequest) -> Result<RecommendationResponse> {
        let k = validate_k(request.num_recommendations, &self.config.recommendation)?;
        let strategy = request.strategy.unwrap_or(self.config.recommendation.strategy);

        let ranking = self.recommend_with(request.user_id, k, strategy).await?;
        let recommendations = self.enrich(&ranking.items).await?;

        Ok(RecommendationResponse {
            user_id: request.user_id,
            strategy: ranking.strategy,
            recommendations,
            generated_at: Utc::now(),
        })
    }

    /// Runs `strategy` and falls back to popularity on cold start. Results are
    /// served from the read cache when present.
    pub async fn recommend_with(&self, user_id: i64, k: usize, strategy: Strategy) -> Result<Ranking> {
        let k = k.min(self.config.recommendation.max_k);
        if k == 0 {
            return Ok(Ranking {
                strategy,
                items: Vec::new(),
            });
        }

        let key = CacheKey { user_id, strategy, k };
        if let Some(cached) = self.cache.get(&key).await {
            debug!("Cache hit for user {} ({}, k={})", user_id, strategy, k);
            return Ok(cached);
        }
        // Taken before any store read so a concurrent mutation voids the put.
        let epoch = self.cache.epoch(user_id).await;

        let outcome = match strategy {
            Strategy::Content => self.rank_content(user_id, k).await?,
            Strategy::Collaborative => self.rank_collaborative(user_id, k).await?,
            Strategy::Popular => RankOutcome::ColdStart,
        };

        let ranking = match outcome {
            RankOutcome::Ranked(items) => Ranking { strategy, items },
            RankOutcome::ColdStart => {
                if strategy != Strategy::Popular {
                    info!("User {} has no usable history for {}, using popularity", user_id, strategy);
                }
                let rec = &self.config.recommendation;
                Ranking {
                    strategy: Strategy::Popular,
                    items: self.rank_popular(user_id, k, rec.min_votes, rec.prior_weight).await?,
                }
            }
        };

        if let Some(epoch) = epoch {
            self.cache.put(key, epoch, &ranking).await;
        }
        Ok(ranking)
    }

    /// Weighted-rating ranking over catalog items. `limit` is capped at the
    /// configured `max_k`, like every other ranking entry point.
    pub async fn rank_popular(&self, user_id: i64, limit: usize, min_votes: u64, prior_weight: f64) -> Result<Vec<ScoredItem>> {
        let limit = limit.min(self.config.recommendation.max_k);
        let global_mean = self.store.global_mean().await?;
        if global_mean.is_none() || limit == 0 {
            return Ok(Vec::new());
        }

        let stats = self.store.item_aggregates().await?;
        let catalog: Vec<i64> = self.store.items().await?.iter().map(|i| i.item_id).collect();
        let seen: HashSet<i64> = self
            .store
            .ratings_for_user(user_id)
            .await?
            .iter()
            .map(|r| r.item_id)
            .collect();

        Ok(rank_by_weighted_rating(
            &stats,
            &catalog,
            global_mean,
            &seen,
            limit,
            PopularityParams {
                min_votes,
                prior_weight,
            },
        ))
    }

    pub async fn rank_collaborative(&self, user_id: i64, k: usize) -> Result<RankOutcome> {
        let ratings = self.store.all_ratings().await?;
        let ranker = CollaborativeRanker::new(self.config.recommendation.similarity_epsilon);
        let input = RankingInput {
            items: &[],
            ratings: &ratings,
        };
        Ok(ranker.rank(&input, user_id, k))
    }

    pub async fn rank_content(&self, user_id: i64, k: usize) -> Result<RankOutcome> {
        let user_ratings = self.store.ratings_for_user(user_id).await?;
        if user_ratings.is_empty() {
            return Ok(RankOutcome::ColdStart);
        }

        let items = self.store.items().await?;
        let features = FeatureMatrix::build(&items);
        let ranker = ContentRanker::new(self.config.recommendation.rating_max);
        Ok(ranker.rank_with_features(&features, &user_ratings, k))
    }

    /// Inserts or replaces one rating stamped with the current time.
    pub async fn upsert_rating(&self, user_id: i64, item_id: i64, value: f64) -> Result<Rating> {
        let value = validate_rating_value(value, &self.config.recommendation)?;
        let rating = Rating::now(user_id, item_id, value);

        let mut tx = self.store.begin().await?;
        if !tx.user_exists(user_id).await? {
            return Err(StoreError::UnknownUser(user_id).into());
        }
        if !tx.item_exists(item_id).await? {
            return Err(anyhow!("Unknown item: {}", item_id));
        }
        tx.lock_user(user_id).await?;
        tx.upsert_rating(&rating).await?;
        tx.commit().await?;

        self.cache.invalidate_user(user_id).await;
        info!("Stored rating {} for user {} on item {}", value, user_id, item_id);
        Ok(rating)
    }

    /// Returns whether a rating was removed.
    pub async fn remove_rating(&self, user_id: i64, item_id: i64) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        tx.lock_user(user_id).await?;
        let removed = tx.delete_rating(user_id, item_id).await?;
        tx.commit().await?;

        if removed > 0 {
            self.cache.invalidate_user(user_id).await;
            info!("Removed rating of user {} on item {}", user_id, item_id);
        }
        Ok(removed > 0)
    }

    pub async fn user_stats(&self, user_id: i64) -> Result<UserRatingStats> {
        let ratings = self.store.ratings_for_user(user_id).await?;
        let total_ratings = ratings.len() as u64;
        let average_rating = if ratings.is_empty() {
            0.0
        } else {
            ratings.iter().map(|r| r.value).sum::<f64>() / ratings.len() as f64
        };

        let item_ids: Vec<i64> = ratings.iter().map(|r| r.item_id).collect();
        let items = self.store.items_by_ids(&item_ids).await?;

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for item in &items {
            for tag in item.genre_tags() {
                *counts.entry(tag.to_string()).or_insert(0) += 1;
            }
        }

        let mut top_genres: Vec<GenreCount> = counts
            .into_iter()
            .map(|(genre, count)| GenreCount { genre, count })
            .collect();
        top_genres.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.genre.cmp(&b.genre)));
        top_genres.truncate(TOP_GENRES);

        Ok(UserRatingStats {
            user_id,
            total_ratings,
            average_rating,
            top_genres,
        })
    }

    /// The user's stored ratings with display titles, newest first.
    pub async fn user_ratings(&self, user_id: i64) -> Result<Vec<RatedItem>> {
        let mut ratings = self.store.ratings_for_user(user_id).await?;
        ratings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.item_id.cmp(&b.item_id)));

        let item_ids: Vec<i64> = ratings.iter().map(|r| r.item_id).collect();
        let titles: HashMap<i64, String> = self
            .store
            .items_by_ids(&item_ids)
            .await?
            .into_iter()
            .map(|item| (item.item_id, display_title(&item.title)))
            .collect();

        Ok(ratings
            .into_iter()
            .map(|r| RatedItem {
                item_id: r.item_id,
                title: titles
                    .get(&r.item_id)
                    .cloned()
                    .unwrap_or_else(|| format!("ID {}", r.item_id)),
                rating: r.value,
                timestamp: r.timestamp,
            })
            .collect())
    }

    pub async fn search_items(&self, keyword: &str, limit: usize) -> Result<Vec<Item>> {
        let keyword = keyword.trim();
        if keyword.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let limit = limit.min(self.config.recommendation.max_k);
        Ok(self.store.search_items(keyword, limit).await?)
    }

    /// Attaches display metadata. Items missing from the catalog render as `ID {id}`.
    pub async fn enrich(&self, scored: &[ScoredItem]) -> Result<Vec<RecommendationItem>> {
        let ids: Vec<i64> = scored.iter().map(|s| s.item_id).collect();
        let items: HashMap<i64, Item> = self
            .store
            .items_by_ids(&ids)
            .await?
            .into_iter()
            .map(|item| (item.item_id, item))
            .collect();

        Ok(scored
            .iter()
            .map(|s| match items.get(&s.item_id) {
                Some(item) => RecommendationItem {
                    item_id: s.item_id,
                    score: s.score,
                    title: display_title(&item.title),
                    year: item.year,
                    genres: item.genre_tags().into_iter().map(str::to_string).collect(),
                },
                None => RecommendationItem {
                    item_id: s.item_id,
                    score: s.score,
                    title: format!("ID {}", s.item_id),
                    year: None,
                    genres: Vec::new(),
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecommendationConfig;
    use crate::services::cache::{MemoryCache, NoCache};
    use crate::services::store::InMemoryStore;
    use std::time::Duration;

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .load_catalog(vec![
                Item::new(1, "Matrix, The (1999)", Some(1999), "Action|Sci-Fi"),
                Item::new(2, "Speed (1994)", Some(1994), "Action|Thriller"),
                Item::new(3, "Notting Hill (1999)", Some(1999), "Comedy|Romance"),
                Item::new(4, "Alien (1979)", Some(1979), "Horror|Sci-Fi"),
            ])
            .await;
        store
            .load_ratings(vec![
                Rating::new(1, 1, 5.0, 0),
                Rating::new(1, 2, 4.0, 0),
                Rating::new(2, 1, 4.0, 0),
                Rating::new(2, 3, 2.0, 0),
                Rating::new(3, 4, 4.5, 0),
            ])
            .await;
        store
    }

    fn service(store: InMemoryStore, cache: Arc<dyn RecommendationCache>) -> RecommendationService {
        RecommendationService::new(Arc::new(store), cache, Arc::new(Config::default()))
    }

    #[tokio::test]
    async fn test_content_recommendation_skips_seen_items() {
        let service = service(seeded_store().await, Arc::new(NoCache));
        let recs = service.recommend(1, 10).await;
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|s| s.item_id != 1 && s.item_id != 2));
        // Alien shares Sci-Fi but sits two decades earlier than the user's taste.
        assert_eq!(recs[0].item_id, 3);
    }

    #[tokio::test]
    async fn test_unknown_user_falls_back_to_popularity() {
        let service = service(seeded_store().await, Arc::new(NoCache));
        let ranking = service.recommend_with(99, 3, Strategy::Collaborative).await.unwrap();
        assert_eq!(ranking.strategy, Strategy::Popular);

        let rec = RecommendationConfig::default();
        let popular = service.rank_popular(99, 3, rec.min_votes, rec.prior_weight).await.unwrap();
        assert_eq!(ranking.items, popular);
    }

    #[tokio::test]
    async fn test_upsert_invalidates_cache() {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
        let service = service(seeded_store().await, cache.clone());

        service.recommend(1, 5).await;
        assert_eq!(cache.len(), 1);

        service.upsert_rating(1, 4, 1.0).await.unwrap();
        assert!(cache.is_empty());
        assert!(service.recommend(1, 5).await.iter().all(|s| s.item_id != 4));
    }

    #[tokio::test]
    async fn test_upsert_rejects_bad_input() {
        let service = service(seeded_store().await, Arc::new(NoCache));
        assert!(service.upsert_rating(1, 3, 7.0).await.is_err());
        assert!(service.upsert_rating(1, 404, 3.0).await.is_err());
        assert!(service.upsert_rating(404, 3, 3.0).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_rating() {
        let service = service(seeded_store().await, Arc::new(NoCache));
        assert!(service.remove_rating(2, 3).await.unwrap());
        assert!(!service.remove_rating(2, 3).await.unwrap());
        assert_eq!(service.user_stats(2).await.unwrap().total_ratings, 1);
    }

    #[tokio::test]
    async fn test_user_stats() {
        let service = service(seeded_store().await, Arc::new(NoCache));
        let stats = service.user_stats(1).await.unwrap();
        assert_eq!(stats.total_ratings, 2);
        assert_eq!(stats.average_rating, 4.5);
        assert_eq!(
            stats.top_genres[0],
            GenreCount {
                genre: "Action".to_string(),
                count: 2
            }
        );
        let names: Vec<&str> = stats.top_genres.iter().map(|g| g.genre.as_str()).collect();
        assert_eq!(names, vec!["Action", "Sci-Fi", "Thriller"]);

        let empty = service.user_stats(99).await.unwrap();
        assert_eq!(empty.total_ratings, 0);
        assert!(empty.top_genres.is_empty());
    }

    #[tokio::test]
    async fn test_user_ratings_newest_first() {
        let store = seeded_store().await;
        store
            .load_ratings(vec![
                Rating::new(4, 1, 3.0, 100),
                Rating::new(4, 3, 4.5, 300),
                Rating::new(4, 2, 2.0, 200),
            ])
            .await;
        let service = service(store, Arc::new(NoCache));

        let rated = service.user_ratings(4).await.unwrap();
        let ids: Vec<i64> = rated.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(rated[0].title, "Notting Hill (1999)");
        assert_eq!(rated[0].rating, 4.5);
        assert_eq!(rated[2].title, "The Matrix (1999)");

        assert!(service.user_ratings(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rank_popular_caps_limit_at_max_k() {
        let store = seeded_store().await;
        let config = Config {
            recommendation: RecommendationConfig {
                max_k: 2,
                min_votes: 0,
                ..RecommendationConfig::default()
            },
            ..Config::default()
        };
        let service = RecommendationService::new(Arc::new(store), Arc::new(NoCache), Arc::new(config));

        let rec = &service.config.recommendation;
        let popular = service.rank_popular(99, 10, rec.min_votes, rec.prior_weight).await.unwrap();
        assert_eq!(popular.len(), 2);
        let ranking = service.recommend_with(99, 10, Strategy::Content).await.unwrap();
        assert_eq!(ranking.strategy, Strategy::Popular);
        assert_eq!(ranking.items, popular);
    }

    #[tokio::test]
    async fn test_enrich_and_search() {
        let service = service(seeded_store().await, Arc::new(NoCache));
        let enriched = service
            .enrich(&[ScoredItem::new(1, 0.9), ScoredItem::new(77, 0.1)])
            .await
            .unwrap();
        assert_eq!(enriched[0].title, "The Matrix (1999)");
        assert_eq!(enriched[0].genres, vec!["Action", "Sci-Fi"]);
        assert_eq!(enriched[1].title, "ID 77");

        assert!(service.search_items("  ", 10).await.unwrap().is_empty());
        let found = service.search_items("SPEED", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].item_id, 2);
    }

    #[tokio::test]
    async fn test_try_recommend_validates_k() {
        let service = service(seeded_store().await, Arc::new(NoCache));
        let request = RecommendationRequest {
            user_id: 1,
            num_recommendations: 0,
            strategy: None,
        };
        assert!(service.try_recommend(&request).await.is_err());

        let request = RecommendationRequest {
            num_recommendations: 2,
            ..request
        };
        let response = service.try_recommend(&request).await.unwrap();
        assert_eq!(response.strategy, Strategy::Content);
        assert_eq!(response.recommendations.len(), 2);
    }
}
