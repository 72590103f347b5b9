//! Authoritative rating relation plus the catalog and user tables it refers to.
//!
//! Reads go through [`RatingStore`]; every write happens inside a
//! [`StoreTransaction`], which rolls back when dropped without `commit`.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::error::StoreResult;
use crate::models::{Item, ItemStats, Rating, User};
use async_trait::async_trait;

#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    async fn items(&self) -> StoreResult<Vec<Item>>;
    async fn items_by_ids(&self, item_ids: &[i64]) -> StoreResult<Vec<Item>>;
    /// Case-insensitive title substring search, ordered by title then id.
    async fn search_items(&self, keyword: &str, limit: usize) -> StoreResult<Vec<Item>>;

    async fn ratings_for_user(&self, user_id: i64) -> StoreResult<Vec<Rating>>;
    async fn all_ratings(&self) -> StoreResult<Vec<Rating>>;
    /// Mean and vote count per catalog item; ratings on unknown ids are left out.
    async fn item_aggregates(&self) -> StoreResult<Vec<ItemStats>>;
    /// `None` when there are no ratings at all.
    async fn global_mean(&self) -> StoreResult<Option<f64>>;

    async fn find_user(&self, username: &str) -> StoreResult<Option<User>>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn user_exists(&mut self, user_id: i64) -> StoreResult<bool>;
    async fn find_user_id(&mut self, username: &str) -> StoreResult<Option<i64>>;
    async fn create_user(&mut self, username: &str) -> StoreResult<i64>;
    /// Serializes writers for one user until this transaction ends.
    async fn lock_user(&mut self, user_id: i64) -> StoreResult<()>;
    /// Serializes lookup-or-create for one username until this transaction ends.
    async fn lock_username(&mut self, username: &str) -> StoreResult<()>;

    async fn item_exists(&mut self, item_id: i64) -> StoreResult<bool>;
    /// Exact case-insensitive title match; lowest id wins on duplicates.
    async fn find_item_by_exact_title(&mut self, title: &str) -> StoreResult<Option<i64>>;
    /// Case-insensitive substring match; lowest id wins.
    async fn find_item_by_title_fragment(&mut self, fragment: &str) -> StoreResult<Option<i64>>;

    async fn delete_ratings_for_user(&mut self, user_id: i64) -> StoreResult<u64>;
    async fn delete_rating(&mut self, user_id: i64, item_id: i64) -> StoreResult<u64>;
    /// Fails with `DuplicateRating` if the pair already has a row.
    async fn insert_rating(&mut self, rating: &Rating) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Replaces the user's whole rating set. Returns the number of rows inserted.
    async fn replace_user_ratings(&mut self, user_id: i64, ratings: &[Rating]) -> StoreResult<usize> {
        self.delete_ratings_for_user(user_id).await?;
        for rating in ratings {
            self.insert_rating(&Rating { user_id, ..*rating }).await?;
        }
        Ok(ratings.len())
    }

    async fn upsert_rating(&mut self, rating: &Rating) -> StoreResult<()> {
        self.delete_rating(rating.user_id, rating.item_id).await?;
        self.insert_rating(rating).await
    }
}
