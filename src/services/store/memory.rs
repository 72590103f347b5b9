use super::{RatingStore, StoreTransaction};
use crate::error::{StoreError, StoreResult};
use crate::models::{Item, ItemStats, Rating, User};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
struct Tables {
    items: BTreeMap<i64, Item>,
    users: BTreeMap<i64, User>,
    ratings: BTreeMap<(i64, i64), Rating>,
    next_user_id: i64,
}

/// Process-local store with the same transactional semantics as the
/// PostgreSQL backend. A transaction holds the write lock until it ends, so
/// writers are fully serialized and readers never see a half-applied change.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

/// Prior state of one row touched by an open transaction.
enum Undo {
    Rating((i64, i64), Option<Rating>),
    User(i64, Option<User>),
    NextUserId(i64),
}

/// Writes go straight to the locked tables; the undo log restores them when
/// the transaction is dropped without `commit`.
struct MemoryTransaction {
    guard: OwnedRwLockWriteGuard<Tables>,
    undo: Vec<Undo>,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            debug!("Rolling back {} in-memory changes", self.undo.len());
        }
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Rating(key, Some(rating)) => {
                    self.guard.ratings.insert(key, rating);
                }
                Undo::Rating(key, None) => {
                    self.guard.ratings.remove(&key);
                }
                Undo::User(user_id, Some(user)) => {
                    self.guard.users.insert(user_id, user);
                }
                Undo::User(user_id, None) => {
                    self.guard.users.remove(&user_id);
                }
                Undo::NextUserId(next) => self.guard.next_user_id = next,
            }
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load_catalog(&self, items: impl IntoIterator<Item = Item>) {
        let mut tables = self.tables.write().await;
        let before = tables.items.len();
        for item in items {
            tables.items.insert(item.item_id, item);
        }
        info!("Loaded {} catalog items", tables.items.len() - before);
    }

    pub async fn insert_user(&self, user: User) {
        let mut tables = self.tables.write().await;
        tables.next_user_id = tables.next_user_id.max(user.user_id + 1);
        tables.users.insert(user.user_id, user);
    }

    /// Bulk-loads historical ratings. Later rows for the same pair overwrite earlier ones.
    pub async fn load_ratings(&self, ratings: impl IntoIterator<Item = Rating>) {
        let mut tables = self.tables.write().await;
        for rating in ratings {
            if !tables.users.contains_key(&rating.user_id) {
                let user = User {
                    user_id: rating.user_id,
                    username: format!("user{}", rating.user_id),
                };
                tables.next_user_id = tables.next_user_id.max(user.user_id + 1);
                tables.users.insert(user.user_id, user);
            }
            tables.ratings.insert((rating.user_id, rating.item_id), rating);
        }
    }

    pub async fn user(&self, user_id: i64) -> Option<User> {
        self.tables.read().await.users.get(&user_id).cloned()
    }
}

#[async_trait]
impl RatingStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let guard = self.tables.clone().write_owned().await;
        Ok(Box::new(MemoryTransaction {
            guard,
            undo: Vec::new(),
        }))
    }

    async fn items(&self) -> StoreResult<Vec<Item>> {
        Ok(self.tables.read().await.items.values().cloned().collect())
    }

    async fn items_by_ids(&self, item_ids: &[i64]) -> StoreResult<Vec<Item>> {
        let tables = self.tables.read().await;
        Ok(item_ids
            .iter()
            .filter_map(|id| tables.items.get(id).cloned())
            .collect())
    }

    async fn search_items(&self, keyword: &str, limit: usize) -> StoreResult<Vec<Item>> {
        let needle = keyword.trim().to_lowercase();
        let tables = self.tables.read().await;
        let mut found: Vec<Item> = tables
            .items
            .values()
            .filter(|item| item.title.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.title.cmp(&b.title).then(a.item_id.cmp(&b.item_id)));
        found.truncate(limit);
        Ok(found)
    }

    async fn ratings_for_user(&self, user_id: i64) -> StoreResult<Vec<Rating>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ratings
            .range((user_id, i64::MIN)..=(user_id, i64::MAX))
            .map(|(_, rating)| *rating)
            .collect())
    }

    async fn all_ratings(&self) -> StoreResult<Vec<Rating>> {
        Ok(self.tables.read().await.ratings.values().copied().collect())
    }

    async fn item_aggregates(&self) -> StoreResult<Vec<ItemStats>> {
        let tables = self.tables.read().await;
        let mut sums: BTreeMap<i64, (f64, u64)> = BTreeMap::new();
        for rating in tables.ratings.values() {
            if !tables.items.contains_key(&rating.item_id) {
                continue;
            }
            let entry = sums.entry(rating.item_id).or_insert((0.0, 0));
            entry.0 += rating.value;
            entry.1 += 1;
        }
        Ok(sums
            .into_iter()
            .map(|(item_id, (sum, votes))| ItemStats {
                item_id,
                mean: sum / votes as f64,
                votes,
            })
            .collect())
    }

    async fn global_mean(&self) -> StoreResult<Option<f64>> {
        let tables = self.tables.read().await;
        if tables.ratings.is_empty() {
            return Ok(None);
        }
        let sum: f64 = tables.ratings.values().map(|r| r.value).sum();
        Ok(Some(sum / tables.ratings.len() as f64))
    }

    async fn find_user(&self, username: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.username == username).cloned())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn user_exists(&mut self, user_id: i64) -> StoreResult<bool> {
        Ok(self.guard.users.contains_key(&user_id))
    }

    async fn find_user_id(&mut self, username: &str) -> StoreResult<Option<i64>> {
        Ok(self
            .guard
            .users
            .values()
            .find(|u| u.username == username)
            .map(|u| u.user_id))
    }

    async fn create_user(&mut self, username: &str) -> StoreResult<i64> {
        let user_id = self.guard.next_user_id.max(1);
        self.undo.push(Undo::NextUserId(self.guard.next_user_id));
        self.guard.next_user_id = user_id + 1;

        let previous = self.guard.users.insert(
            user_id,
            User {
                user_id,
                username: username.to_string(),
            },
        );
        self.undo.push(Undo::User(user_id, previous));
        Ok(user_id)
    }

    async fn lock_user(&mut self, _user_id: i64) -> StoreResult<()> {
        Ok(())
    }

    async fn lock_username(&mut self, _username: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn item_exists(&mut self, item_id: i64) -> StoreResult<bool> {
        Ok(self.guard.items.contains_key(&item_id))
    }

    async fn find_item_by_exact_title(&mut self, title: &str) -> StoreResult<Option<i64>> {
        let wanted = title.to_lowercase();
        Ok(self
            .guard
            .items
            .values()
            .find(|item| item.title.to_lowercase() == wanted)
            .map(|item| item.item_id))
    }

    async fn find_item_by_title_fragment(&mut self, fragment: &str) -> StoreResult<Option<i64>> {
        let needle = fragment.to_lowercase();
        Ok(self
            .guard
            .items
            .values()
            .find(|item| item.title.to_lowercase().contains(&needle))
            .map(|item| item.item_id))
    }

    async fn delete_ratings_for_user(&mut self, user_id: i64) -> StoreResult<u64> {
        let keys: Vec<(i64, i64)> = self
            .guard
            .ratings
            .range((user_id, i64::MIN)..=(user_id, i64::MAX))
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            let previous = self.guard.ratings.remove(key);
            self.undo.push(Undo::Rating(*key, previous));
        }
        Ok(keys.len() as u64)
    }

    async fn delete_rating(&mut self, user_id: i64, item_id: i64) -> StoreResult<u64> {
        let key = (user_id, item_id);
        match self.guard.ratings.remove(&key) {
            Some(previous) => {
                self.undo.push(Undo::Rating(key, Some(previous)));
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn insert_rating(&mut self, rating: &Rating) -> StoreResult<()> {
        if !self.guard.users.contains_key(&rating.user_id) {
            return Err(StoreError::UnknownUser(rating.user_id));
        }
        let key = (rating.user_id, rating.item_id);
        if self.guard.ratings.contains_key(&key) {
            return Err(StoreError::DuplicateRating {
                user_id: rating.user_id,
                item_id: rating.item_id,
            });
        }
        self.guard.ratings.insert(key, *rating);
        self.undo.push(Undo::Rating(key, None));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut tx = self;
        tx.undo.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .load_catalog(vec![
                Item::new(1, "Alpha", Some(2001), "Action"),
                Item::new(2, "Alphabet City", Some(1984), "Drama"),
                Item::new(3, "Beta", None, "Comedy"),
            ])
            .await;
        store
            .insert_user(User {
                user_id: 7,
                username: "carol".to_string(),
            })
            .await;
        store
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = seeded().await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_rating(&Rating::new(7, 1, 4.0, 10)).await.unwrap();
        }
        assert!(store.ratings_for_user(7).await.unwrap().is_empty());

        let mut tx = store.begin().await.unwrap();
        tx.insert_rating(&Rating::new(7, 1, 4.0, 10)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.ratings_for_user(7).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_restores_touched_rows() {
        let store = seeded().await;
        store
            .load_ratings(vec![Rating::new(7, 1, 4.0, 10), Rating::new(7, 2, 3.0, 11)])
            .await;
        {
            let mut tx = store.begin().await.unwrap();
            let created = tx.create_user("erin").await.unwrap();
            assert_eq!(created, 8);
            assert_eq!(tx.delete_ratings_for_user(7).await.unwrap(), 2);
            tx.insert_rating(&Rating::new(7, 3, 5.0, 12)).await.unwrap();
            tx.upsert_rating(&Rating::new(created, 1, 1.0, 13)).await.unwrap();
        }

        let ratings = store.ratings_for_user(7).await.unwrap();
        assert_eq!(ratings, vec![Rating::new(7, 1, 4.0, 10), Rating::new(7, 2, 3.0, 11)]);
        assert!(store.find_user("erin").await.unwrap().is_none());
        assert!(store.ratings_for_user(8).await.unwrap().is_empty());

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.create_user("erin").await.unwrap(), 8);
        tx.commit().await.unwrap();
        assert_eq!(store.user(8).await.map(|u| u.username), Some("erin".to_string()));
    }

    #[tokio::test]
    async fn test_aggregates_skip_ratings_outside_catalog() {
        let store = seeded().await;
        store
            .load_ratings(vec![Rating::new(1, 1, 4.0, 0), Rating::new(1, 42, 5.0, 0)])
            .await;
        let stats = store.item_aggregates().await.unwrap();
        assert_eq!(stats, vec![ItemStats { item_id: 1, mean: 4.0, votes: 1 }]);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_pair() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_rating(&Rating::new(7, 1, 4.0, 10)).await.unwrap();
        let err = tx.insert_rating(&Rating::new(7, 1, 2.0, 11)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRating { user_id: 7, item_id: 1 }));

        tx.upsert_rating(&Rating::new(7, 1, 2.0, 11)).await.unwrap();
        tx.commit().await.unwrap();
        let ratings = store.ratings_for_user(7).await.unwrap();
        assert_eq!(ratings, vec![Rating::new(7, 1, 2.0, 11)]);
    }

    #[tokio::test]
    async fn test_title_lookup_prefers_exact_then_lowest_id() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.find_item_by_exact_title("ALPHA").await.unwrap(), Some(1));
        assert_eq!(tx.find_item_by_title_fragment("alpha").await.unwrap(), Some(1));
        assert_eq!(tx.find_item_by_title_fragment("bet").await.unwrap(), Some(2));
        assert_eq!(tx.find_item_by_exact_title("Gamma").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_user_skips_seeded_ids() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        let id = tx.create_user("dave").await.unwrap();
        assert_eq!(id, 8);
        tx.commit().await.unwrap();
        assert_eq!(store.find_user("dave").await.unwrap().map(|u| u.user_id), Some(8));
    }

    #[tokio::test]
    async fn test_aggregates_and_global_mean() {
        let store = seeded().await;
        assert_eq!(store.global_mean().await.unwrap(), None);
        store
            .load_ratings(vec![
                Rating::new(1, 1, 4.0, 0),
                Rating::new(2, 1, 2.0, 0),
                Rating::new(2, 3, 3.0, 0),
            ])
            .await;
        let stats = store.item_aggregates().await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0], ItemStats { item_id: 1, mean: 3.0, votes: 2 });
        assert_eq!(store.global_mean().await.unwrap(), Some(3.0));
    }

    #[tokio::test]
    async fn test_search_orders_by_title() {
        let store = seeded().await;
        let found = store.search_items("ALP", 10).await.unwrap();
        let ids: Vec<i64> = found.iter().map(|i| i.item_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.search_items("alp", 1).await.unwrap().len(), 1);
    }
}
