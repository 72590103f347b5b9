use super::{RatingStore, StoreTransaction};
use crate::config::PostgresConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::{Item, ItemStats, Rating, User};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::info;

type ItemRow = (i64, String, Option<i32>, Option<String>);
type RatingRow = (i64, i64, f64, i64);

const ITEM_COLUMNS: &str = "movie_id::BIGINT, title, year::INT, genres";
const RATING_COLUMNS: &str =
    "user_id::BIGINT, movie_id::BIGINT, rating::FLOAT8, \"timestamp\"::BIGINT";
/// First key of the two-key advisory lock taken per username.
const USERNAME_LOCK_CLASS: i32 = 1;

/// PostgreSQL-backed rating relation over the `movies`, `users` and `ratings` tables.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgStore {
    pub async fn connect(config: &PostgresConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL with {} max connections", config.max_connections);
        Ok(Self::new(pool))
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn item_from_row((item_id, title, year, genres): ItemRow) -> Item {
    Item {
        item_id,
        title,
        year,
        genres: genres.unwrap_or_default(),
    }
}

fn rating_from_row((user_id, item_id, value, timestamp): RatingRow) -> Rating {
    Rating {
        user_id,
        item_id,
        value,
        timestamp,
    }
}

#[async_trait]
impl RatingStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn items(&self) -> StoreResult<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM movies ORDER BY movie_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(item_from_row).collect())
    }

    async fn items_by_ids(&self, item_ids: &[i64]) -> StoreResult<Vec<Item>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM movies WHERE movie_id = ANY($1)"
        ))
        .bind(item_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(item_from_row).collect())
    }

    async fn search_items(&self, keyword: &str, limit: usize) -> StoreResult<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM movies \
             WHERE strpos(LOWER(title), LOWER($1)) > 0 \
             ORDER BY title ASC, movie_id ASC \
             LIMIT $2"
        ))
        .bind(keyword.trim())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(item_from_row).collect())
    }

    async fn ratings_for_user(&self, user_id: i64) -> StoreResult<Vec<Rating>> {
        let rows = sqlx::query_as::<_, RatingRow>(&format!(
            "SELECT {RATING_COLUMNS} FROM ratings WHERE user_id = $1 ORDER BY movie_id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(rating_from_row).collect())
    }

    async fn all_ratings(&self) -> StoreResult<Vec<Rating>> {
        let rows = sqlx::query_as::<_, RatingRow>(&format!(
            "SELECT {RATING_COLUMNS} FROM ratings ORDER BY user_id, movie_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(rating_from_row).collect())
    }

    async fn item_aggregates(&self) -> StoreResult<Vec<ItemStats>> {
        let rows = sqlx::query_as::<_, (i64, f64, i64)>(
            "SELECT r.movie_id::BIGINT, AVG(r.rating)::FLOAT8, COUNT(*)::BIGINT \
             FROM ratings r JOIN movies m ON m.movie_id = r.movie_id \
             GROUP BY r.movie_id ORDER BY r.movie_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(item_id, mean, votes)| ItemStats {
                item_id,
                mean,
                votes: votes.max(0) as u64,
            })
            .collect())
    }

    async fn global_mean(&self) -> StoreResult<Option<f64>> {
        let mean = sqlx::query_scalar::<_, Option<f64>>("SELECT AVG(rating)::FLOAT8 FROM ratings")
            .fetch_one(&self.pool)
            .await?;
        Ok(mean)
    }

    async fn find_user(&self, username: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT user_id::BIGINT, username FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id, username)| User { user_id, username }))
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn user_exists(&mut self, user_id: i64) -> StoreResult<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT user_id::BIGINT FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(found.is_some())
    }

    async fn find_user_id(&mut self, username: &str) -> StoreResult<Option<i64>> {
        let found = sqlx::query_scalar::<_, i64>("SELECT user_id::BIGINT FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(found)
    }

    async fn create_user(&mut self, username: &str) -> StoreResult<i64> {
        let user_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (username) VALUES ($1) RETURNING user_id::BIGINT",
        )
        .bind(username)
        .fetch_one(&mut *self.tx)
        .await?;
        info!("Created user {} with id {}", username, user_id);
        Ok(user_id)
    }

    async fn lock_user(&mut self, user_id: i64) -> StoreResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn lock_username(&mut self, username: &str) -> StoreResult<()> {
        // Two-key form: its key space is separate from the per-user lock.
        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
            .bind(USERNAME_LOCK_CLASS)
            .bind(username)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn item_exists(&mut self, item_id: i64) -> StoreResult<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT movie_id::BIGINT FROM movies WHERE movie_id = $1")
            .bind(item_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(found.is_some())
    }

    async fn find_item_by_exact_title(&mut self, title: &str) -> StoreResult<Option<i64>> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT movie_id::BIGINT FROM movies WHERE LOWER(title) = LOWER($1) \
             ORDER BY movie_id LIMIT 1",
        )
        .bind(title)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(found)
    }

    async fn find_item_by_title_fragment(&mut self, fragment: &str) -> StoreResult<Option<i64>> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT movie_id::BIGINT FROM movies WHERE strpos(LOWER(title), LOWER($1)) > 0 \
             ORDER BY movie_id LIMIT 1",
        )
        .bind(fragment)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(found)
    }

    async fn delete_ratings_for_user(&mut self, user_id: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM ratings WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_rating(&mut self, user_id: i64, item_id: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM ratings WHERE user_id = $1 AND movie_id = $2")
            .bind(user_id)
            .bind(item_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_rating(&mut self, rating: &Rating) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO ratings (user_id, movie_id, rating, \"timestamp\") VALUES ($1, $2, $3, $4)",
        )
        .bind(rating.user_id)
        .bind(rating.item_id)
        .bind(rating.value)
        .bind(rating.timestamp)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::DuplicateRating {
                user_id: rating.user_id,
                item_id: rating.item_id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
