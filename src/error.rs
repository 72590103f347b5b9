/// Faults raised by the rating store and the read cache.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rating for user {user_id} and item {item_id} already exists")]
    DuplicateRating { user_id: i64, item_id: i64 },

    #[error("Unknown user: {0}")]
    UnknownUser(i64),
}

pub type StoreResult<T> = Result<T, StoreError>;
