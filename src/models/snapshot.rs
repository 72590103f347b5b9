//! Local rating snapshot: a loosely keyed, possibly stale JSON profile of one user.
//!
//! Entries are kept as raw JSON values and only interpreted through the typed
//! accessors below, so malformed fields become per-entry skips instead of a
//! whole-document parse failure.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    #[serde(default)]
    pub user_id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub ratings: Vec<SnapshotEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub movie_id: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub movie: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub title: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub rating: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub timestamp: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How a snapshot entry names its item, in resolution priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRef {
    Id(i64),
    Title(String),
    Missing,
}

impl LocalSnapshot {
    pub fn new(user_id: Option<i64>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.map(Value::from).unwrap_or(Value::Null),
            username: Some(username.into()),
            ratings: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_entry(mut self, entry: SnapshotEntry) -> Self {
        self.ratings.push(entry);
        self
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Declared user id, if it is an integer or a digit string.
    pub fn preferred_user_id(&self) -> Option<i64> {
        as_integer(&self.user_id)
    }

    /// Username to resolve or create; falls back to the textual user id.
    pub fn effective_username(&self) -> Option<String> {
        if let Some(name) = self.username.as_deref().map(str::trim) {
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
        match &self.user_id {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }

    /// Returns true when the stored user id had to change.
    pub fn set_user_id(&mut self, user_id: i64) -> bool {
        if self.user_id == Value::from(user_id) {
            return false;
        }
        self.user_id = Value::from(user_id);
        true
    }
}

impl SnapshotEntry {
    pub fn by_id(movie_id: i64, rating: f64) -> Self {
        Self {
            movie_id: Value::from(movie_id),
            rating: Value::from(rating),
            ..Default::default()
        }
    }

    pub fn by_title(title: impl Into<String>, rating: f64) -> Self {
        Self {
            title: Value::from(title.into()),
            rating: Value::from(rating),
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Value::from(timestamp);
        self
    }

    pub fn item_ref(&self) -> ItemRef {
        if let Some(id) = as_integer(&self.movie_id) {
            return ItemRef::Id(id);
        }
        if self.movie_id.is_null() {
            if let Some(id) = as_integer(&self.movie) {
                return ItemRef::Id(id);
            }
        }
        match self.fallback_title() {
            Some(title) => ItemRef::Title(title),
            None => ItemRef::Missing,
        }
    }

    /// Title text to try when no numeric id resolves.
    pub fn fallback_title(&self) -> Option<String> {
        if let Some(title) = non_empty_text(&self.title) {
            return Some(title);
        }
        if self.title.is_null() && as_integer(&self.movie).is_none() {
            return non_empty_text(&self.movie);
        }
        None
    }

    pub fn has_rating(&self) -> bool {
        !self.rating.is_null()
    }

    pub fn rating_value(&self) -> Option<f64> {
        let value = match &self.rating {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        value.is_finite().then_some(value)
    }

    pub fn timestamp_or(&self, now: i64) -> i64 {
        match &self.timestamp {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                .unwrap_or(now),
            Value::String(s) => s.trim().parse::<i64>().unwrap_or(now),
            _ => now,
        }
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn non_empty_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}
