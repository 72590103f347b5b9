//! Brings the authoritative rating set of one user in line with a local snapshot.

use crate::config::Config;
use crate::models::snapshot::{ItemRef, LocalSnapshot, SnapshotEntry};
use crate::models::Rating;
use crate::services::cache::RecommendationCache;
use crate::services::store::{RatingStore, StoreTransaction};
use crate::utils::validation::{check_rating_value, validate_username};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnresolvedItem,
    MissingValue,
    InvalidValue,
    /// A later entry for the same item won.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub index: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub user_id: i64,
    pub inserted: usize,
    pub skipped: Vec<SkippedEntry>,
    /// The snapshot carried a different (or no) user id and was corrected.
    pub user_id_updated: bool,
}

pub struct ReconciliationService {
    store: Arc<dyn RatingStore>,
    cache: Arc<dyn RecommendationCache>,
    config: Arc<Config>,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn RatingStore>, cache: Arc<dyn RecommendationCache>, config: Arc<Config>) -> Self {
        Self { store, cache, config }
    }

    /// Replaces the user's stored ratings with the usable snapshot entries.
    /// Returns false, with nothing written, on any store fault.
    pub async fn reconcile(&self, snapshot: &mut LocalSnapshot) -> bool {
        match self.reconcile_with_report(snapshot).await {
            Ok(report) => {
                info!(
                    "Reconciled user {}: {} ratings stored, {} entries skipped",
                    report.user_id,
                    report.inserted,
                    report.skipped.len()
                );
                true
            }
            Err(e) => {
                error!("Reconciliation failed: {:#}", e);
                false
            }
        }
    }

    pub async fn reconcile_with_report(&self, snapshot: &mut LocalSnapshot) -> Result<ReconcileReport> {
        let mut tx = self.store.begin().await?;

        let user_id = resolve_user(tx.as_mut(), snapshot).await?;
        tx.lock_user(user_id).await?;

        let now = chrono::Utc::now().timestamp();
        let mut kept: BTreeMap<i64, (usize, Rating)> = BTreeMap::new();
        let mut skipped = Vec::new();

        for (index, entry) in snapshot.ratings.iter().enumerate() {
            let value = match self.entry_value(entry) {
                Ok(value) => value,
                Err(reason) => {
                    debug!("Skipping snapshot entry {} for user {}: {:?}", index, user_id, reason);
                    skipped.push(SkippedEntry { index, reason });
                    continue;
                }
            };

            let Some(item_id) = resolve_item(tx.as_mut(), entry).await? else {
                debug!("Skipping snapshot entry {} for user {}: unresolved item", index, user_id);
                skipped.push(SkippedEntry {
                    index,
                    reason: SkipReason::UnresolvedItem,
                });
                continue;
            };

            let rating = Rating::new(user_id, item_id, value, entry.timestamp_or(now));
            if let Some((previous, _)) = kept.insert(item_id, (index, rating)) {
                debug!("Snapshot entry {} supersedes entry {} for item {}", index, previous, item_id);
                skipped.push(SkippedEntry {
                    index: previous,
                    reason: SkipReason::Superseded,
                });
            }
        }

        let ratings: Vec<Rating> = kept.into_values().map(|(_, rating)| rating).collect();
        let inserted = tx
            .replace_user_ratings(user_id, &ratings)
            .await
            .with_context(|| format!("Failed to replace ratings for user {}", user_id))?;
        tx.commit().await?;

        self.cache.invalidate_user(user_id).await;
        let user_id_updated = snapshot.set_user_id(user_id);
        skipped.sort_by_key(|s| s.index);

        Ok(ReconcileReport {
            user_id,
            inserted,
            skipped,
            user_id_updated,
        })
    }

    /// Reads a snapshot file, reconciles it and, when the user id had to be
    /// corrected, writes the file back. The write-back is best-effort.
    pub async fn reconcile_file(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match self.reconcile_file_with_report(path).await {
            Ok(report) => {
                info!(
                    "Reconciled {} for user {}: {} ratings stored, {} entries skipped",
                    path.display(),
                    report.user_id,
                    report.inserted,
                    report.skipped.len()
                );
                true
            }
            Err(e) => {
                error!("Reconciliation of {} failed: {:#}", path.display(), e);
                false
            }
        }
    }

    pub async fn reconcile_file_with_report(&self, path: impl AsRef<Path>) -> Result<ReconcileReport> {
        let path = path.as_ref();
        let mut snapshot = load_snapshot(path).await?;
        let report = self.reconcile_with_report(&mut snapshot).await?;

        if report.user_id_updated {
            if let Err(e) = save_snapshot(path, &snapshot).await {
                warn!("Could not persist user id {} to {}: {:#}", report.user_id, path.display(), e);
            }
        }
        Ok(report)
    }

    fn entry_value(&self, entry: &SnapshotEntry) -> Result<f64, SkipReason> {
        if !entry.has_rating() {
            return Err(SkipReason::MissingValue);
        }
        let value = entry.rating_value().ok_or(SkipReason::InvalidValue)?;
        check_rating_value(value, &self.config.recommendation).map_err(|_| SkipReason::InvalidValue)
    }
}

pub async fn load_snapshot(path: &Path) -> Result<LocalSnapshot> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    LocalSnapshot::from_json(&json).with_context(|| format!("Malformed snapshot {}", path.display()))
}

pub async fn save_snapshot(path: &Path, snapshot: &LocalSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

async fn resolve_user(tx: &mut dyn StoreTransaction, snapshot: &LocalSnapshot) -> Result<i64> {
    if let Some(user_id) = snapshot.preferred_user_id() {
        if tx.user_exists(user_id).await? {
            return Ok(user_id);
        }
    }

    let username = snapshot
        .effective_username()
        .ok_or_else(|| anyhow!("Snapshot names no existing user and carries no username"))?;
    let username = validate_username(&username)?;

    tx.lock_username(username).await?;
    if let Some(user_id) = tx.find_user_id(username).await? {
        return Ok(user_id);
    }

    let user_id = tx.create_user(username).await?;
    info!("Created user {} for username {}", user_id, username);
    Ok(user_id)
}

async fn resolve_item(tx: &mut dyn StoreTransaction, entry: &SnapshotEntry) -> Result<Option<i64>> {
    let title = match entry.item_ref() {
        ItemRef::Id(item_id) => {
            if tx.item_exists(item_id).await? {
                return Ok(Some(item_id));
            }
            match entry.fallback_title() {
                Some(title) => title,
                None => return Ok(None),
            }
        }
        ItemRef::Title(title) => title,
        ItemRef::Missing => return Ok(None),
    };

    if let Some(item_id) = tx.find_item_by_exact_title(&title).await? {
        return Ok(Some(item_id));
    }
    Ok(tx.find_item_by_title_fragment(&title).await?)
}
