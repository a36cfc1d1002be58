//! Append-only record of catalog synchronization runs.
//!
//! Each entry lives under `catalog_sync_logs:{catalog}:{timestamp}`. A copy of
//! the newest entry sits under `catalog_sync_latest:{catalog}` and the
//! timestamps are listed, in append order, under
//! `catalog_sync_logs_list:{catalog}`.

use crate::db::{KvTx, Pool};
use crate::error::{require_id, StoreError, StoreResult};
use crate::keys;
use crate::model::SyncLogEntry;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, instrument};

/// Canonical timestamp segment, e.g. `2024-01-01T00:00:00Z`.
pub fn sync_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Write `entry`, move the latest pointer and list its timestamp, atomically.
/// A second entry with the same timestamp is rejected; the latest pointer
/// never moves back to an older run.
#[instrument(skip_all, fields(catalog_id = %catalog_id, status = entry.status.as_str()))]
pub async fn append_sync_log(
    pool: &Pool,
    catalog_id: &str,
    entry: &SyncLogEntry,
) -> StoreResult<()> {
    require_id("catalog", catalog_id)?;
    let ts = sync_timestamp(&entry.timestamp);

    let mut tx = KvTx::begin(pool).await?;
    if !tx
        .insert_new(&keys::catalog_sync_log(catalog_id, &ts), entry)
        .await?
    {
        return Err(StoreError::AlreadyExists {
            kind: "sync log",
            id: format!("{catalog_id}@{ts}"),
        });
    }

    let latest_key = keys::catalog_sync_latest(catalog_id);
    let latest: Option<SyncLogEntry> = tx.get(&latest_key).await?;
    if latest.map_or(true, |l| l.timestamp <= entry.timestamp) {
        tx.put(&latest_key, entry).await?;
    }
    tx.list_append_unique(&keys::catalog_sync_logs_list(catalog_id), &ts)
        .await?;
    tx.commit().await?;

    info!(timestamp = %ts, "sync log appended");
    Ok(())
}

#[instrument(skip_all, fields(catalog_id = %catalog_id))]
pub async fn latest_sync_log(pool: &Pool, catalog_id: &str) -> StoreResult<Option<SyncLogEntry>> {
    let mut tx = KvTx::begin(pool).await?;
    let latest = tx.get(&keys::catalog_sync_latest(catalog_id)).await?;
    tx.commit().await?;
    Ok(latest)
}

#[instrument(skip_all, fields(catalog_id = %catalog_id))]
pub async fn list_sync_timestamps(pool: &Pool, catalog_id: &str) -> StoreResult<Vec<String>> {
    let mut tx = KvTx::begin(pool).await?;
    let list = tx.list(&keys::catalog_sync_logs_list(catalog_id)).await?;
    tx.commit().await?;
    Ok(list)
}

#[instrument(skip_all, fields(catalog_id = %catalog_id))]
pub async fn get_sync_log(
    pool: &Pool,
    catalog_id: &str,
    timestamp: &str,
) -> StoreResult<Option<SyncLogEntry>> {
    let mut tx = KvTx::begin(pool).await?;
    let entry = tx
        .get(&keys::catalog_sync_log(catalog_id, timestamp))
        .await?;
    tx.commit().await?;
    Ok(entry)
}

/// Up to `limit` entries, newest timestamp first. The first entry is the
/// one [`latest_sync_log`] returns.
#[instrument(skip_all, fields(catalog_id = %catalog_id))]
pub async fn sync_history(
    pool: &Pool,
    catalog_id: &str,
    limit: usize,
) -> StoreResult<Vec<SyncLogEntry>> {
    let mut tx = KvTx::begin(pool).await?;
    let timestamps = tx.list(&keys::catalog_sync_logs_list(catalog_id)).await?;
    let mut out: Vec<SyncLogEntry> = Vec::with_capacity(timestamps.len());
    for ts in &timestamps {
        if let Some(entry) = tx.get(&keys::catalog_sync_log(catalog_id, ts)).await? {
            out.push(entry);
        }
    }
    tx.commit().await?;
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out.truncate(limit);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::model::SyncStatus;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_704_067_200 + secs, 0).unwrap()
    }

    #[test]
    fn timestamp_segment_uses_zulu() {
        assert_eq!(sync_timestamp(&at(0)), "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn duplicate_timestamp_is_rejected() {
        let pool = memory_pool().await.unwrap();
        let entry = SyncLogEntry::new(SyncStatus::Success, at(0));
        append_sync_log(&pool, "c1", &entry).await.unwrap();

        let mut again = SyncLogEntry::new(SyncStatus::Failed, at(0));
        again.message = Some("retry".into());
        let err = append_sync_log(&pool, "c1", &again).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { kind: "sync log", .. }));

        let stored = get_sync_log(&pool, "c1", "2024-01-01T00:00:00Z")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, entry);
        assert_eq!(list_sync_timestamps(&pool, "c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn latest_only_moves_forward() {
        let pool = memory_pool().await.unwrap();
        let newer = SyncLogEntry::new(SyncStatus::Partial, at(60));
        let older = SyncLogEntry::new(SyncStatus::Failed, at(0));
        append_sync_log(&pool, "c1", &newer).await.unwrap();
        append_sync_log(&pool, "c1", &older).await.unwrap();

        assert_eq!(latest_sync_log(&pool, "c1").await.unwrap(), Some(newer.clone()));
        assert_eq!(
            list_sync_timestamps(&pool, "c1").await.unwrap(),
            vec!["2024-01-01T00:01:00Z", "2024-01-01T00:00:00Z"]
        );

        let history = sync_history(&pool, "c1", 1).await.unwrap();
        assert_eq!(history, vec![newer.clone()]);
        assert_eq!(
            sync_history(&pool, "c1", 10).await.unwrap(),
            vec![newer, older]
        );
        assert!(latest_sync_log(&pool, "c2").await.unwrap().is_none());
    }
}
