use super::model::{KvRow, Versioned};
use super::Pool;
use crate::error::{StoreError, StoreResult};
use crate::keys::{KeyKind, StorageKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, Sqlite, Transaction};

/// Unit of work over `kv_store`.
///
/// A primary record and every index derived from it are written through the
/// same `KvTx`; nothing is visible to other callers until [`KvTx::commit`].
/// Dropping a `KvTx` without committing rolls every write back, so an early
/// `?` return leaves the store untouched.
pub struct KvTx {
    tx: Transaction<'static, Sqlite>,
}

impl KvTx {
    pub async fn begin(pool: &Pool) -> StoreResult<Self> {
        Ok(Self {
            tx: pool.begin().await?,
        })
    }

    pub async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn get_row(&mut self, key: &StorageKey) -> StoreResult<Option<KvRow>> {
        let encoded = key.encode();
        let row = sqlx::query("SELECT value, version FROM kv_store WHERE key = ?")
            .bind(&encoded)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|row| KvRow {
            key: encoded,
            value: row.get("value"),
            version: row.get::<i64, _>("version") as u64,
        }))
    }

    pub async fn get<T: DeserializeOwned>(&mut self, key: &StorageKey) -> StoreResult<Option<T>> {
        match self.get_row(key).await? {
            Some(row) => Ok(Some(serde_json::from_str(&row.value)?)),
            None => Ok(None),
        }
    }

    pub async fn get_versioned<T: DeserializeOwned>(
        &mut self,
        key: &StorageKey,
    ) -> StoreResult<Option<Versioned<T>>> {
        match self.get_row(key).await? {
            Some(row) => Ok(Some(Versioned {
                value: serde_json::from_str(&row.value)?,
                version: row.version,
            })),
            None => Ok(None),
        }
    }

    pub async fn exists(&mut self, key: &StorageKey) -> StoreResult<bool> {
        Ok(self.version_of(key).await? > 0)
    }

    /// Current version of `key`, 0 when absent.
    pub async fn version_of(&mut self, key: &StorageKey) -> StoreResult<u64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM kv_store WHERE key = ?")
            .bind(key.encode())
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(version.unwrap_or(0) as u64)
    }

    /// Insert or overwrite. Returns the new version.
    pub async fn put<T: Serialize>(&mut self, key: &StorageKey, value: &T) -> StoreResult<u64> {
        let body = serde_json::to_string(value)?;
        let version: i64 = sqlx::query_scalar(
            "INSERT INTO kv_store (key, value, version, updated_at) VALUES (?, ?, 1, CURRENT_TIMESTAMP) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, version = kv_store.version + 1, \
             updated_at = CURRENT_TIMESTAMP \
             RETURNING version",
        )
        .bind(key.encode())
        .bind(body)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(version as u64)
    }

    /// Insert only if `key` is absent. Returns `false` when a record already exists.
    pub async fn insert_new<T: Serialize>(
        &mut self,
        key: &StorageKey,
        value: &T,
    ) -> StoreResult<bool> {
        let body = serde_json::to_string(value)?;
        let res = sqlx::query(
            "INSERT INTO kv_store (key, value, version, updated_at) VALUES (?, ?, 1, CURRENT_TIMESTAMP) \
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(key.encode())
        .bind(body)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Compare-and-set write: succeeds only if the stored version equals
    /// `expected` (0 = must not exist). Returns the new version.
    pub async fn put_versioned<T: Serialize>(
        &mut self,
        key: &StorageKey,
        value: &T,
        expected: u64,
    ) -> StoreResult<u64> {
        if expected == 0 {
            if self.insert_new(key, value).await? {
                return Ok(1);
            }
            return Err(self.conflict(key, expected).await);
        }

        let body = serde_json::to_string(value)?;
        let version: Option<i64> = sqlx::query_scalar(
            "UPDATE kv_store SET value = ?, version = version + 1, updated_at = CURRENT_TIMESTAMP \
             WHERE key = ? AND version = ? RETURNING version",
        )
        .bind(body)
        .bind(key.encode())
        .bind(expected as i64)
        .fetch_optional(&mut *self.tx)
        .await?;
        match version {
            Some(v) => Ok(v as u64),
            None => Err(self.conflict(key, expected).await),
        }
    }

    async fn conflict(&mut self, key: &StorageKey, expected: u64) -> StoreError {
        match self.version_of(key).await {
            Ok(actual) => StoreError::VersionConflict {
                key: key.encode(),
                expected,
                actual,
            },
            Err(err) => err,
        }
    }

    /// Returns whether a record was removed.
    pub async fn delete(&mut self, key: &StorageKey) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key.encode())
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Id list stored under `key`; empty when absent.
    pub async fn list(&mut self, key: &StorageKey) -> StoreResult<Vec<String>> {
        Ok(self.get::<Vec<String>>(key).await?.unwrap_or_default())
    }

    /// Append `id` unless already present. Returns whether the list changed.
    pub async fn list_append_unique(&mut self, key: &StorageKey, id: &str) -> StoreResult<bool> {
        let mut ids = self.list(key).await?;
        if ids.iter().any(|existing| existing == id) {
            return Ok(false);
        }
        ids.push(id.to_string());
        self.put(key, &ids).await?;
        Ok(true)
    }

    /// Remove every occurrence of `id`. An emptied list is deleted.
    pub async fn list_remove(&mut self, key: &StorageKey, id: &str) -> StoreResult<bool> {
        let mut ids = self.list(key).await?;
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() == before {
            return Ok(false);
        }
        if ids.is_empty() {
            self.delete(key).await?;
        } else {
            self.put(key, &ids).await?;
        }
        Ok(true)
    }

    /// Every key of `kind`, ordered by encoded key. Rows under the same
    /// prefix that do not decode to `kind` are skipped.
    pub async fn scan_keys(&mut self, kind: KeyKind) -> StoreResult<Vec<StorageKey>> {
        let prefix = kind.prefix();
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT key FROM kv_store WHERE substr(key, 1, ?) = ? ORDER BY key",
        )
        .bind(prefix.len() as i64)
        .bind(prefix)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(keys
            .iter()
            .filter_map(|raw| StorageKey::decode(raw))
            .filter(|key| key.kind() == kind)
            .collect())
    }

    /// Every record of `kind` decoded as `T`, ordered by encoded key.
    pub async fn scan<T: DeserializeOwned>(
        &mut self,
        kind: KeyKind,
    ) -> StoreResult<Vec<(StorageKey, T)>> {
        let prefix = kind.prefix();
        let rows = sqlx::query(
            "SELECT key, value FROM kv_store WHERE substr(key, 1, ?) = ? ORDER BY key",
        )
        .bind(prefix.len() as i64)
        .bind(prefix)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("key");
            let Some(key) = StorageKey::decode(&raw).filter(|k| k.kind() == kind) else {
                continue;
            };
            let value: String = row.get("value");
            out.push((key, serde_json::from_str(&value)?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::keys;

    #[tokio::test]
    async fn put_bumps_version() {
        let pool = memory_pool().await.unwrap();
        let key = keys::gift("g1");
        let mut tx = KvTx::begin(&pool).await.unwrap();
        assert_eq!(tx.version_of(&key).await.unwrap(), 0);
        assert_eq!(tx.put(&key, &"first").await.unwrap(), 1);
        assert_eq!(tx.put(&key, &"second").await.unwrap(), 2);
        let got: Versioned<String> = tx.get_versioned(&key).await.unwrap().unwrap();
        assert_eq!(got.value, "second");
        assert_eq!(got.version, 2);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn put_versioned_rejects_stale_writers() {
        let pool = memory_pool().await.unwrap();
        let key = keys::site_catalog_config("site-1");
        let mut tx = KvTx::begin(&pool).await.unwrap();
        assert_eq!(tx.put_versioned(&key, &"a", 0).await.unwrap(), 1);

        let err = tx.put_versioned(&key, &"b", 0).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 0, actual: 1, .. }));

        assert_eq!(tx.put_versioned(&key, &"b", 1).await.unwrap(), 2);
        let err = tx.put_versioned(&key, &"c", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2, .. }));
        assert_eq!(tx.get::<String>(&key).await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn dropped_tx_rolls_back() {
        let pool = memory_pool().await.unwrap();
        {
            let mut tx = KvTx::begin(&pool).await.unwrap();
            tx.put(&keys::gift("g1"), &"x").await.unwrap();
        }
        let mut tx = KvTx::begin(&pool).await.unwrap();
        assert!(!tx.exists(&keys::gift("g1")).await.unwrap());
    }

    #[tokio::test]
    async fn list_helpers_keep_ids_unique() {
        let pool = memory_pool().await.unwrap();
        let key = keys::catalog_gifts("c1");
        let mut tx = KvTx::begin(&pool).await.unwrap();
        assert!(tx.list_append_unique(&key, "g1").await.unwrap());
        assert!(!tx.list_append_unique(&key, "g1").await.unwrap());
        assert!(tx.list_append_unique(&key, "g2").await.unwrap());
        assert_eq!(tx.list(&key).await.unwrap(), vec!["g1", "g2"]);

        assert!(tx.list_remove(&key, "g1").await.unwrap());
        assert!(!tx.list_remove(&key, "g1").await.unwrap());
        assert!(tx.list_remove(&key, "g2").await.unwrap());
        assert!(!tx.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn scan_only_returns_requested_kind() {
        let pool = memory_pool().await.unwrap();
        let mut tx = KvTx::begin(&pool).await.unwrap();
        tx.put(&keys::catalog_sync_log("c1", "2024-01-01T00:00:00Z"), &1)
            .await
            .unwrap();
        tx.put(&keys::catalog_sync_logs_list("c1"), &2).await.unwrap();
        tx.put(&keys::catalog_sync_latest("c1"), &3).await.unwrap();

        let logs: Vec<(StorageKey, i32)> = tx.scan(KeyKind::CatalogSyncLog).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].1, 1);
        assert_eq!(
            tx.scan_keys(KeyKind::CatalogSyncLogsList).await.unwrap(),
            vec![keys::catalog_sync_logs_list("c1")]
        );
    }
}
