//! Per-site catalog assignment.
//!
//! A site points at exactly one catalog, hides some categories and may
//! override gift prices. The whole configuration is one record under
//! `sites:{site}:catalog_config`; writes replace it wholesale.

use crate::catalog::{catalog_gifts_in, load_catalog};
use crate::db::{KvTx, Pool, Versioned};
use crate::error::{StoreError, StoreResult};
use crate::keys;
use crate::model::{SiteCatalogConfig, SiteGift};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteConfigLookup {
    /// The caller passed a blank site id.
    NoSiteSelected,
    NotConfigured,
    Configured(Versioned<SiteCatalogConfig>),
}

impl SiteConfigLookup {
    pub fn into_config(self) -> Option<SiteCatalogConfig> {
        match self {
            SiteConfigLookup::Configured(v) => Some(v.value),
            _ => None,
        }
    }
}

fn no_site_selected() -> StoreError {
    StoreError::Invalid("no site selected".into())
}

async fn lookup_in(tx: &mut KvTx, site_id: &str) -> StoreResult<SiteConfigLookup> {
    if site_id.trim().is_empty() {
        return Ok(SiteConfigLookup::NoSiteSelected);
    }
    let key = keys::site_catalog_config(site_id);
    Ok(match tx.get_versioned(&key).await? {
        Some(v) => SiteConfigLookup::Configured(v),
        None => SiteConfigLookup::NotConfigured,
    })
}

#[instrument(skip_all, fields(site_id = %site_id))]
pub async fn get_config(pool: &Pool, site_id: &str) -> StoreResult<SiteConfigLookup> {
    let mut tx = KvTx::begin(pool).await?;
    let lookup = lookup_in(&mut tx, site_id).await?;
    tx.commit().await?;
    Ok(lookup)
}

/// Replace a site's configuration.
///
/// With `expected_version = None` the write is last-write-wins. With
/// `Some(v)` it only succeeds if the stored record is at version `v`
/// (`Some(0)`: no record yet), otherwise `VersionConflict` is returned and
/// nothing is written.
#[instrument(skip_all, fields(site_id = %site_id, catalog_id = %catalog_id))]
pub async fn set_config(
    pool: &Pool,
    site_id: &str,
    catalog_id: &str,
    exclusions: Vec<String>,
    overrides: BTreeMap<String, Decimal>,
    expected_version: Option<u64>,
) -> StoreResult<Versioned<SiteCatalogConfig>> {
    if site_id.trim().is_empty() {
        return Err(no_site_selected());
    }
    if let Some((gift_id, _)) = overrides.iter().find(|(_, price)| price.is_sign_negative()) {
        return Err(StoreError::Invalid(format!(
            "price override for gift {gift_id} must not be negative"
        )));
    }
    let mut seen = Vec::with_capacity(exclusions.len());
    for category in exclusions {
        let category = category.trim().to_string();
        if !category.is_empty() && !seen.iter().any(|c: &String| c.eq_ignore_ascii_case(&category))
        {
            seen.push(category);
        }
    }

    let mut tx = KvTx::begin(pool).await?;
    load_catalog(&mut tx, catalog_id).await?;

    let config = SiteCatalogConfig {
        site_id: site_id.to_string(),
        catalog_id: catalog_id.to_string(),
        exclusions: seen,
        overrides,
        updated_at: Utc::now(),
    };
    let key = keys::site_catalog_config(site_id);
    let version = match expected_version {
        Some(expected) => match tx.put_versioned(&key, &config, expected).await {
            Ok(v) => v,
            Err(err) => {
                if let StoreError::VersionConflict { actual, .. } = &err {
                    warn!(expected, actual, "site catalog config changed concurrently");
                }
                return Err(err);
            }
        },
        None => tx.put(&key, &config).await?,
    };
    tx.commit().await?;

    info!(version, exclusions = config.exclusions.len(), "site catalog config saved");
    Ok(Versioned {
        value: config,
        version,
    })
}

/// Remove a site's configuration. Returns whether one existed.
#[instrument(skip_all, fields(site_id = %site_id))]
pub async fn clear_config(pool: &Pool, site_id: &str) -> StoreResult<bool> {
    if site_id.trim().is_empty() {
        return Err(no_site_selected());
    }
    let mut tx = KvTx::begin(pool).await?;
    let removed = tx.delete(&keys::site_catalog_config(site_id)).await?;
    tx.commit().await?;
    if removed {
        info!("site catalog config cleared");
    }
    Ok(removed)
}

/// Gifts visible on a site: the assigned catalog's gifts minus excluded
/// categories, priced with the site's overrides.
#[instrument(skip_all, fields(site_id = %site_id))]
pub async fn list_site_gifts(pool: &Pool, site_id: &str) -> StoreResult<Vec<SiteGift>> {
    let mut tx = KvTx::begin(pool).await?;
    let config = match lookup_in(&mut tx, site_id).await? {
        SiteConfigLookup::NoSiteSelected => return Err(no_site_selected()),
        SiteConfigLookup::NotConfigured => {
            return Err(StoreError::NotFound {
                kind: "site catalog config",
                id: site_id.to_string(),
            })
        }
        SiteConfigLookup::Configured(v) => v.value,
    };
    load_catalog(&mut tx, &config.catalog_id).await?;
    let gifts = catalog_gifts_in(&mut tx, &config.catalog_id).await?;
    tx.commit().await?;

    Ok(gifts
        .into_iter()
        .filter(|g| !g.category.as_deref().is_some_and(|c| config.is_excluded(c)))
        .map(|gift| SiteGift {
            price: config.effective_price(&gift),
            overridden: config.overrides.contains_key(&gift.id),
            gift,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{create_catalog, delete_catalog};
    use crate::db::memory_pool;
    use crate::model::{CatalogStatus, CatalogType, NewCatalog};

    async fn pool_with_catalog(id: &str) -> Pool {
        let pool = memory_pool().await.unwrap();
        create_catalog(
            &pool,
            &NewCatalog {
                id: id.into(),
                name: None,
                catalog_type: CatalogType::Manual,
                status: CatalogStatus::Active,
                owner_id: None,
            },
        )
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn blank_site_is_no_site_selected() {
        let pool = memory_pool().await.unwrap();
        assert_eq!(
            get_config(&pool, "  ").await.unwrap(),
            SiteConfigLookup::NoSiteSelected
        );
        assert_eq!(
            get_config(&pool, "site-1").await.unwrap(),
            SiteConfigLookup::NotConfigured
        );
        let err = set_config(&pool, "", "c1", vec![], BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn unknown_catalog_is_rejected() {
        let pool = memory_pool().await.unwrap();
        let err = set_config(&pool, "site-1", "missing", vec![], BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "catalog", .. }));
    }

    #[tokio::test]
    async fn set_replaces_previous_config() {
        let pool = pool_with_catalog("c1").await;
        let mut overrides = BTreeMap::new();
        overrides.insert("g1".to_string(), Decimal::new(999, 2));
        set_config(&pool, "site-1", "c1", vec!["toys".into()], overrides, None)
            .await
            .unwrap();
        let saved = set_config(
            &pool,
            "site-1",
            "c1",
            vec!["food".into(), "Food".into(), " ".into()],
            BTreeMap::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(saved.version, 2);

        let config = get_config(&pool, "site-1").await.unwrap().into_config().unwrap();
        assert_eq!(config.exclusions, vec!["food"]);
        assert!(config.overrides.is_empty());
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let pool = pool_with_catalog("c1").await;
        let first = set_config(&pool, "site-1", "c1", vec![], BTreeMap::new(), Some(0))
            .await
            .unwrap();
        assert_eq!(first.version, 1);

        set_config(&pool, "site-1", "c1", vec!["a".into()], BTreeMap::new(), Some(1))
            .await
            .unwrap();
        let err = set_config(&pool, "site-1", "c1", vec!["b".into()], BTreeMap::new(), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        let config = get_config(&pool, "site-1").await.unwrap().into_config().unwrap();
        assert_eq!(config.exclusions, vec!["a"]);
    }

    #[tokio::test]
    async fn negative_override_is_rejected() {
        let pool = pool_with_catalog("c1").await;
        let mut overrides = BTreeMap::new();
        overrides.insert("g1".to_string(), Decimal::new(-1, 0));
        let err = set_config(&pool, "site-1", "c1", vec![], overrides, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn clear_removes_config() {
        let pool = pool_with_catalog("c1").await;
        set_config(&pool, "site-1", "c1", vec![], BTreeMap::new(), None)
            .await
            .unwrap();
        assert!(clear_config(&pool, "site-1").await.unwrap());
        assert!(!clear_config(&pool, "site-1").await.unwrap());
        assert_eq!(
            get_config(&pool, "site-1").await.unwrap(),
            SiteConfigLookup::NotConfigured
        );
    }

    #[tokio::test]
    async fn site_gifts_fail_once_catalog_is_gone() {
        let pool = pool_with_catalog("c1").await;
        set_config(&pool, "site-1", "c1", vec![], BTreeMap::new(), None)
            .await
            .unwrap();
        assert!(list_site_gifts(&pool, "site-1").await.unwrap().is_empty());

        delete_catalog(&pool, "c1").await.unwrap();
        let err = list_site_gifts(&pool, "site-1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "catalog", .. }));
        let err = list_site_gifts(&pool, "site-2").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound {
                kind: "site catalog config",
                ..
            }
        ));
    }
}
