//! Catalog records, gift membership and the derived catalog indexes.
//!
//! Every write opens one [`KvTx`] and updates the primary record together
//! with all indexes derived from it before committing. Index lists are
//! append-unique, so replaying a write never duplicates an id.

use crate::db::{KvTx, Pool};
use crate::error::{require_id, StoreError, StoreResult};
use crate::keys::{self, KeyKind, StorageKey};
use crate::model::{
    Catalog, CatalogFilter, CatalogPatch, CatalogStats, CatalogStatus, CatalogType, Gift,
    GiftLink, NewCatalog, Page, PageRequest, SiteCatalogConfig, StatsLookup,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{info, instrument, warn};

/// Index keys a catalog must appear in.
fn index_keys_for(catalog: &Catalog) -> Vec<StorageKey> {
    let mut out = vec![
        keys::catalogs_all(),
        keys::catalogs_by_type(catalog.catalog_type),
        keys::catalogs_by_status(catalog.status),
    ];
    if let Some(owner) = catalog.owner_id.as_deref().filter(|o| !o.is_empty()) {
        out.push(keys::catalogs_by_owner(owner));
    }
    out
}

pub(crate) async fn load_catalog(tx: &mut KvTx, catalog_id: &str) -> StoreResult<Catalog> {
    tx.get(&keys::catalog(catalog_id))
        .await?
        .ok_or_else(|| StoreError::NotFound {
            kind: "catalog",
            id: catalog_id.to_string(),
        })
}

#[instrument(skip_all, fields(catalog_id = %new.id))]
pub async fn create_catalog(pool: &Pool, new: &NewCatalog) -> StoreResult<Catalog> {
    require_id("catalog", &new.id)?;
    let now = Utc::now();
    let catalog = Catalog {
        id: new.id.clone(),
        name: new.name.clone(),
        catalog_type: new.catalog_type,
        status: new.status,
        owner_id: new.owner_id.clone().filter(|o| !o.trim().is_empty()),
        created_at: now,
        updated_at: now,
    };

    let mut tx = KvTx::begin(pool).await?;
    if !tx.insert_new(&keys::catalog(&catalog.id), &catalog).await? {
        return Err(StoreError::AlreadyExists {
            kind: "catalog",
            id: catalog.id,
        });
    }
    for index in index_keys_for(&catalog) {
        tx.list_append_unique(&index, &catalog.id).await?;
    }
    tx.commit().await?;

    info!(
        catalog_type = catalog.catalog_type.as_str(),
        status = catalog.status.as_str(),
        "catalog created"
    );
    Ok(catalog)
}

#[instrument(skip_all)]
pub async fn get_catalog(pool: &Pool, catalog_id: &str) -> StoreResult<Option<Catalog>> {
    let mut tx = KvTx::begin(pool).await?;
    let catalog = tx.get(&keys::catalog(catalog_id)).await?;
    tx.commit().await?;
    Ok(catalog)
}

#[instrument(skip_all, fields(catalog_id = %catalog_id))]
pub async fn update_catalog(
    pool: &Pool,
    catalog_id: &str,
    patch: &CatalogPatch,
) -> StoreResult<Catalog> {
    let mut tx = KvTx::begin(pool).await?;
    let mut catalog = load_catalog(&mut tx, catalog_id).await?;
    if patch.is_empty() {
        return Ok(catalog);
    }

    let before = index_keys_for(&catalog);
    if let Some(name) = &patch.name {
        catalog.name = Some(name.clone());
    }
    if let Some(t) = patch.catalog_type {
        catalog.catalog_type = t;
    }
    if let Some(s) = patch.status {
        catalog.status = s;
    }
    if let Some(owner) = &patch.owner_id {
        catalog.owner_id = Some(owner.clone()).filter(|o| !o.trim().is_empty());
    }
    catalog.updated_at = Utc::now();
    let after = index_keys_for(&catalog);

    tx.put(&keys::catalog(catalog_id), &catalog).await?;
    for stale in before.iter().filter(|k| !after.contains(k)) {
        tx.list_remove(stale, catalog_id).await?;
    }
    for fresh in after.iter().filter(|k| !before.contains(k)) {
        tx.list_append_unique(fresh, catalog_id).await?;
    }
    tx.commit().await?;

    info!(catalog_id, status = catalog.status.as_str(), "catalog updated");
    Ok(catalog)
}

/// Delete a catalog, its index entries, gift links and cached stats. Sync
/// logs are append-only and stay. Returns the number of gifts unlinked.
#[instrument(skip_all, fields(catalog_id = %catalog_id))]
pub async fn delete_catalog(pool: &Pool, catalog_id: &str) -> StoreResult<usize> {
    let mut tx = KvTx::begin(pool).await?;
    let catalog = load_catalog(&mut tx, catalog_id).await?;

    tx.delete(&keys::catalog(catalog_id)).await?;
    for index in index_keys_for(&catalog) {
        tx.list_remove(&index, catalog_id).await?;
    }

    let gift_ids = tx.list(&keys::catalog_gifts(catalog_id)).await?;
    for gift_id in &gift_ids {
        tx.delete(&keys::catalog_gift_link(catalog_id, gift_id))
            .await?;
        tx.list_remove(&keys::gift_catalogs(gift_id), catalog_id)
            .await?;
    }
    tx.delete(&keys::catalog_gifts(catalog_id)).await?;
    tx.delete(&keys::catalog_stats(catalog_id)).await?;
    tx.delete(&keys::catalog_stats_expiry(catalog_id)).await?;

    let referencing = sites_using_catalog(&mut tx, catalog_id).await?;
    tx.commit().await?;

    if !referencing.is_empty() {
        warn!(
            catalog_id,
            sites = ?referencing,
            "deleted catalog is still assigned to sites"
        );
    }
    info!(catalog_id, unlinked = gift_ids.len(), "catalog deleted");
    Ok(gift_ids.len())
}

async fn sites_using_catalog(tx: &mut KvTx, catalog_id: &str) -> StoreResult<Vec<String>> {
    let configs: Vec<(StorageKey, SiteCatalogConfig)> =
        tx.scan(KeyKind::SiteCatalogConfig).await?;
    Ok(configs
        .into_iter()
        .filter(|(_, cfg)| cfg.catalog_id == catalog_id)
        .map(|(_, cfg)| cfg.site_id)
        .collect())
}

/// List catalogs through the narrowest matching index, then apply the
/// remaining filter fields to the records.
#[instrument(skip_all)]
pub async fn list_catalogs(
    pool: &Pool,
    filter: &CatalogFilter,
    page: PageRequest,
) -> StoreResult<Page<Catalog>> {
    let index = if let Some(t) = filter.catalog_type {
        keys::catalogs_by_type(t)
    } else if let Some(s) = filter.status {
        keys::catalogs_by_status(s)
    } else if let Some(owner) = filter.owner_id.as_deref() {
        keys::catalogs_by_owner(owner)
    } else {
        keys::catalogs_all()
    };

    let mut tx = KvTx::begin(pool).await?;
    let ids = tx.list(&index).await?;
    let mut catalogs = Vec::with_capacity(ids.len());
    for id in ids {
        match tx.get::<Catalog>(&keys::catalog(&id)).await? {
            Some(catalog) if filter.matches(&catalog) => catalogs.push(catalog),
            Some(_) => {}
            None => warn!(index = %index, id = %id, "index references missing catalog"),
        }
    }
    tx.commit().await?;
    Ok(page.slice(catalogs))
}

#[instrument(skip_all, fields(gift_id = %gift.id))]
pub async fn put_gift(pool: &Pool, gift: &Gift) -> StoreResult<()> {
    require_id("gift", &gift.id)?;
    if let Some(field) = gift.reserved_extra_field() {
        return Err(StoreError::Invalid(format!(
            "gift extra field '{field}' clashes with a typed field"
        )));
    }
    let mut tx = KvTx::begin(pool).await?;
    tx.put(&keys::gift(&gift.id), gift).await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_gift(pool: &Pool, gift_id: &str) -> StoreResult<Option<Gift>> {
    let mut tx = KvTx::begin(pool).await?;
    let gift = tx.get(&keys::gift(gift_id)).await?;
    tx.commit().await?;
    Ok(gift)
}

/// Delete a gift and unlink it from every catalog. Returns whether it existed.
#[instrument(skip_all, fields(gift_id = %gift_id))]
pub async fn delete_gift(pool: &Pool, gift_id: &str) -> StoreResult<bool> {
    let mut tx = KvTx::begin(pool).await?;
    if !tx.delete(&keys::gift(gift_id)).await? {
        return Ok(false);
    }
    let catalog_ids = tx.list(&keys::gift_catalogs(gift_id)).await?;
    for catalog_id in &catalog_ids {
        tx.delete(&keys::catalog_gift_link(catalog_id, gift_id))
            .await?;
        tx.list_remove(&keys::catalog_gifts(catalog_id), gift_id)
            .await?;
    }
    tx.delete(&keys::gift_catalogs(gift_id)).await?;
    tx.commit().await?;
    info!(gift_id, catalogs = catalog_ids.len(), "gift deleted");
    Ok(true)
}

/// Link a gift into a catalog. Both sides of the membership index are written
/// in one transaction; linking an already linked pair returns the original
/// link unchanged.
#[instrument(skip_all, fields(catalog_id = %catalog_id, gift_id = %gift_id))]
pub async fn link_gift_to_catalog(
    pool: &Pool,
    catalog_id: &str,
    gift_id: &str,
) -> StoreResult<GiftLink> {
    let mut tx = KvTx::begin(pool).await?;
    load_catalog(&mut tx, catalog_id).await?;
    if !tx.exists(&keys::gift(gift_id)).await? {
        return Err(StoreError::NotFound {
            kind: "gift",
            id: gift_id.to_string(),
        });
    }

    let link_key = keys::catalog_gift_link(catalog_id, gift_id);
    let link = match tx.get::<GiftLink>(&link_key).await? {
        Some(existing) => existing,
        None => {
            let link = GiftLink {
                catalog_id: catalog_id.to_string(),
                gift_id: gift_id.to_string(),
                linked_at: Utc::now(),
            };
            tx.put(&link_key, &link).await?;
            link
        }
    };
    let added = tx
        .list_append_unique(&keys::catalog_gifts(catalog_id), gift_id)
        .await?;
    let added_reverse = tx
        .list_append_unique(&keys::gift_catalogs(gift_id), catalog_id)
        .await?;
    tx.commit().await?;

    if added || added_reverse {
        info!(catalog_id, gift_id, "gift linked");
    }
    Ok(link)
}

/// Returns whether a link existed.
#[instrument(skip_all, fields(catalog_id = %catalog_id, gift_id = %gift_id))]
pub async fn unlink_gift_from_catalog(
    pool: &Pool,
    catalog_id: &str,
    gift_id: &str,
) -> StoreResult<bool> {
    let mut tx = KvTx::begin(pool).await?;
    let removed = tx
        .delete(&keys::catalog_gift_link(catalog_id, gift_id))
        .await?;
    tx.list_remove(&keys::catalog_gifts(catalog_id), gift_id)
        .await?;
    tx.list_remove(&keys::gift_catalogs(gift_id), catalog_id)
        .await?;
    tx.commit().await?;
    Ok(removed)
}

pub(crate) async fn catalog_gifts_in(tx: &mut KvTx, catalog_id: &str) -> StoreResult<Vec<Gift>> {
    let ids = tx.list(&keys::catalog_gifts(catalog_id)).await?;
    let mut gifts = Vec::with_capacity(ids.len());
    for gift_id in ids {
        match tx.get::<Gift>(&keys::gift(&gift_id)).await? {
            Some(gift) => gifts.push(gift),
            None => warn!(catalog_id, gift_id = %gift_id, "catalog references missing gift"),
        }
    }
    Ok(gifts)
}

#[instrument(skip_all, fields(catalog_id = %catalog_id))]
pub async fn list_catalog_gifts(pool: &Pool, catalog_id: &str) -> StoreResult<Vec<Gift>> {
    let mut tx = KvTx::begin(pool).await?;
    load_catalog(&mut tx, catalog_id).await?;
    let gifts = catalog_gifts_in(&mut tx, catalog_id).await?;
    tx.commit().await?;
    Ok(gifts)
}

#[instrument(skip_all, fields(gift_id = %gift_id))]
pub async fn list_gift_catalogs(pool: &Pool, gift_id: &str) -> StoreResult<Vec<String>> {
    let mut tx = KvTx::begin(pool).await?;
    let ids = tx.list(&keys::gift_catalogs(gift_id)).await?;
    tx.commit().await?;
    Ok(ids)
}

/// Cached stats for a catalog. Never recomputes; a `Stale` result means the
/// caller should run [`refresh_catalog_stats`].
#[instrument(skip_all, fields(catalog_id = %catalog_id))]
pub async fn read_catalog_stats(
    pool: &Pool,
    catalog_id: &str,
    now: DateTime<Utc>,
) -> StoreResult<StatsLookup> {
    let mut tx = KvTx::begin(pool).await?;
    let stats: Option<CatalogStats> = tx.get(&keys::catalog_stats(catalog_id)).await?;
    let expiry: Option<DateTime<Utc>> = tx.get(&keys::catalog_stats_expiry(catalog_id)).await?;
    tx.commit().await?;

    Ok(match (stats, expiry) {
        (None, _) => StatsLookup::Missing,
        (Some(stats), Some(expiry)) if now < expiry => StatsLookup::Fresh(stats),
        (Some(stats), _) => StatsLookup::Stale(stats),
    })
}

/// Recompute stats from primary data and cache them for `ttl`.
#[instrument(skip_all, fields(catalog_id = %catalog_id))]
pub async fn refresh_catalog_stats(
    pool: &Pool,
    catalog_id: &str,
    ttl: Duration,
) -> StoreResult<CatalogStats> {
    if ttl <= Duration::zero() {
        return Err(StoreError::Invalid("stats ttl must be positive".into()));
    }
    let mut tx = KvTx::begin(pool).await?;
    load_catalog(&mut tx, catalog_id).await?;

    let gifts = catalog_gifts_in(&mut tx, catalog_id).await?;
    let mut categories: BTreeMap<String, u64> = BTreeMap::new();
    for category in gifts.iter().filter_map(|g| g.category.as_deref()) {
        *categories.entry(category.to_string()).or_default() += 1;
    }
    let assigned_sites = sites_using_catalog(&mut tx, catalog_id).await?.len() as u64;

    let computed_at = Utc::now();
    let stats = CatalogStats {
        catalog_id: catalog_id.to_string(),
        total_gifts: gifts.len() as u64,
        categories,
        assigned_sites,
        computed_at,
    };
    tx.put(&keys::catalog_stats(catalog_id), &stats).await?;
    tx.put(&keys::catalog_stats_expiry(catalog_id), &(computed_at + ttl))
        .await?;
    tx.commit().await?;

    info!(catalog_id, total_gifts = stats.total_gifts, "catalog stats refreshed");
    Ok(stats)
}

/// One id inside one index list.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub index: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    /// Entries pointing at a missing record, or at a record that no longer
    /// has the indexed attribute.
    pub dangling: Vec<IndexEntry>,
    /// Records absent from an index they belong to.
    pub missing: Vec<IndexEntry>,
    /// Sites whose configuration names a missing catalog.
    pub orphaned_site_configs: Vec<String>,
}

impl IndexReport {
    pub fn is_consistent(&self) -> bool {
        self.dangling.is_empty() && self.missing.is_empty() && self.orphaned_site_configs.is_empty()
    }
}

struct Primaries {
    catalogs: HashMap<String, Catalog>,
    gifts: HashSet<String>,
    links: Vec<GiftLink>,
}

async fn load_primaries(tx: &mut KvTx) -> StoreResult<Primaries> {
    let catalogs = tx
        .scan::<Catalog>(KeyKind::Catalog)
        .await?
        .into_iter()
        .map(|(_, c)| (c.id.clone(), c))
        .collect();
    let gifts = tx
        .scan_keys(KeyKind::Gift)
        .await?
        .into_iter()
        .filter_map(|key| match key {
            StorageKey::Gift { gift_id } => Some(gift_id),
            _ => None,
        })
        .collect();
    let links = tx
        .scan::<GiftLink>(KeyKind::CatalogGiftLink)
        .await?
        .into_iter()
        .map(|(_, link)| link)
        .collect();
    Ok(Primaries {
        catalogs,
        gifts,
        links,
    })
}

fn belongs(catalog: &Catalog, index: &StorageKey) -> bool {
    match index {
        StorageKey::CatalogsAll => true,
        StorageKey::CatalogsByType { catalog_type } => catalog.catalog_type == *catalog_type,
        StorageKey::CatalogsByStatus { status } => catalog.status == *status,
        StorageKey::CatalogsByOwner { owner_id } => {
            catalog.owner_id.as_deref() == Some(owner_id.as_str())
        }
        _ => false,
    }
}

/// Every catalog index key currently stored or implied by a primary record.
async fn catalog_index_keys(tx: &mut KvTx, primaries: &Primaries) -> StoreResult<Vec<StorageKey>> {
    let mut out = vec![keys::catalogs_all()];
    out.extend(CatalogType::ALL.into_iter().map(keys::catalogs_by_type));
    out.extend(CatalogStatus::ALL.into_iter().map(keys::catalogs_by_status));
    let mut owners: BTreeSet<String> = tx
        .scan_keys(KeyKind::CatalogsByOwner)
        .await?
        .into_iter()
        .filter_map(|key| match key {
            StorageKey::CatalogsByOwner { owner_id } => Some(owner_id),
            _ => None,
        })
        .collect();
    owners.extend(
        primaries
            .catalogs
            .values()
            .filter_map(|c| c.owner_id.clone()),
    );
    out.extend(owners.iter().map(|owner| keys::catalogs_by_owner(owner)));
    Ok(out)
}

async fn audit_in(tx: &mut KvTx, primaries: &Primaries) -> StoreResult<IndexReport> {
    let mut report = IndexReport::default();

    for index in catalog_index_keys(tx, primaries).await? {
        let ids = tx.list(&index).await?;
        for id in &ids {
            let valid = primaries
                .catalogs
                .get(id)
                .is_some_and(|c| belongs(c, &index));
            if !valid {
                report.dangling.push(IndexEntry {
                    index: index.encode(),
                    id: id.clone(),
                });
            }
        }
        let mut expected: Vec<&Catalog> = primaries
            .catalogs
            .values()
            .filter(|c| belongs(c, &index) && !ids.contains(&c.id))
            .collect();
        expected.sort_by(|a, b| a.id.cmp(&b.id));
        report.missing.extend(expected.into_iter().map(|c| IndexEntry {
            index: index.encode(),
            id: c.id.clone(),
        }));
    }

    let linked: HashSet<(&str, &str)> = primaries
        .links
        .iter()
        .map(|l| (l.catalog_id.as_str(), l.gift_id.as_str()))
        .collect();
    for key in tx.scan_keys(KeyKind::CatalogGifts).await? {
        let StorageKey::CatalogGifts { catalog_id } = &key else {
            continue;
        };
        for gift_id in tx.list(&key).await? {
            if !linked.contains(&(catalog_id.as_str(), gift_id.as_str())) {
                report.dangling.push(IndexEntry {
                    index: key.encode(),
                    id: gift_id,
                });
            }
        }
    }
    for key in tx.scan_keys(KeyKind::GiftCatalogs).await? {
        let StorageKey::GiftCatalogs { gift_id } = &key else {
            continue;
        };
        for catalog_id in tx.list(&key).await? {
            if !linked.contains(&(catalog_id.as_str(), gift_id.as_str())) {
                report.dangling.push(IndexEntry {
                    index: key.encode(),
                    id: catalog_id,
                });
            }
        }
    }
    for link in &primaries.links {
        let forward = keys::catalog_gifts(&link.catalog_id);
        if !tx.list(&forward).await?.contains(&link.gift_id) {
            report.missing.push(IndexEntry {
                index: forward.encode(),
                id: link.gift_id.clone(),
            });
        }
        let reverse = keys::gift_catalogs(&link.gift_id);
        if !tx.list(&reverse).await?.contains(&link.catalog_id) {
            report.missing.push(IndexEntry {
                index: reverse.encode(),
                id: link.catalog_id.clone(),
            });
        }
    }
    for link in &primaries.links {
        if !primaries.catalogs.contains_key(&link.catalog_id)
            || !primaries.gifts.contains(&link.gift_id)
        {
            report.dangling.push(IndexEntry {
                index: keys::catalog_gift_link(&link.catalog_id, &link.gift_id).encode(),
                id: link.gift_id.clone(),
            });
        }
    }

    let configs: Vec<(StorageKey, SiteCatalogConfig)> =
        tx.scan(KeyKind::SiteCatalogConfig).await?;
    report.orphaned_site_configs = configs
        .into_iter()
        .filter(|(_, cfg)| !primaries.catalogs.contains_key(&cfg.catalog_id))
        .map(|(_, cfg)| cfg.site_id)
        .collect();

    Ok(report)
}

/// Check every derived index against the primary records.
#[instrument(skip_all)]
pub async fn audit_indexes(pool: &Pool) -> StoreResult<IndexReport> {
    let mut tx = KvTx::begin(pool).await?;
    let primaries = load_primaries(&mut tx).await?;
    let report = audit_in(&mut tx, &primaries).await?;
    tx.commit().await?;
    if !report.is_consistent() {
        warn!(
            dangling = report.dangling.len(),
            missing = report.missing.len(),
            orphaned = report.orphaned_site_configs.len(),
            "index audit found inconsistencies"
        );
    }
    Ok(report)
}

/// Recompute every catalog and membership index from primary records in one
/// transaction. Links to a missing catalog or gift are dropped. Returns the
/// audit taken before the rebuild. Site configurations are not touched.
#[instrument(skip_all)]
pub async fn rebuild_indexes(pool: &Pool) -> StoreResult<IndexReport> {
    let mut tx = KvTx::begin(pool).await?;
    let primaries = load_primaries(&mut tx).await?;
    let report = audit_in(&mut tx, &primaries).await?;

    let mut ordered: Vec<&Catalog> = primaries.catalogs.values().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    for index in catalog_index_keys(&mut tx, &primaries).await? {
        let ids: Vec<&str> = ordered
            .iter()
            .filter(|c| belongs(c, &index))
            .map(|c| c.id.as_str())
            .collect();
        if ids.is_empty() {
            tx.delete(&index).await?;
        } else {
            tx.put(&index, &ids).await?;
        }
    }

    for key in tx.scan_keys(KeyKind::CatalogGifts).await? {
        tx.delete(&key).await?;
    }
    for key in tx.scan_keys(KeyKind::GiftCatalogs).await? {
        tx.delete(&key).await?;
    }
    let mut links: Vec<&GiftLink> = primaries.links.iter().collect();
    links.sort_by(|a, b| a.linked_at.cmp(&b.linked_at));
    for link in links {
        if !primaries.catalogs.contains_key(&link.catalog_id)
            || !primaries.gifts.contains(&link.gift_id)
        {
            tx.delete(&keys::catalog_gift_link(&link.catalog_id, &link.gift_id))
                .await?;
            continue;
        }
        tx.list_append_unique(&keys::catalog_gifts(&link.catalog_id), &link.gift_id)
            .await?;
        tx.list_append_unique(&keys::gift_catalogs(&link.gift_id), &link.catalog_id)
            .await?;
    }
    tx.commit().await?;

    info!(
        catalogs = primaries.catalogs.len(),
        links = primaries.links.len(),
        repaired = report.dangling.len() + report.missing.len(),
        "indexes rebuilt"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use serde_json::Map;

    fn new_catalog(id: &str, t: CatalogType, owner: Option<&str>) -> NewCatalog {
        NewCatalog {
            id: id.into(),
            name: Some(format!("Catalog {id}")),
            catalog_type: t,
            status: CatalogStatus::Active,
            owner_id: owner.map(str::to_string),
        }
    }

    fn gift(id: &str, category: Option<&str>) -> Gift {
        Gift {
            id: id.into(),
            name: Some(id.to_uppercase()),
            category: category.map(str::to_string),
            price: None,
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_blank_ids() {
        let pool = memory_pool().await.unwrap();
        create_catalog(&pool, &new_catalog("c1", CatalogType::Erp, None))
            .await
            .unwrap();
        let err = create_catalog(&pool, &new_catalog("c1", CatalogType::Vendor, None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { kind: "catalog", .. }));

        let err = create_catalog(&pool, &new_catalog("  ", CatalogType::Erp, None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        let all = list_catalogs(&pool, &CatalogFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(all.total, 1);
        assert_eq!(all.items[0].catalog_type, CatalogType::Erp);
    }

    #[tokio::test]
    async fn update_moves_catalog_between_indexes() {
        let pool = memory_pool().await.unwrap();
        create_catalog(&pool, &new_catalog("c1", CatalogType::Erp, Some("client-1")))
            .await
            .unwrap();
        let patch = CatalogPatch {
            status: Some(CatalogStatus::Syncing),
            owner_id: Some("client-2".into()),
            ..Default::default()
        };
        let updated = update_catalog(&pool, "c1", &patch).await.unwrap();
        assert_eq!(updated.status, CatalogStatus::Syncing);

        let by_old_status = CatalogFilter {
            status: Some(CatalogStatus::Active),
            ..Default::default()
        };
        let page = list_catalogs(&pool, &by_old_status, PageRequest::default())
            .await
            .unwrap();
        assert!(page.items.is_empty());

        let by_owner = CatalogFilter {
            owner_id: Some("client-2".into()),
            ..Default::default()
        };
        let page = list_catalogs(&pool, &by_owner, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);

        assert!(audit_indexes(&pool).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn delete_catalog_clears_links_and_indexes() {
        let pool = memory_pool().await.unwrap();
        create_catalog(&pool, &new_catalog("c1", CatalogType::Manual, Some("o")))
            .await
            .unwrap();
        create_catalog(&pool, &new_catalog("c2", CatalogType::Manual, None))
            .await
            .unwrap();
        put_gift(&pool, &gift("g1", None)).await.unwrap();
        link_gift_to_catalog(&pool, "c1", "g1").await.unwrap();
        link_gift_to_catalog(&pool, "c2", "g1").await.unwrap();

        assert_eq!(delete_catalog(&pool, "c1").await.unwrap(), 1);
        assert!(get_catalog(&pool, "c1").await.unwrap().is_none());
        assert_eq!(list_gift_catalogs(&pool, "g1").await.unwrap(), vec!["c2"]);
        assert!(audit_indexes(&pool).await.unwrap().is_consistent());

        let err = delete_catalog(&pool, "c1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "catalog", .. }));
    }

    #[tokio::test]
    async fn gift_extra_cannot_shadow_typed_fields() {
        let pool = memory_pool().await.unwrap();
        create_catalog(&pool, &new_catalog("c1", CatalogType::Manual, None))
            .await
            .unwrap();
        let mut bad = gift("g1", Some("kitchen"));
        bad.extra.insert("name".into(), serde_json::json!("dup"));
        let err = put_gift(&pool, &bad).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(get_gift(&pool, "g1").await.unwrap().is_none());

        let mut good = gift("g1", Some("kitchen"));
        good.extra.insert("sku".into(), serde_json::json!("MUG-1"));
        put_gift(&pool, &good).await.unwrap();
        link_gift_to_catalog(&pool, "c1", "g1").await.unwrap();
        assert_eq!(get_gift(&pool, "g1").await.unwrap(), Some(good.clone()));
        assert_eq!(list_catalog_gifts(&pool, "c1").await.unwrap(), vec![good]);
    }

    #[tokio::test]
    async fn link_requires_both_records() {
        let pool = memory_pool().await.unwrap();
        create_catalog(&pool, &new_catalog("c1", CatalogType::Erp, None))
            .await
            .unwrap();
        let err = link_gift_to_catalog(&pool, "c1", "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "gift", .. }));
        let err = link_gift_to_catalog(&pool, "nope", "g1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "catalog", .. }));
    }

    #[tokio::test]
    async fn delete_gift_unlinks_everywhere() {
        let pool = memory_pool().await.unwrap();
        create_catalog(&pool, &new_catalog("c1", CatalogType::Erp, None))
            .await
            .unwrap();
        put_gift(&pool, &gift("g1", None)).await.unwrap();
        put_gift(&pool, &gift("g2", None)).await.unwrap();
        link_gift_to_catalog(&pool, "c1", "g1").await.unwrap();
        link_gift_to_catalog(&pool, "c1", "g2").await.unwrap();

        assert!(delete_gift(&pool, "g1").await.unwrap());
        assert!(!delete_gift(&pool, "g1").await.unwrap());
        let gifts = list_catalog_gifts(&pool, "c1").await.unwrap();
        assert_eq!(gifts.len(), 1);
        assert_eq!(gifts[0].id, "g2");
        assert!(audit_indexes(&pool).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn stats_are_fresh_until_expiry() {
        let pool = memory_pool().await.unwrap();
        create_catalog(&pool, &new_catalog("c1", CatalogType::Vendor, None))
            .await
            .unwrap();
        let now = Utc::now();
        assert_eq!(
            read_catalog_stats(&pool, "c1", now).await.unwrap(),
            StatsLookup::Missing
        );

        put_gift(&pool, &gift("g1", Some("electronics"))).await.unwrap();
        put_gift(&pool, &gift("g2", Some("electronics"))).await.unwrap();
        put_gift(&pool, &gift("g3", None)).await.unwrap();
        for g in ["g1", "g2", "g3"] {
            link_gift_to_catalog(&pool, "c1", g).await.unwrap();
        }
        let stats = refresh_catalog_stats(&pool, "c1", Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(stats.total_gifts, 3);
        assert_eq!(stats.categories.get("electronics"), Some(&2));

        let soon = stats.computed_at + Duration::seconds(30);
        assert_eq!(
            read_catalog_stats(&pool, "c1", soon).await.unwrap(),
            StatsLookup::Fresh(stats.clone())
        );
        let later = stats.computed_at + Duration::seconds(61);
        assert_eq!(
            read_catalog_stats(&pool, "c1", later).await.unwrap(),
            StatsLookup::Stale(stats)
        );

        let err = refresh_catalog_stats(&pool, "c1", Duration::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn rebuild_repairs_hand_edited_indexes() {
        let pool = memory_pool().await.unwrap();
        create_catalog(&pool, &new_catalog("c1", CatalogType::Erp, None))
            .await
            .unwrap();
        create_catalog(&pool, &new_catalog("c2", CatalogType::Dropship, None))
            .await
            .unwrap();
        put_gift(&pool, &gift("g1", None)).await.unwrap();
        link_gift_to_catalog(&pool, "c1", "g1").await.unwrap();

        // Simulate writers that bypassed the store.
        {
            let mut tx = KvTx::begin(&pool).await.unwrap();
            tx.put(&keys::catalogs_all(), &vec!["c1", "ghost"]).await.unwrap();
            tx.delete(&keys::gift_catalogs("g1")).await.unwrap();
            tx.list_append_unique(&keys::catalogs_by_type(CatalogType::Erp), "c2")
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        let report = audit_indexes(&pool).await.unwrap();
        let dangling: Vec<&str> = report.dangling.iter().map(|e| e.id.as_str()).collect();
        assert!(dangling.contains(&"ghost"));
        assert!(dangling.contains(&"c2"));
        assert!(report
            .missing
            .iter()
            .any(|e| e.id == "c2" && e.index == keys::catalogs_all().encode()));
        assert!(report
            .missing
            .iter()
            .any(|e| e.id == "c1" && e.index == keys::gift_catalogs("g1").encode()));

        let before = rebuild_indexes(&pool).await.unwrap();
        assert_eq!(before, report);
        assert!(audit_indexes(&pool).await.unwrap().is_consistent());
        assert_eq!(list_gift_catalogs(&pool, "g1").await.unwrap(), vec!["c1"]);
        let all = list_catalogs(&pool, &CatalogFilter::default(), PageRequest::default())
            .await
            .unwrap();
        let ids: Vec<&str> = all.items.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }
}
