//! Storage key space.
//!
//! Every record lives under a colon-delimited string key. Keys are built as a
//! typed [`StorageKey`] and only turned into strings at the storage boundary by
//! [`StorageKey::encode`]. Identifier segments are percent-escaped (`%` and `:`
//! only), so an identifier containing the delimiter cannot alias another key.
//!
//! Layouts (ids shown in braces):
//!
//! | kind                   | key                                   |
//! |------------------------|---------------------------------------|
//! | catalog                | `catalogs:{catalog}`                  |
//! | catalogs_all           | `catalog_index:all`                   |
//! | catalogs_by_type       | `catalog_index:by_type:{type}`        |
//! | catalogs_by_status     | `catalog_index:by_status:{status}`    |
//! | catalogs_by_owner      | `catalog_index:by_owner:{owner}`      |
//! | gift                   | `gifts:{gift}`                        |
//! | catalog_gifts          | `catalog_gifts:{catalog}`             |
//! | gift_catalogs          | `gift_catalogs:{gift}`                |
//! | catalog_gift_link      | `catalog_gift_links:{catalog}:{gift}` |
//! | site_catalog_config    | `sites:{site}:catalog_config`         |
//! | catalog_sync_log       | `catalog_sync_logs:{catalog}:{ts}`    |
//! | catalog_sync_latest    | `catalog_sync_latest:{catalog}`       |
//! | catalog_sync_logs_list | `catalog_sync_logs_list:{catalog}`    |
//! | catalog_stats          | `catalog_stats:{catalog}`             |
//! | catalog_stats_expiry   | `catalog_stats_expiry:{catalog}`      |

use crate::model::{CatalogStatus, CatalogType};
use std::fmt;

const DELIMITER: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Catalog,
    CatalogsAll,
    CatalogsByType,
    CatalogsByStatus,
    CatalogsByOwner,
    Gift,
    CatalogGifts,
    GiftCatalogs,
    CatalogGiftLink,
    SiteCatalogConfig,
    CatalogSyncLog,
    CatalogSyncLatest,
    CatalogSyncLogsList,
    CatalogStats,
    CatalogStatsExpiry,
}

impl KeyKind {
    pub const ALL: [KeyKind; 15] = [
        KeyKind::Catalog,
        KeyKind::CatalogsAll,
        KeyKind::CatalogsByType,
        KeyKind::CatalogsByStatus,
        KeyKind::CatalogsByOwner,
        KeyKind::Gift,
        KeyKind::CatalogGifts,
        KeyKind::GiftCatalogs,
        KeyKind::CatalogGiftLink,
        KeyKind::SiteCatalogConfig,
        KeyKind::CatalogSyncLog,
        KeyKind::CatalogSyncLatest,
        KeyKind::CatalogSyncLogsList,
        KeyKind::CatalogStats,
        KeyKind::CatalogStatsExpiry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Catalog => "catalog",
            KeyKind::CatalogsAll => "catalogs_all",
            KeyKind::CatalogsByType => "catalogs_by_type",
            KeyKind::CatalogsByStatus => "catalogs_by_status",
            KeyKind::CatalogsByOwner => "catalogs_by_owner",
            KeyKind::Gift => "gift",
            KeyKind::CatalogGifts => "catalog_gifts",
            KeyKind::GiftCatalogs => "gift_catalogs",
            KeyKind::CatalogGiftLink => "catalog_gift_link",
            KeyKind::SiteCatalogConfig => "site_catalog_config",
            KeyKind::CatalogSyncLog => "catalog_sync_log",
            KeyKind::CatalogSyncLatest => "catalog_sync_latest",
            KeyKind::CatalogSyncLogsList => "catalog_sync_logs_list",
            KeyKind::CatalogStats => "catalog_stats",
            KeyKind::CatalogStatsExpiry => "catalog_stats_expiry",
        }
    }

    /// Literal head shared by every key of this kind, including the trailing
    /// delimiter when identifiers follow. Used for prefix scans.
    pub fn prefix(&self) -> &'static str {
        match self {
            KeyKind::Catalog => "catalogs:",
            KeyKind::CatalogsAll => "catalog_index:all",
            KeyKind::CatalogsByType => "catalog_index:by_type:",
            KeyKind::CatalogsByStatus => "catalog_index:by_status:",
            KeyKind::CatalogsByOwner => "catalog_index:by_owner:",
            KeyKind::Gift => "gifts:",
            KeyKind::CatalogGifts => "catalog_gifts:",
            KeyKind::GiftCatalogs => "gift_catalogs:",
            KeyKind::CatalogGiftLink => "catalog_gift_links:",
            KeyKind::SiteCatalogConfig => "sites:",
            KeyKind::CatalogSyncLog => "catalog_sync_logs:",
            KeyKind::CatalogSyncLatest => "catalog_sync_latest:",
            KeyKind::CatalogSyncLogsList => "catalog_sync_logs_list:",
            KeyKind::CatalogStats => "catalog_stats:",
            KeyKind::CatalogStatsExpiry => "catalog_stats_expiry:",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageKey {
    Catalog { catalog_id: String },
    CatalogsAll,
    CatalogsByType { catalog_type: CatalogType },
    CatalogsByStatus { status: CatalogStatus },
    CatalogsByOwner { owner_id: String },
    Gift { gift_id: String },
    CatalogGifts { catalog_id: String },
    GiftCatalogs { gift_id: String },
    CatalogGiftLink { catalog_id: String, gift_id: String },
    SiteCatalogConfig { site_id: String },
    CatalogSyncLog { catalog_id: String, timestamp: String },
    CatalogSyncLatest { catalog_id: String },
    CatalogSyncLogsList { catalog_id: String },
    CatalogStats { catalog_id: String },
    CatalogStatsExpiry { catalog_id: String },
}

impl StorageKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            StorageKey::Catalog { .. } => KeyKind::Catalog,
            StorageKey::CatalogsAll => KeyKind::CatalogsAll,
            StorageKey::CatalogsByType { .. } => KeyKind::CatalogsByType,
            StorageKey::CatalogsByStatus { .. } => KeyKind::CatalogsByStatus,
            StorageKey::CatalogsByOwner { .. } => KeyKind::CatalogsByOwner,
            StorageKey::Gift { .. } => KeyKind::Gift,
            StorageKey::CatalogGifts { .. } => KeyKind::CatalogGifts,
            StorageKey::GiftCatalogs { .. } => KeyKind::GiftCatalogs,
            StorageKey::CatalogGiftLink { .. } => KeyKind::CatalogGiftLink,
            StorageKey::SiteCatalogConfig { .. } => KeyKind::SiteCatalogConfig,
            StorageKey::CatalogSyncLog { .. } => KeyKind::CatalogSyncLog,
            StorageKey::CatalogSyncLatest { .. } => KeyKind::CatalogSyncLatest,
            StorageKey::CatalogSyncLogsList { .. } => KeyKind::CatalogSyncLogsList,
            StorageKey::CatalogStats { .. } => KeyKind::CatalogStats,
            StorageKey::CatalogStatsExpiry { .. } => KeyKind::CatalogStatsExpiry,
        }
    }

    /// Serialize to the string stored in the `key` column.
    pub fn encode(&self) -> String {
        let prefix = self.kind().prefix();
        match self {
            StorageKey::CatalogsAll => prefix.to_string(),
            StorageKey::CatalogsByType { catalog_type } => {
                format!("{prefix}{}", catalog_type.as_str())
            }
            StorageKey::CatalogsByStatus { status } => format!("{prefix}{}", status.as_str()),
            StorageKey::Catalog { catalog_id }
            | StorageKey::CatalogGifts { catalog_id }
            | StorageKey::CatalogSyncLatest { catalog_id }
            | StorageKey::CatalogSyncLogsList { catalog_id }
            | StorageKey::CatalogStats { catalog_id }
            | StorageKey::CatalogStatsExpiry { catalog_id } => {
                format!("{prefix}{}", escape(catalog_id))
            }
            StorageKey::CatalogsByOwner { owner_id } => format!("{prefix}{}", escape(owner_id)),
            StorageKey::Gift { gift_id } | StorageKey::GiftCatalogs { gift_id } => {
                format!("{prefix}{}", escape(gift_id))
            }
            StorageKey::CatalogGiftLink {
                catalog_id,
                gift_id,
            } => format!("{prefix}{}{DELIMITER}{}", escape(catalog_id), escape(gift_id)),
            StorageKey::SiteCatalogConfig { site_id } => {
                format!("{prefix}{}{DELIMITER}catalog_config", escape(site_id))
            }
            StorageKey::CatalogSyncLog {
                catalog_id,
                timestamp,
            } => format!("{prefix}{}{DELIMITER}{}", escape(catalog_id), escape(timestamp)),
        }
    }

    /// Parse a stored key back into its typed form. Returns `None` for keys
    /// outside this layer's key space.
    pub fn decode(raw: &str) -> Option<StorageKey> {
        let segments: Vec<&str> = raw.split(DELIMITER).collect();
        let key = match segments.as_slice() {
            ["catalogs", id] => StorageKey::Catalog {
                catalog_id: unescape(id)?,
            },
            ["catalog_index", "all"] => StorageKey::CatalogsAll,
            ["catalog_index", "by_type", t] => StorageKey::CatalogsByType {
                catalog_type: CatalogType::parse(t)?,
            },
            ["catalog_index", "by_status", s] => StorageKey::CatalogsByStatus {
                status: CatalogStatus::parse(s)?,
            },
            ["catalog_index", "by_owner", id] => StorageKey::CatalogsByOwner {
                owner_id: unescape(id)?,
            },
            ["gifts", id] => StorageKey::Gift {
                gift_id: unescape(id)?,
            },
            ["catalog_gifts", id] => StorageKey::CatalogGifts {
                catalog_id: unescape(id)?,
            },
            ["gift_catalogs", id] => StorageKey::GiftCatalogs {
                gift_id: unescape(id)?,
            },
            ["catalog_gift_links", catalog, gift] => StorageKey::CatalogGiftLink {
                catalog_id: unescape(catalog)?,
                gift_id: unescape(gift)?,
            },
            ["sites", site, "catalog_config"] => StorageKey::SiteCatalogConfig {
                site_id: unescape(site)?,
            },
            ["catalog_sync_logs", catalog, ts] => StorageKey::CatalogSyncLog {
                catalog_id: unescape(catalog)?,
                timestamp: unescape(ts)?,
            },
            ["catalog_sync_latest", id] => StorageKey::CatalogSyncLatest {
                catalog_id: unescape(id)?,
            },
            ["catalog_sync_logs_list", id] => StorageKey::CatalogSyncLogsList {
                catalog_id: unescape(id)?,
            },
            ["catalog_stats", id] => StorageKey::CatalogStats {
                catalog_id: unescape(id)?,
            },
            ["catalog_stats_expiry", id] => StorageKey::CatalogStatsExpiry {
                catalog_id: unescape(id)?,
            },
            _ => return None,
        };
        Some(key)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn escape(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for ch in id.chars() {
        match ch {
            '%' => out.push_str("%25"),
            DELIMITER => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(segment: &str) -> Option<String> {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        match code {
            "25" => out.push('%'),
            "3A" | "3a" => out.push(DELIMITER),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

pub fn catalog(catalog_id: &str) -> StorageKey {
    StorageKey::Catalog {
        catalog_id: catalog_id.to_string(),
    }
}

pub fn catalogs_all() -> StorageKey {
    StorageKey::CatalogsAll
}

pub fn catalogs_by_type(catalog_type: CatalogType) -> StorageKey {
    StorageKey::CatalogsByType { catalog_type }
}

pub fn catalogs_by_status(status: CatalogStatus) -> StorageKey {
    StorageKey::CatalogsByStatus { status }
}

pub fn catalogs_by_owner(owner_id: &str) -> StorageKey {
    StorageKey::CatalogsByOwner {
        owner_id: owner_id.to_string(),
    }
}

pub fn gift(gift_id: &str) -> StorageKey {
    StorageKey::Gift {
        gift_id: gift_id.to_string(),
    }
}

/// Gift ids linked into a catalog.
pub fn catalog_gifts(catalog_id: &str) -> StorageKey {
    StorageKey::CatalogGifts {
        catalog_id: catalog_id.to_string(),
    }
}

/// Catalog ids a gift is linked into (reverse of [`catalog_gifts`]).
pub fn gift_catalogs(gift_id: &str) -> StorageKey {
    StorageKey::GiftCatalogs {
        gift_id: gift_id.to_string(),
    }
}

pub fn catalog_gift_link(catalog_id: &str, gift_id: &str) -> StorageKey {
    StorageKey::CatalogGiftLink {
        catalog_id: catalog_id.to_string(),
        gift_id: gift_id.to_string(),
    }
}

pub fn site_catalog_config(site_id: &str) -> StorageKey {
    StorageKey::SiteCatalogConfig {
        site_id: site_id.to_string(),
    }
}

pub fn catalog_sync_log(catalog_id: &str, timestamp: &str) -> StorageKey {
    StorageKey::CatalogSyncLog {
        catalog_id: catalog_id.to_string(),
        timestamp: timestamp.to_string(),
    }
}

pub fn catalog_sync_latest(catalog_id: &str) -> StorageKey {
    StorageKey::CatalogSyncLatest {
        catalog_id: catalog_id.to_string(),
    }
}

pub fn catalog_sync_logs_list(catalog_id: &str) -> StorageKey {
    StorageKey::CatalogSyncLogsList {
        catalog_id: catalog_id.to_string(),
    }
}

pub fn catalog_stats(catalog_id: &str) -> StorageKey {
    StorageKey::CatalogStats {
        catalog_id: catalog_id.to_string(),
    }
}

pub fn catalog_stats_expiry(catalog_id: &str) -> StorageKey {
    StorageKey::CatalogStatsExpiry {
        catalog_id: catalog_id.to_string(),
    }
}
