use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CatalogType {
    Erp,
    Vendor,
    Manual,
    Dropship,
}

impl CatalogType {
    pub const ALL: [CatalogType; 4] = [
        CatalogType::Erp,
        CatalogType::Vendor,
        CatalogType::Manual,
        CatalogType::Dropship,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogType::Erp => "erp",
            CatalogType::Vendor => "vendor",
            CatalogType::Manual => "manual",
            CatalogType::Dropship => "dropship",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl FromStr for CatalogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(&s.to_ascii_lowercase()).ok_or_else(|| format!("unknown catalog type '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CatalogStatus {
    Active,
    Inactive,
    Syncing,
    Error,
}

impl CatalogStatus {
    pub const ALL: [CatalogStatus; 4] = [
        CatalogStatus::Active,
        CatalogStatus::Inactive,
        CatalogStatus::Syncing,
        CatalogStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogStatus::Active => "active",
            CatalogStatus::Inactive => "inactive",
            CatalogStatus::Syncing => "syncing",
            CatalogStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl FromStr for CatalogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(&s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown catalog status '{s}'"))
    }
}

/// A named collection of gifts owned (weakly) by a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub catalog_type: CatalogType,
    pub status: CatalogStatus,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for `create_catalog`; timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCatalog {
    pub id: String,
    pub name: Option<String>,
    pub catalog_type: CatalogType,
    pub status: CatalogStatus,
    pub owner_id: Option<String>,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogPatch {
    pub name: Option<String>,
    pub catalog_type: Option<CatalogType>,
    pub status: Option<CatalogStatus>,
    pub owner_id: Option<String>,
}

impl CatalogPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.catalog_type.is_none()
            && self.status.is_none()
            && self.owner_id.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    pub catalog_type: Option<CatalogType>,
    pub status: Option<CatalogStatus>,
    pub owner_id: Option<String>,
}

impl CatalogFilter {
    pub fn matches(&self, catalog: &Catalog) -> bool {
        self.catalog_type.map_or(true, |t| catalog.catalog_type == t)
            && self.status.map_or(true, |s| catalog.status == s)
            && self
                .owner_id
                .as_deref()
                .map_or(true, |o| catalog.owner_id.as_deref() == Some(o))
    }
}

/// A gift/product record. Fields the layer does not interpret are kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Gift {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Gift {
    /// Wire names of the typed fields; `extra` must not reuse them.
    pub const RESERVED_FIELDS: [&'static str; 4] = ["id", "name", "category", "price"];

    pub fn is_reserved_field(name: &str) -> bool {
        Self::RESERVED_FIELDS.contains(&name)
    }

    /// First key in `extra` that would shadow a typed field.
    pub fn reserved_extra_field(&self) -> Option<&str> {
        self.extra
            .keys()
            .map(String::as_str)
            .find(|k| Self::is_reserved_field(k))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GiftLink {
    pub catalog_id: String,
    pub gift_id: String,
    pub linked_at: DateTime<Utc>,
}

/// Which catalog a site shows, minus excluded categories, with per-gift prices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SiteCatalogConfig {
    pub site_id: String,
    pub catalog_id: String,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub overrides: BTreeMap<String, Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl SiteCatalogConfig {
    pub fn is_excluded(&self, category: &str) -> bool {
        self.exclusions
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
    }

    /// Site override if present, else the gift's own price.
    pub fn effective_price(&self, gift: &Gift) -> Option<Decimal> {
        self.overrides.get(&gift.id).copied().or(gift.price)
    }
}

/// A gift as it appears on one site.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteGift {
    pub gift: Gift,
    pub price: Option<Decimal>,
    pub overridden: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(SyncStatus::Success),
            "partial" => Ok(SyncStatus::Partial),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(format!("unknown sync status '{s}'")),
        }
    }
}

/// One catalog synchronization run. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub status: SyncStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_synced: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SyncLogEntry {
    pub fn new(status: SyncStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            status,
            timestamp,
            message: None,
            items_synced: None,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub catalog_id: String,
    pub total_gifts: u64,
    /// Gift count per category; uncategorized gifts are not listed.
    pub categories: BTreeMap<String, u64>,
    pub assigned_sites: u64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsLookup {
    Fresh(CatalogStats),
    Stale(CatalogStats),
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    pub const DEFAULT_PAGE_SIZE: u32 = 50;
    pub const MAX_PAGE_SIZE: u32 = 200;

    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    /// 1-based.
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1).saturating_mul(self.page_size as usize)
    }

    pub fn slice<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len();
        let items = items
            .into_iter()
            .skip(self.offset())
            .take(self.page_size.max(1) as usize)
            .collect();
        Page {
            items,
            page: self.page.max(1),
            page_size: self.page_size.max(1),
            total,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: usize,
}
