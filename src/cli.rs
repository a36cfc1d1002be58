use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use jala_catalog::catalog;
use jala_catalog::config::Config;
use jala_catalog::db::Pool;
use jala_catalog::model::{
    CatalogFilter, CatalogPatch, CatalogStatus, CatalogType, Gift, NewCatalog, PageRequest,
    StatsLookup, SyncLogEntry, SyncStatus,
};
use jala_catalog::site_config::{self, SiteConfigLookup};
use jala_catalog::sync_log;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print an example config file and exit
    ExampleConfig,
    /// Catalog records
    #[command(subcommand)]
    Catalog(CatalogCmd),
    /// Gift records
    #[command(subcommand)]
    Gift(GiftCmd),
    /// Link a gift into a catalog
    Link { catalog_id: String, gift_id: String },
    /// Remove a gift from a catalog
    Unlink { catalog_id: String, gift_id: String },
    /// Per-site catalog configuration
    #[command(subcommand)]
    Site(SiteCmd),
    /// Catalog sync log
    #[command(subcommand)]
    Sync(SyncCmd),
    /// Cached catalog statistics
    #[command(subcommand)]
    Stats(StatsCmd),
    /// Derived index maintenance
    #[command(subcommand)]
    Index(IndexCmd),
}

#[derive(Debug, Subcommand)]
pub enum CatalogCmd {
    Create {
        /// Catalog id; a random UUID when omitted
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "type")]
        catalog_type: CatalogType,
        #[arg(long, default_value = "active")]
        status: CatalogStatus,
        #[arg(long)]
        owner: Option<String>,
    },
    Get {
        id: String,
    },
    List {
        #[arg(long = "type")]
        catalog_type: Option<CatalogType>,
        #[arg(long)]
        status: Option<CatalogStatus>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = PageRequest::DEFAULT_PAGE_SIZE)]
        page_size: u32,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "type")]
        catalog_type: Option<CatalogType>,
        #[arg(long)]
        status: Option<CatalogStatus>,
        #[arg(long)]
        owner: Option<String>,
    },
    Delete {
        id: String,
    },
    /// List the gifts linked into a catalog
    Gifts {
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum GiftCmd {
    Put {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        price: Option<Decimal>,
        /// Extra field as key=value; the value is parsed as JSON when possible
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },
    Get {
        id: String,
    },
    Delete {
        id: String,
    },
    /// List the catalogs a gift is linked into
    Catalogs {
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum SiteCmd {
    /// Replace a site's catalog configuration
    Set {
        site_id: String,
        catalog_id: String,
        /// Category to hide on this site (repeatable)
        #[arg(long = "exclude")]
        exclusions: Vec<String>,
        /// Price override as gift_id=price (repeatable)
        #[arg(long = "override", value_parser = parse_override)]
        overrides: Vec<(String, Decimal)>,
        /// Only write if the stored config is at this version (0: not yet configured)
        #[arg(long)]
        expected_version: Option<u64>,
    },
    Get {
        site_id: String,
    },
    Clear {
        site_id: String,
    },
    /// Gifts visible on a site with effective prices
    Gifts {
        site_id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum SyncCmd {
    Append {
        catalog_id: String,
        #[arg(long)]
        status: SyncStatus,
        /// RFC 3339 timestamp; now when omitted
        #[arg(long)]
        timestamp: Option<DateTime<Utc>>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        items_synced: Option<u64>,
        #[arg(long = "error")]
        errors: Vec<String>,
    },
    Latest {
        catalog_id: String,
    },
    List {
        catalog_id: String,
    },
    History {
        catalog_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum StatsCmd {
    Get { catalog_id: String },
    Refresh { catalog_id: String },
}

#[derive(Debug, Subcommand)]
pub enum IndexCmd {
    Audit,
    Rebuild,
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if Gift::is_reserved_field(key) {
        return Err(format!("'{key}' has its own option"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn parse_override(raw: &str) -> Result<(String, Decimal), String> {
    let (gift_id, price) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected gift_id=price, got '{raw}'"))?;
    let price = price
        .parse::<Decimal>()
        .map_err(|e| format!("invalid price '{price}': {e}"))?;
    Ok((gift_id.to_string(), price))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(pool: &Pool, cfg: &Config, command: Command) -> Result<()> {
    match command {
        Command::ExampleConfig => Ok(()),
        Command::Catalog(cmd) => run_catalog(pool, cmd).await,
        Command::Gift(cmd) => run_gift(pool, cmd).await,
        Command::Link {
            catalog_id,
            gift_id,
        } => print_json(&catalog::link_gift_to_catalog(pool, &catalog_id, &gift_id).await?),
        Command::Unlink {
            catalog_id,
            gift_id,
        } => {
            let removed = catalog::unlink_gift_from_catalog(pool, &catalog_id, &gift_id).await?;
            print_json(&json!({ "removed": removed }))
        }
        Command::Site(cmd) => run_site(pool, cmd).await,
        Command::Sync(cmd) => run_sync(pool, cmd).await,
        Command::Stats(cmd) => run_stats(pool, cfg, cmd).await,
        Command::Index(IndexCmd::Audit) => {
            let report = catalog::audit_indexes(pool).await?;
            print_json(&report)
        }
        Command::Index(IndexCmd::Rebuild) => {
            let report = catalog::rebuild_indexes(pool).await?;
            print_json(&json!({ "repaired": report }))
        }
    }
}

async fn run_catalog(pool: &Pool, cmd: CatalogCmd) -> Result<()> {
    match cmd {
        CatalogCmd::Create {
            id,
            name,
            catalog_type,
            status,
            owner,
        } => {
            let new = NewCatalog {
                id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                name,
                catalog_type,
                status,
                owner_id: owner,
            };
            print_json(&catalog::create_catalog(pool, &new).await?)
        }
        CatalogCmd::Get { id } => {
            let found = catalog::get_catalog(pool, &id)
                .await?
                .ok_or_else(|| anyhow!("catalog {id} not found"))?;
            print_json(&found)
        }
        CatalogCmd::List {
            catalog_type,
            status,
            owner,
            page,
            page_size,
        } => {
            let filter = CatalogFilter {
                catalog_type,
                status,
                owner_id: owner,
            };
            let page = catalog::list_catalogs(pool, &filter, PageRequest::new(page, page_size))
                .await?;
            print_json(&page)
        }
        CatalogCmd::Update {
            id,
            name,
            catalog_type,
            status,
            owner,
        } => {
            let patch = CatalogPatch {
                name,
                catalog_type,
                status,
                owner_id: owner,
            };
            if patch.is_empty() {
                warn!(id = %id, "no fields to update");
            }
            print_json(&catalog::update_catalog(pool, &id, &patch).await?)
        }
        CatalogCmd::Delete { id } => {
            let unlinked = catalog::delete_catalog(pool, &id).await?;
            print_json(&json!({ "deleted": id, "unlinkedGifts": unlinked }))
        }
        CatalogCmd::Gifts { id } => print_json(&catalog::list_catalog_gifts(pool, &id).await?),
    }
}

async fn run_gift(pool: &Pool, cmd: GiftCmd) -> Result<()> {
    match cmd {
        GiftCmd::Put {
            id,
            name,
            category,
            price,
            fields,
        } => {
            let gift = Gift {
                id,
                name,
                category,
                price,
                extra: fields.into_iter().collect::<Map<String, Value>>(),
            };
            catalog::put_gift(pool, &gift).await?;
            print_json(&gift)
        }
        GiftCmd::Get { id } => {
            let gift = catalog::get_gift(pool, &id)
                .await?
                .ok_or_else(|| anyhow!("gift {id} not found"))?;
            print_json(&gift)
        }
        GiftCmd::Delete { id } => {
            let deleted = catalog::delete_gift(pool, &id).await?;
            print_json(&json!({ "deleted": deleted }))
        }
        GiftCmd::Catalogs { id } => print_json(&catalog::list_gift_catalogs(pool, &id).await?),
    }
}

async fn run_site(pool: &Pool, cmd: SiteCmd) -> Result<()> {
    match cmd {
        SiteCmd::Set {
            site_id,
            catalog_id,
            exclusions,
            overrides,
            expected_version,
        } => {
            let overrides: BTreeMap<String, Decimal> = overrides.into_iter().collect();
            let saved = site_config::set_config(
                pool,
                &site_id,
                &catalog_id,
                exclusions,
                overrides,
                expected_version,
            )
            .await?;
            print_json(&saved)
        }
        SiteCmd::Get { site_id } => match site_config::get_config(pool, &site_id).await? {
            SiteConfigLookup::NoSiteSelected => Err(anyhow!("no site selected")),
            SiteConfigLookup::NotConfigured => {
                print_json(&json!({ "siteId": site_id, "configured": false }))
            }
            SiteConfigLookup::Configured(config) => print_json(&config),
        },
        SiteCmd::Clear { site_id } => {
            let removed = site_config::clear_config(pool, &site_id).await?;
            print_json(&json!({ "removed": removed }))
        }
        SiteCmd::Gifts { site_id } => {
            print_json(&site_config::list_site_gifts(pool, &site_id).await?)
        }
    }
}

async fn run_sync(pool: &Pool, cmd: SyncCmd) -> Result<()> {
    match cmd {
        SyncCmd::Append {
            catalog_id,
            status,
            timestamp,
            message,
            items_synced,
            errors,
        } => {
            let entry = SyncLogEntry {
                status,
                timestamp: timestamp.unwrap_or_else(Utc::now),
                message,
                items_synced,
                errors,
            };
            sync_log::append_sync_log(pool, &catalog_id, &entry)
                .await
                .context("failed to append sync log")?;
            print_json(&entry)
        }
        SyncCmd::Latest { catalog_id } => {
            print_json(&sync_log::latest_sync_log(pool, &catalog_id).await?)
        }
        SyncCmd::List { catalog_id } => {
            print_json(&sync_log::list_sync_timestamps(pool, &catalog_id).await?)
        }
        SyncCmd::History { catalog_id, limit } => {
            print_json(&sync_log::sync_history(pool, &catalog_id, limit).await?)
        }
    }
}

async fn run_stats(pool: &Pool, cfg: &Config, cmd: StatsCmd) -> Result<()> {
    match cmd {
        StatsCmd::Get { catalog_id } => {
            let out = match catalog::read_catalog_stats(pool, &catalog_id, Utc::now()).await? {
                StatsLookup::Fresh(stats) => json!({ "fresh": true, "stats": stats }),
                StatsLookup::Stale(stats) => json!({ "fresh": false, "stats": stats }),
                StatsLookup::Missing => json!({ "fresh": false, "stats": null }),
            };
            print_json(&out)
        }
        StatsCmd::Refresh { catalog_id } => {
            let stats = catalog::refresh_catalog_stats(pool, &catalog_id, cfg.stats_ttl()).await?;
            print_json(&stats)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_values_parse_as_json_or_string() {
        assert_eq!(parse_field("stock=3").unwrap(), ("stock".into(), json!(3)));
        assert_eq!(parse_field("sku=MUG-1").unwrap(), ("sku".into(), json!("MUG-1")));
        assert!(parse_field("novalue").is_err());
    }

    #[test]
    fn typed_gift_fields_are_not_extra_fields() {
        for key in Gift::RESERVED_FIELDS {
            assert!(parse_field(&format!("{key}=x")).is_err());
        }
    }

    #[test]
    fn override_requires_decimal_price() {
        assert_eq!(
            parse_override("g1=12.50").unwrap(),
            ("g1".into(), Decimal::new(1250, 2))
        );
        assert!(parse_override("g1=cheap").is_err());
        assert!(parse_override("g1").is_err());
    }
}
