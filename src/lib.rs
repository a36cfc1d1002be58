//! Catalog configuration layer of the JALA gifting platform.
//!
//! Catalogs, gifts, site catalog assignments, sync logs and cached stats are
//! all stored in one generic `kv_store` table. [`keys`] defines the key space,
//! [`db`] the transactional access to it, and the remaining modules the
//! operations built on top.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod model;
pub mod site_config;
pub mod sync_log;

pub use error::{StoreError, StoreResult};
