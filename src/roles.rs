//! Source/Destination capability traits connecting the pipeline tiers.
//!
//! A tier either answers "what build do you have" plus "give me your
//! database" (source), or "what build do you have" plus "accept this
//! database / you are disabled" (destination). [`crate::replica::ReplicaStore`]
//! implements both; [`crate::origin::OriginClient`] is source-only;
//! [`crate::resident::ResidentCache`] is destination-only. The propagator is
//! written once against these two traits and instantiated per tier pair.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DatabaseMetadata, GeoDatabase};

/// A tier that can hand out database snapshots.
#[async_trait]
pub trait DatabaseSource: Send + Sync {
    /// Build metadata of the snapshot this source currently offers, or
    /// `None` when it has nothing to offer (no credential configured, no
    /// snapshot stored, vendor declared no build time).
    async fn fetch_metadata(&self) -> Result<Option<DatabaseMetadata>>;

    /// The full snapshot this source currently offers, or `None` when it
    /// has nothing to offer.
    async fn fetch_database(&self) -> Result<Option<GeoDatabase>>;
}

/// A tier that can accept database snapshots.
#[async_trait]
pub trait DatabaseDestination: Send + Sync {
    /// Build metadata of the snapshot currently installed here, or `None`
    /// when nothing is installed.
    async fn fetch_metadata(&self) -> Result<Option<DatabaseMetadata>>;

    /// Installs a snapshot, replacing whatever was installed before.
    async fn store_database(&self, db: GeoDatabase) -> Result<()>;

    /// Called on every tick while geolocation is disabled. Idempotent; each
    /// destination decides what disabling means for it (the resident cache
    /// drops its entry, the replica deliberately keeps its blobs).
    async fn on_disabled(&self);
}
