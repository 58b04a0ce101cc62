//! In-process resident copy of the geolocation database.
//!
//! Holds at most one entry: the build metadata plus a query-ready lookup
//! engine built from the payload. The entry is replaced as a whole behind an
//! `RwLock<Option<Arc<..>>>`, so concurrent readers always see either the
//! old or the new entry in full. The critical sections are pointer swaps;
//! engine construction happens outside the lock.

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::engine::{CountryLookup, LookupEngineFactory};
use crate::models::{DatabaseMetadata, GeoDatabase};
use crate::roles::DatabaseDestination;

/// The currently installed database and its query engine.
pub struct ResidentEntry {
    pub metadata: DatabaseMetadata,
    pub engine: Box<dyn CountryLookup>,
}

/// Process-local cache of the active database. Destination of the
/// replica→resident propagator.
pub struct ResidentCache {
    entry: RwLock<Option<Arc<ResidentEntry>>>,
    factory: Box<dyn LookupEngineFactory>,
}

impl ResidentCache {
    /// Creates an empty cache, optionally seeded with an initial database
    /// (typically pulled from the replica at startup).
    pub fn new(factory: Box<dyn LookupEngineFactory>, initial: Option<GeoDatabase>) -> Result<Self> {
        let cache = ResidentCache {
            entry: RwLock::new(None),
            factory,
        };
        if let Some(db) = initial {
            cache.install(db)?;
        }
        Ok(cache)
    }

    /// The current entry, or `None` when no database is resident.
    /// Never blocks on I/O and never fails.
    pub fn current(&self) -> Option<Arc<ResidentEntry>> {
        self.entry.read().expect("resident lock poisoned").clone()
    }

    fn install(&self, db: GeoDatabase) -> Result<()> {
        let engine = self
            .factory
            .build(&db.payload)
            .context("failed to build lookup engine from database payload")?;
        let entry = Arc::new(ResidentEntry {
            metadata: db.metadata,
            engine,
        });
        // Whole-value swap; the previous entry is simply dropped.
        *self.entry.write().expect("resident lock poisoned") = Some(entry);
        log::info!(
            "Installed resident database (build {})",
            db.metadata.build_date
        );
        Ok(())
    }
}

#[async_trait]
impl DatabaseDestination for ResidentCache {
    async fn fetch_metadata(&self) -> Result<Option<DatabaseMetadata>> {
        Ok(self.current().map(|entry| entry.metadata))
    }

    async fn store_database(&self, db: GeoDatabase) -> Result<()> {
        self.install(db)
    }

    async fn on_disabled(&self) {
        let mut entry = self.entry.write().expect("resident lock poisoned");
        if entry.take().is_some() {
            log::info!("Geolocation disabled, dropped resident database");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::engine::CountryRecord;
    use chrono::{TimeZone, Utc};

    fn sample_db(day: u32) -> GeoDatabase {
        GeoDatabase::new(
            DatabaseMetadata::new(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()),
            vec![0u8; 16],
        )
    }

    fn fi_record() -> CountryRecord {
        CountryRecord {
            country_iso_code: Some("FI".to_string()),
            continent_code: Some("EU".to_string()),
        }
    }

    #[tokio::test]
    async fn test_starts_empty_without_initial_database() {
        let cache = ResidentCache::new(Box::new(FixedAnswerFactory(fi_record())), None).unwrap();
        assert!(cache.current().is_none());
        assert!(cache.fetch_metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_seeded_with_initial_database() {
        let db = sample_db(10);
        let cache =
            ResidentCache::new(Box::new(FixedAnswerFactory(fi_record())), Some(db.clone())).unwrap();

        let entry = cache.current().unwrap();
        assert_eq!(entry.metadata, db.metadata);
        assert_eq!(cache.fetch_metadata().await.unwrap(), Some(db.metadata));
    }

    #[tokio::test]
    async fn test_store_replaces_entry_whole() {
        let cache = ResidentCache::new(Box::new(FixedAnswerFactory(fi_record())), None).unwrap();
        cache.store_database(sample_db(1)).await.unwrap();
        let first = cache.current().unwrap();

        cache.store_database(sample_db(10)).await.unwrap();
        let second = cache.current().unwrap();

        assert!(second.metadata.is_newer_than(&first.metadata));
        // Old entry still usable by readers that grabbed it before the swap
        assert_eq!(
            first.metadata.build_date,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_on_disabled_clears_entry() {
        let cache = ResidentCache::new(
            Box::new(FixedAnswerFactory(fi_record())),
            Some(sample_db(10)),
        )
        .unwrap();
        assert!(cache.current().is_some());

        cache.on_disabled().await;
        assert!(cache.current().is_none());
        assert!(cache.fetch_metadata().await.unwrap().is_none());

        // Idempotent
        cache.on_disabled().await;
        assert!(cache.current().is_none());
    }

    #[tokio::test]
    async fn test_engine_build_failure_keeps_previous_entry() {
        let cache = ResidentCache::new(Box::new(FixedAnswerFactory(fi_record())), None).unwrap();
        cache.store_database(sample_db(1)).await.unwrap();

        let failing = ResidentCache {
            entry: RwLock::new(cache.current()),
            factory: Box::new(RejectingFactory),
        };
        assert!(failing.store_database(sample_db(10)).await.is_err());
        // The previously installed entry survives a failed install.
        assert_eq!(
            failing.current().unwrap().metadata,
            sample_db(1).metadata
        );
    }

    #[tokio::test]
    async fn test_initial_database_with_bad_payload_fails_construction() {
        assert!(ResidentCache::new(Box::new(RejectingFactory), Some(sample_db(10))).is_err());
    }
}
