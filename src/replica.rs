//! Durable replica of the geolocation database in shared blob storage.
//!
//! Two independently-addressed blobs: the full database container and a
//! small metadata-only record that lets every node answer "what build do you
//! have" without pulling tens of megabytes. The two writes are not atomic;
//! the database blob is always written first, so after a crash between the
//! writes the metadata may lag the stored database but can never claim a
//! build the database blob does not have. Propagators tolerate a lagging
//! destination (they re-copy); a leading one would make them skip updates.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::codec::{decode_database, encode_database};
use crate::models::{DatabaseMetadata, GeoDatabase};
use crate::roles::{DatabaseDestination, DatabaseSource};
use crate::storage::BlobStorage;

/// Blob holding the full serialized database container.
pub(crate) const DATABASE_BLOB_NAME: &str = "geolocation/country-database";
/// Blob holding only the serialized build metadata.
pub(crate) const METADATA_BLOB_NAME: &str = "geolocation/country-database-metadata";

/// Replica store over durable blob storage. Implements both pipeline roles:
/// destination of the origin→replica propagator and source of the
/// replica→resident one.
pub struct ReplicaStore {
    storage: Arc<dyn BlobStorage>,
}

impl ReplicaStore {
    pub fn new(storage: Arc<dyn BlobStorage>) -> Self {
        ReplicaStore { storage }
    }
}

#[async_trait]
impl DatabaseSource for ReplicaStore {
    async fn fetch_metadata(&self) -> Result<Option<DatabaseMetadata>> {
        let bytes = match self.storage.get(METADATA_BLOB_NAME).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let metadata = serde_json::from_slice(&bytes)
            .context("failed to deserialize replica metadata blob")?;
        Ok(Some(metadata))
    }

    async fn fetch_database(&self) -> Result<Option<GeoDatabase>> {
        let bytes = match self.storage.get(DATABASE_BLOB_NAME).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let db = decode_database(&bytes).context("failed to decode replica database blob")?;
        Ok(Some(db))
    }
}

#[async_trait]
impl DatabaseDestination for ReplicaStore {
    async fn fetch_metadata(&self) -> Result<Option<DatabaseMetadata>> {
        DatabaseSource::fetch_metadata(self).await
    }

    async fn store_database(&self, db: GeoDatabase) -> Result<()> {
        let container = encode_database(&db).context("failed to encode database container")?;
        let metadata_bytes = serde_json::to_vec(&db.metadata)
            .context("failed to serialize replica metadata blob")?;

        // Database blob strictly before metadata blob. See module docs.
        self.storage
            .put(DATABASE_BLOB_NAME, &container)
            .await
            .context("failed to write replica database blob")?;
        self.storage
            .put(METADATA_BLOB_NAME, &metadata_bytes)
            .await
            .context("failed to write replica metadata blob")?;

        log::info!(
            "Stored database in replica (build {}, {} payload bytes)",
            db.metadata.build_date,
            db.payload.len()
        );
        Ok(())
    }

    async fn on_disabled(&self) {
        // Deliberately keep the blobs: re-enabling geolocation later must
        // not require a fresh origin download.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStorage;
    use chrono::{TimeZone, Utc};

    fn sample_db(day: u32) -> GeoDatabase {
        GeoDatabase::new(
            DatabaseMetadata::new(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()),
            vec![day as u8; 64],
        )
    }

    fn replica_with_memory() -> (Arc<MemoryBlobStorage>, ReplicaStore) {
        let storage = Arc::new(MemoryBlobStorage::new());
        let replica = ReplicaStore::new(storage.clone());
        (storage, replica)
    }

    #[tokio::test]
    async fn test_empty_replica_reports_absent() {
        let (_, replica) = replica_with_memory();
        assert!(DatabaseSource::fetch_metadata(&replica)
            .await
            .unwrap()
            .is_none());
        assert!(replica.fetch_database().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_then_fetch_round_trip() {
        let (_, replica) = replica_with_memory();
        let db = sample_db(10);

        replica.store_database(db.clone()).await.unwrap();

        let fetched = replica.fetch_database().await.unwrap().unwrap();
        assert_eq!(fetched, db);
        let metadata = DatabaseSource::fetch_metadata(&replica)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata, db.metadata);
    }

    #[tokio::test]
    async fn test_metadata_never_leads_database() {
        // Inject a failure of the second (metadata) write: the database blob
        // lands, the metadata write crashes. Afterwards the metadata must
        // not report a build newer than the stored database.
        let (storage, replica) = replica_with_memory();
        replica.store_database(sample_db(1)).await.unwrap();

        let newer = sample_db(10);
        storage.fail_put_after(1); // database write lands, metadata write fails
        assert!(replica.store_database(newer.clone()).await.is_err());

        let stored_meta = DatabaseSource::fetch_metadata(&replica)
            .await
            .unwrap()
            .unwrap();
        let stored_db = replica.fetch_database().await.unwrap().unwrap();
        // Metadata lags (still reports day 1) while the database blob is
        // already at day 10. Lagging is allowed; leading never is.
        assert!(stored_meta.build_date <= stored_db.metadata.build_date);
        assert_eq!(stored_db, newer);
    }

    #[tokio::test]
    async fn test_on_disabled_keeps_blobs() {
        let (_, replica) = replica_with_memory();
        let db = sample_db(10);
        replica.store_database(db.clone()).await.unwrap();

        DatabaseDestination::on_disabled(&replica).await;

        assert_eq!(replica.fetch_database().await.unwrap().unwrap(), db);
        assert!(DatabaseSource::fetch_metadata(&replica)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_corrupt_database_blob_is_an_error() {
        let (storage, replica) = replica_with_memory();
        storage
            .put(DATABASE_BLOB_NAME, b"definitely not a container")
            .await
            .unwrap();
        assert!(replica.fetch_database().await.is_err());
    }
}
