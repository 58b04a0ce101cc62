//! Core data model for the geolocation synchronization pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vendor-declared build time of a database snapshot.
///
/// Sourced from the HTTP `Last-Modified` header on download, or deserialized
/// from durable storage. Used only for freshness comparison between tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    /// When the vendor built this database snapshot.
    pub build_date: DateTime<Utc>,
}

impl DatabaseMetadata {
    pub fn new(build_date: DateTime<Utc>) -> Self {
        DatabaseMetadata { build_date }
    }

    /// True if this snapshot was built strictly after `other`.
    pub fn is_newer_than(&self, other: &DatabaseMetadata) -> bool {
        self.build_date > other.build_date
    }
}

/// A geolocation database snapshot: build metadata plus the raw binary
/// payload in the lookup engine's native format.
///
/// The payload is capped at [`crate::config::MAX_DATABASE_PAYLOAD_BYTES`];
/// anything larger is rejected outright, never truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoDatabase {
    pub metadata: DatabaseMetadata,
    pub payload: Vec<u8>,
}

impl GeoDatabase {
    pub fn new(metadata: DatabaseMetadata, payload: Vec<u8>) -> Self {
        GeoDatabase { metadata, payload }
    }
}
