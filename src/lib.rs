//! geo_sync: tiered synchronization pipeline for an IP-to-country database.
//!
//! Keeps a vendor geolocation database available in a server process while
//! minimizing traffic to the rate-limited vendor endpoint. Data flows one
//! way through three tiers, each trading durability against staleness:
//!
//! `origin (vendor HTTP)` → `replica (durable blob storage)` →
//! `resident (in-process cache)` → lookup API
//!
//! Only the elected leader of a cluster polls the origin; every node pulls
//! from the shared replica. Lookups refuse to answer from a database older
//! than 30 days, whatever the reason the pipeline stalled.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use geo_sync::{
//!     FsBlobStorage, GeoConfig, GeoLocationService, GeoLocationServiceOptions, SharedConfig,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Arc::new(SharedConfig::new(GeoConfig {
//!     enabled: true,
//!     license_key: Some("my-license-key".to_string()),
//! }));
//! let storage = Arc::new(FsBlobStorage::new("/var/lib/myserver/geo"));
//!
//! let service = GeoLocationService::start(
//!     GeoLocationServiceOptions::new(storage, config).leader(true),
//! )
//! .await?;
//!
//! let country = service.lookup_country("198.51.100.7".parse()?);
//! println!("{:?}", country);
//! # Ok(())
//! # }
//! ```

mod archive;
mod codec;
pub mod config;
mod engine;
mod freshness;
mod logging;
mod metrics;
mod models;
mod origin;
mod propagator;
mod replica;
mod resident;
mod roles;
mod service;
mod storage;

pub use archive::{extract_file_from_tar_gz, ArchiveError};
pub use codec::{decode_database, encode_database, CodecError, SCHEMA_VERSION};
pub use config::{ConfigError, ConfigProvider, GeoConfig, SharedConfig};
pub use engine::{
    CountryLookup, CountryRecord, LookupEngineFactory, MaxMindEngine, MaxMindEngineFactory,
};
pub use logging::init_logger;
pub use metrics::{GaugeSink, LogGaugeSink};
pub use models::{DatabaseMetadata, GeoDatabase};
pub use origin::OriginClient;
pub use propagator::UpdatePropagator;
pub use replica::ReplicaStore;
pub use resident::{ResidentCache, ResidentEntry};
pub use roles::{DatabaseDestination, DatabaseSource};
pub use service::{CountryInfo, GeoLocationService, GeoLocationServiceOptions};
pub use storage::{BlobStorage, FsBlobStorage, MemoryBlobStorage};
