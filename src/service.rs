//! Pipeline orchestration and the public lookup API.
//!
//! Wires the tiers together: a replica store over the supplied blob storage,
//! a resident cache seeded from the replica, an origin→replica propagator on
//! the elected leader, a replica→resident propagator on every node, and the
//! age reporter. Built by explicit construction so the embedder owns the
//! lifecycle; nothing here is a process-global.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::{
    ConfigProvider, ORIGIN_CHECK_INTERVAL, REPLICA_CHECK_INTERVAL, RESIDENT_MAX_AGE,
};
use crate::engine::{LookupEngineFactory, MaxMindEngineFactory};
use crate::metrics::{run_age_reporter, GaugeSink, LogGaugeSink};
use crate::origin::OriginClient;
use crate::propagator::UpdatePropagator;
use crate::replica::ReplicaStore;
use crate::resident::ResidentCache;
use crate::roles::{DatabaseDestination, DatabaseSource};
use crate::storage::BlobStorage;

/// Country answer for one IP address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryInfo {
    /// ISO 3166-1 alpha-2 country code, e.g. "FI".
    pub country_iso_code: String,
    /// Two-letter continent code, e.g. "EU"; empty when the vendor record
    /// carries none.
    pub continent_code: String,
}

/// Construction-time wiring for [`GeoLocationService`].
pub struct GeoLocationServiceOptions {
    storage: Arc<dyn BlobStorage>,
    config: Arc<dyn ConfigProvider>,
    is_leader: bool,
    engine_factory: Box<dyn LookupEngineFactory>,
    gauge_sink: Arc<dyn GaugeSink>,
    origin: Option<OriginClient>,
}

impl GeoLocationServiceOptions {
    /// Options with production defaults: follower node, MaxMind engine,
    /// log-based gauge sink, vendor origin endpoint.
    pub fn new(storage: Arc<dyn BlobStorage>, config: Arc<dyn ConfigProvider>) -> Self {
        GeoLocationServiceOptions {
            storage,
            config,
            is_leader: false,
            engine_factory: Box::new(MaxMindEngineFactory),
            gauge_sink: Arc::new(LogGaugeSink),
            origin: None,
        }
    }

    /// Marks this node as the elected leader; only the leader polls the
    /// vendor origin. Leader election itself happens elsewhere.
    pub fn leader(mut self, is_leader: bool) -> Self {
        self.is_leader = is_leader;
        self
    }

    pub fn engine_factory(mut self, factory: Box<dyn LookupEngineFactory>) -> Self {
        self.engine_factory = factory;
        self
    }

    pub fn gauge_sink(mut self, sink: Arc<dyn GaugeSink>) -> Self {
        self.gauge_sink = sink;
        self
    }

    /// Substitutes the origin client (tests, mirror endpoints).
    pub fn origin_client(mut self, origin: OriginClient) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Running geolocation pipeline plus the query API over it.
pub struct GeoLocationService {
    resident: Arc<ResidentCache>,
    cancel: CancellationToken,
}

impl GeoLocationService {
    /// Validates configuration, seeds the resident tier from the replica,
    /// and spawns the background propagation tasks.
    ///
    /// An invalid license key with geolocation enabled is fatal here; an
    /// empty replica is logged and the propagators fill it in later.
    pub async fn start(options: GeoLocationServiceOptions) -> Result<Self> {
        let config = options.config;
        config
            .current()
            .validated_license_key()
            .context("geolocation configuration rejected")?;

        let replica = Arc::new(ReplicaStore::new(options.storage));
        let resident = Arc::new(
            ResidentCache::new(options.engine_factory, None)
                .context("failed to construct resident cache")?,
        );

        if config.current().enabled {
            match replica.fetch_database().await {
                Ok(Some(db)) => {
                    let build_date = db.metadata.build_date;
                    if let Err(e) = resident.store_database(db).await {
                        log::warn!("Discarding initial replica database (build {}): {:#}", build_date, e);
                    }
                }
                Ok(None) => log::info!("No initial database in replica, starting empty"),
                // Propagation retries will sort out a transiently unreadable
                // replica; a corrupt one gets overwritten by the leader.
                Err(e) => log::warn!("Failed to read initial database from replica: {:#}", e),
            }
        }

        let cancel = CancellationToken::new();

        if options.is_leader {
            let origin = match options.origin {
                Some(origin) => origin,
                None => OriginClient::new(config.clone())
                    .context("failed to construct origin client")?,
            };
            let origin_to_replica = UpdatePropagator::new(
                "origin-to-replica",
                Arc::new(origin),
                replica.clone(),
                config.clone(),
                ORIGIN_CHECK_INTERVAL,
            );
            tokio::spawn(origin_to_replica.run(cancel.child_token()));
        }

        let replica_to_resident = UpdatePropagator::new(
            "replica-to-resident",
            replica,
            resident.clone(),
            config.clone(),
            REPLICA_CHECK_INTERVAL,
        );
        tokio::spawn(replica_to_resident.run(cancel.child_token()));

        tokio::spawn(run_age_reporter(
            resident.clone(),
            options.gauge_sink,
            cancel.child_token(),
        ));

        Ok(GeoLocationService { resident, cancel })
    }

    /// Resolves an IP address to a country.
    ///
    /// `None` means "no information available": nothing resident yet,
    /// resident database past the staleness ceiling, no record for the
    /// address, or a record without a country code. Callers cannot and
    /// should not distinguish these through this API; the distinction lives
    /// in logs and metrics.
    pub fn lookup_country(&self, ip: IpAddr) -> Option<CountryInfo> {
        let entry = self.resident.current()?;

        // Hard staleness ceiling, independent of propagation health. A dead
        // update pipeline must not keep answering from ancient data.
        let max_age = ChronoDuration::from_std(RESIDENT_MAX_AGE).ok()?;
        if Utc::now().signed_duration_since(entry.metadata.build_date) > max_age {
            log::debug!(
                "Resident database build {} exceeds staleness ceiling, refusing lookup",
                entry.metadata.build_date
            );
            return None;
        }

        let record = entry.engine.lookup(ip)?;
        let country_iso_code = record.country_iso_code?;
        Some(CountryInfo {
            country_iso_code,
            continent_code: record.continent_code.unwrap_or_default(),
        })
    }

    /// Build date of the currently resident database, if any.
    pub fn resident_build_date(&self) -> Option<chrono::DateTime<Utc>> {
        self.resident.current().map(|entry| entry.metadata.build_date)
    }

    /// Stops the background tasks. Lookups keep answering from the current
    /// resident entry until the service is dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
