//! Opaque country-lookup engine capability.
//!
//! The pipeline only ever needs "build a reader from bytes, then query it by
//! IP"; everything else about the vendor format stays behind these traits.
//! Production uses the MaxMind reader; tests substitute hand-rolled fakes.

use std::net::IpAddr;

use anyhow::{Context, Result};
use maxminddb::Reader;

/// What the engine knows about one address. Either field may be missing in
/// vendor data; the orchestrator decides what that means for callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountryRecord {
    pub country_iso_code: Option<String>,
    pub continent_code: Option<String>,
}

/// A query-ready lookup engine built from one database snapshot.
pub trait CountryLookup: Send + Sync {
    /// Looks up an address. `None` means the engine has no record for it.
    fn lookup(&self, ip: IpAddr) -> Option<CountryRecord>;
}

/// Builds lookup engines from raw database payload bytes.
pub trait LookupEngineFactory: Send + Sync {
    fn build(&self, payload: &[u8]) -> Result<Box<dyn CountryLookup>>;
}

/// MaxMind-backed lookup engine.
pub struct MaxMindEngine {
    reader: Reader<Vec<u8>>,
}

impl CountryLookup for MaxMindEngine {
    fn lookup(&self, ip: IpAddr) -> Option<CountryRecord> {
        let result = self.reader.lookup(ip).ok()?;
        if !result.has_data() {
            return None;
        }
        let country: maxminddb::geoip2::Country = result.decode().ok()??;

        Some(CountryRecord {
            country_iso_code: country.country.iso_code.map(|s| s.to_string()),
            continent_code: country.continent.code.map(|s| s.to_string()),
        })
    }
}

/// Factory producing [`MaxMindEngine`]s.
#[derive(Default)]
pub struct MaxMindEngineFactory;

impl LookupEngineFactory for MaxMindEngineFactory {
    fn build(&self, payload: &[u8]) -> Result<Box<dyn CountryLookup>> {
        let reader = Reader::from_source(payload.to_vec())
            .context("failed to parse country database payload")?;
        Ok(Box::new(MaxMindEngine { reader }))
    }
}
