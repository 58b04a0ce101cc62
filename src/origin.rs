//! Vendor-facing origin client.
//!
//! Fetches the country database archive (or just its build timestamp) from
//! the vendor's download endpoint. The vendor enforces a hard daily download
//! quota per account, so the last successful download is kept for a cooldown
//! window and reused; in the normal propagation flow that cache is almost
//! never hit, it exists for the crash-between-download-and-install case. A
//! metadata probe that sees a newer build than the cached download drops the
//! cache so the next fetch re-downloads instead of serving stale bytes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, LAST_MODIFIED};
use url::form_urlencoded;

use crate::archive::extract_file_from_tar_gz;
use crate::config::{
    ConfigProvider, MAX_ARCHIVE_DOWNLOAD_BYTES, MAX_DATABASE_PAYLOAD_BYTES,
    ORIGIN_DOWNLOAD_BASE, ORIGIN_DOWNLOAD_COOLDOWN, ORIGIN_EDITION_ID, ORIGIN_HTTP_TIMEOUT,
};
use crate::freshness::is_still_fresh;
use crate::models::{DatabaseMetadata, GeoDatabase};
use crate::roles::DatabaseSource;

/// Last successful archive download, reused within the cooldown window.
struct CachedOriginResponse {
    /// Build date the vendor declared for the download, if any.
    build_date: Option<DateTime<Utc>>,
    /// Extracted database payload.
    payload: Option<Vec<u8>>,
    downloaded_at: DateTime<Utc>,
}

/// HTTP client for the vendor download endpoint. Source role only.
pub struct OriginClient {
    http: reqwest::Client,
    download_base: String,
    edition_id: String,
    config: Arc<dyn ConfigProvider>,
    cooldown: Duration,
    cached: Mutex<Option<CachedOriginResponse>>,
}

impl OriginClient {
    /// Client against the production vendor endpoint.
    pub fn new(config: Arc<dyn ConfigProvider>) -> Result<Self> {
        Self::with_endpoint(config, ORIGIN_DOWNLOAD_BASE, ORIGIN_EDITION_ID)
    }

    /// Client against an arbitrary endpoint (tests, mirrors).
    pub fn with_endpoint(
        config: Arc<dyn ConfigProvider>,
        download_base: &str,
        edition_id: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(ORIGIN_HTTP_TIMEOUT)
            .build()
            .context("failed to build origin HTTP client")?;
        Ok(OriginClient {
            http,
            download_base: download_base.to_string(),
            edition_id: edition_id.to_string(),
            config,
            cooldown: ORIGIN_DOWNLOAD_COOLDOWN,
            cached: Mutex::new(None),
        })
    }

    fn download_url(&self, license_key: &str) -> String {
        // URL-encode the license key to handle special characters
        let encoded_key: String = form_urlencoded::byte_serialize(license_key.as_bytes()).collect();
        format!(
            "{}?edition_id={}&license_key={}&suffix=tar.gz",
            self.download_base, self.edition_id, encoded_key
        )
    }

    /// Name of the database file inside the vendor archive.
    fn archived_file_name(&self) -> String {
        format!("{}.mmdb", self.edition_id)
    }

    /// License key from the current configuration, or `None` when the
    /// pipeline is disabled or no key is set. Key validity was checked at
    /// startup; here absence just means "nothing to fetch".
    fn current_license_key(&self) -> Option<String> {
        let config = self.config.current();
        if !config.enabled {
            return None;
        }
        config.license_key.filter(|key| !key.is_empty())
    }

    /// Returns the cached download as a database if it is still inside the
    /// cooldown window.
    fn cached_database(&self, now: DateTime<Utc>) -> Option<GeoDatabase> {
        let cached = self.cached.lock().expect("origin cache lock poisoned");
        let entry = cached.as_ref()?;
        if !is_still_fresh(entry.downloaded_at, now, self.cooldown) {
            return None;
        }
        let payload = entry.payload.as_ref()?;
        Some(GeoDatabase::new(
            DatabaseMetadata::new(entry.build_date.unwrap_or(entry.downloaded_at)),
            payload.clone(),
        ))
    }

    /// Drops the cached download if `probed` is newer than what the cache
    /// was downloaded as (or if the cached build date is unknown).
    fn invalidate_if_stale(&self, probed: DateTime<Utc>) {
        let mut cached = self.cached.lock().expect("origin cache lock poisoned");
        let stale = match cached.as_ref() {
            Some(entry) => match entry.build_date {
                Some(cached_date) => probed > cached_date,
                None => true,
            },
            None => false,
        };
        if stale {
            log::info!(
                "Origin reports newer build {} than cached download, dropping cache",
                probed
            );
            *cached = None;
        }
    }

    async fn download_archive(&self, license_key: &str) -> Result<(Vec<u8>, Option<DateTime<Utc>>)> {
        let url = self.download_url(license_key);
        log::info!("Downloading {} archive from origin", self.edition_id);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("origin download request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("origin download failed with HTTP status {}", status);
        }

        // Check content-length before pulling the body, then re-check the
        // actual size in case the header was missing or wrong.
        if let Some(content_length) = response.content_length() {
            if content_length > MAX_ARCHIVE_DOWNLOAD_BYTES {
                anyhow::bail!(
                    "origin archive too large: {} bytes (limit {})",
                    content_length,
                    MAX_ARCHIVE_DOWNLOAD_BYTES
                );
            }
        }

        let build_date = parse_last_modified(response.headers());
        let bytes = response
            .bytes()
            .await
            .context("failed to read origin archive body")?;
        if bytes.len() as u64 > MAX_ARCHIVE_DOWNLOAD_BYTES {
            anyhow::bail!(
                "origin archive too large: {} bytes (limit {})",
                bytes.len(),
                MAX_ARCHIVE_DOWNLOAD_BYTES
            );
        }

        Ok((bytes.to_vec(), build_date))
    }
}

#[async_trait]
impl DatabaseSource for OriginClient {
    async fn fetch_metadata(&self) -> Result<Option<DatabaseMetadata>> {
        let license_key = match self.current_license_key() {
            Some(key) => key,
            None => return Ok(None),
        };

        let url = self.download_url(&license_key);
        let response = self
            .http
            .head(&url)
            .send()
            .await
            .context("origin metadata probe failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("origin metadata probe failed with HTTP status {}", status);
        }

        // A missing or unparseable timestamp header is absence, not an error
        let build_date = match parse_last_modified(response.headers()) {
            Some(date) => date,
            None => return Ok(None),
        };

        self.invalidate_if_stale(build_date);
        Ok(Some(DatabaseMetadata::new(build_date)))
    }

    async fn fetch_database(&self) -> Result<Option<GeoDatabase>> {
        let license_key = match self.current_license_key() {
            Some(key) => key,
            None => return Ok(None),
        };

        let now = Utc::now();
        if let Some(db) = self.cached_database(now) {
            log::debug!(
                "Reusing origin download from within cooldown (build {})",
                db.metadata.build_date
            );
            return Ok(Some(db));
        }

        let (archive, build_date) = self.download_archive(&license_key).await?;
        let payload = extract_file_from_tar_gz(
            &archive,
            &self.archived_file_name(),
            MAX_DATABASE_PAYLOAD_BYTES,
        )?;

        *self.cached.lock().expect("origin cache lock poisoned") = Some(CachedOriginResponse {
            build_date,
            payload: Some(payload.clone()),
            downloaded_at: now,
        });

        if build_date.is_none() {
            // Without a Last-Modified header the download time stands in as
            // the build date so freshness comparisons keep working.
            log::warn!("Origin download carried no Last-Modified header, using download time");
        }
        Ok(Some(GeoDatabase::new(
            DatabaseMetadata::new(build_date.unwrap_or(now)),
            payload,
        )))
    }
}

/// Parses the `Last-Modified` response header into a UTC timestamp.
fn parse_last_modified(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let raw = headers.get(LAST_MODIFIED)?.to_str().ok()?;
    match DateTime::parse_from_rfc2822(raw) {
        Ok(date) => Some(date.with_timezone(&Utc)),
        Err(e) => {
            log::warn!("Ignoring unparseable Last-Modified header {:?}: {}", raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeoConfig, SharedConfig};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use std::io::Write;
    use tar::{Builder, Header};

    const EDITION: &str = "GeoLite2-Country";
    const LAST_MODIFIED_JAN_1: &str = "Mon, 01 Jan 2024 00:00:00 GMT";
    const LAST_MODIFIED_JAN_10: &str = "Wed, 10 Jan 2024 00:00:00 GMT";

    fn enabled_config() -> Arc<SharedConfig> {
        Arc::new(SharedConfig::new(GeoConfig {
            enabled: true,
            license_key: Some("test-license".to_string()),
        }))
    }

    fn client_for(server: &Server, config: Arc<SharedConfig>) -> OriginClient {
        let base = server.url("/geoip_download").to_string();
        OriginClient::with_endpoint(config, &base, EDITION).unwrap()
    }

    fn archive_with_payload(payload: &[u8]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header
            .set_path(format!("{}_20240101/{}.mmdb", EDITION, EDITION))
            .unwrap();
        header.set_size(payload.len() as u64);
        header.set_cksum();
        builder.append(&header, payload).unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_fetch_metadata_reads_last_modified() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("HEAD", "/geoip_download")).respond_with(
                status_code(200).append_header("Last-Modified", LAST_MODIFIED_JAN_10),
            ),
        );

        let client = client_for(&server, enabled_config());
        let metadata = client.fetch_metadata().await.unwrap().unwrap();
        assert_eq!(
            metadata.build_date.to_rfc2822(),
            "Wed, 10 Jan 2024 00:00:00 +0000"
        );
    }

    #[tokio::test]
    async fn test_fetch_metadata_without_header_is_absent() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("HEAD", "/geoip_download"))
                .respond_with(status_code(200)),
        );

        let client = client_for(&server, enabled_config());
        assert!(client.fetch_metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_metadata_http_error_propagates() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("HEAD", "/geoip_download"))
                .respond_with(status_code(503)),
        );

        let client = client_for(&server, enabled_config());
        let err = client.fetch_metadata().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_no_license_key_means_absent_without_request() {
        let server = Server::run();
        // No expectations: any request would fail the test on drop.
        let config = Arc::new(SharedConfig::new(GeoConfig {
            enabled: true,
            license_key: None,
        }));
        let client = client_for(&server, config);

        assert!(client.fetch_metadata().await.unwrap().is_none());
        assert!(client.fetch_database().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_config_means_absent() {
        let server = Server::run();
        let config = Arc::new(SharedConfig::new(GeoConfig {
            enabled: false,
            license_key: Some("key".to_string()),
        }));
        let client = client_for(&server, config);

        assert!(client.fetch_metadata().await.unwrap().is_none());
        assert!(client.fetch_database().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_database_downloads_and_extracts() {
        let payload = b"fake country database bytes";
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/geoip_download")).respond_with(
                status_code(200)
                    .append_header("Last-Modified", LAST_MODIFIED_JAN_10)
                    .body(archive_with_payload(payload)),
            ),
        );

        let client = client_for(&server, enabled_config());
        let db = client.fetch_database().await.unwrap().unwrap();
        assert_eq!(db.payload, payload);
        assert_eq!(
            db.metadata.build_date.to_rfc2822(),
            "Wed, 10 Jan 2024 00:00:00 +0000"
        );
    }

    #[tokio::test]
    async fn test_second_fetch_within_cooldown_hits_cache() {
        let payload = b"fake country database bytes";
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/geoip_download"))
                .times(1)
                .respond_with(
                    status_code(200)
                        .append_header("Last-Modified", LAST_MODIFIED_JAN_10)
                        .body(archive_with_payload(payload)),
                ),
        );

        let client = client_for(&server, enabled_config());
        let first = client.fetch_database().await.unwrap().unwrap();
        let second = client.fetch_database().await.unwrap().unwrap();
        // Exactly one underlying vendor download (enforced by times(1))
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_newer_probe_invalidates_cached_download() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/geoip_download"))
                .times(2)
                .respond_with(
                    status_code(200)
                        .append_header("Last-Modified", LAST_MODIFIED_JAN_1)
                        .body(archive_with_payload(b"old payload")),
                ),
        );
        server.expect(
            Expectation::matching(request::method_path("HEAD", "/geoip_download")).respond_with(
                status_code(200).append_header("Last-Modified", LAST_MODIFIED_JAN_10),
            ),
        );

        let client = client_for(&server, enabled_config());
        client.fetch_database().await.unwrap().unwrap();

        // Probe discovers a strictly newer build; the cache must be dropped
        // so the next fetch re-downloads (times(2) on the GET enforces it).
        client.fetch_metadata().await.unwrap().unwrap();
        client.fetch_database().await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_probe_with_same_build_keeps_cache() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/geoip_download"))
                .times(1)
                .respond_with(
                    status_code(200)
                        .append_header("Last-Modified", LAST_MODIFIED_JAN_10)
                        .body(archive_with_payload(b"payload")),
                ),
        );
        server.expect(
            Expectation::matching(request::method_path("HEAD", "/geoip_download")).respond_with(
                status_code(200).append_header("Last-Modified", LAST_MODIFIED_JAN_10),
            ),
        );

        let client = client_for(&server, enabled_config());
        client.fetch_database().await.unwrap().unwrap();
        client.fetch_metadata().await.unwrap().unwrap();
        client.fetch_database().await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_fetch_database_http_error_propagates() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/geoip_download"))
                .respond_with(status_code(401)),
        );

        let client = client_for(&server, enabled_config());
        let err = client.fetch_database().await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_archive_without_database_file_is_an_error() {
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_path("README.txt").unwrap();
        header.set_size(6);
        header.set_cksum();
        builder.append(&header, &b"readme"[..]).unwrap();
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        let archive = encoder.finish().unwrap();

        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/geoip_download"))
                .respond_with(status_code(200).body(archive)),
        );

        let client = client_for(&server, enabled_config());
        let err = client.fetch_database().await.unwrap_err();
        assert!(err.to_string().contains("GeoLite2-Country.mmdb"));
    }

    #[tokio::test]
    async fn test_license_key_is_url_encoded() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("HEAD", "/geoip_download"))
                .respond_with(status_code(200)),
        );

        let config = Arc::new(SharedConfig::new(GeoConfig {
            enabled: true,
            license_key: Some("key+with/special=chars".to_string()),
        }));
        let client = client_for(&server, config);
        // The query must not break the request; absence of a Last-Modified
        // header makes the probe return None.
        assert!(client.fetch_metadata().await.unwrap().is_none());
    }
}
