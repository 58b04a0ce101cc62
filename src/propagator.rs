//! Generic source→destination update propagation loop.
//!
//! One propagator instance polls one source/destination pair on a fixed tick
//! period. The expensive source probe is gated by a per-instance check
//! interval (long for origin→replica to bound vendor load, short for
//! replica→resident), tracked as a "last checked" timestamp. That timestamp
//! advances after a successful initial install and after a successful
//! interval-gated check, never on every tick: advancing it more often leaves
//! destinations indefinitely stale, less often degenerates into polling the
//! source every tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigProvider, PROPAGATION_TICK_PERIOD};
use crate::freshness::is_still_fresh;
use crate::roles::{DatabaseDestination, DatabaseSource};

/// Background loop copying database snapshots from a source tier to a
/// destination tier whenever the source has a strictly newer build.
pub struct UpdatePropagator<S: DatabaseSource, D: DatabaseDestination> {
    label: &'static str,
    source: Arc<S>,
    destination: Arc<D>,
    config: Arc<dyn ConfigProvider>,
    check_interval: Duration,
    tick_period: Duration,
    last_checked: Option<DateTime<Utc>>,
}

impl<S: DatabaseSource, D: DatabaseDestination> UpdatePropagator<S, D> {
    pub fn new(
        label: &'static str,
        source: Arc<S>,
        destination: Arc<D>,
        config: Arc<dyn ConfigProvider>,
        check_interval: Duration,
    ) -> Self {
        UpdatePropagator {
            label,
            source,
            destination,
            config,
            check_interval,
            tick_period: PROPAGATION_TICK_PERIOD,
            last_checked: None,
        }
    }

    /// When the source was last probed, if ever.
    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.last_checked
    }

    /// Runs the loop until cancelled. A failed tick is logged and the loop
    /// keeps going; no single failure terminates propagation.
    pub async fn run(mut self, cancel: CancellationToken) {
        log::info!(
            "{}: propagation loop started (check interval {:?})",
            self.label,
            self.check_interval
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("{}: propagation loop stopped", self.label);
                    return;
                }
                _ = tokio::time::sleep(self.tick_period) => {}
            }
            if let Err(e) = self.tick(Utc::now()).await {
                log::warn!("{}: update tick failed: {:#}", self.label, e);
            }
        }
    }

    /// Executes one propagation pass at wall-clock time `now`.
    ///
    /// Configuration is re-read on every call, so live reconfiguration takes
    /// effect on the next tick.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.config.current().enabled {
            self.destination.on_disabled().await;
            return Ok(());
        }

        // Qualified calls: a tier like the replica store implements both
        // roles, making plain method syntax ambiguous.
        match DatabaseDestination::fetch_metadata(self.destination.as_ref()).await? {
            None => {
                // Empty destination: install whatever the source offers.
                if let Some(db) = self.source.fetch_database().await? {
                    let build_date = db.metadata.build_date;
                    self.destination.store_database(db).await?;
                    log::info!("{}: installed initial database (build {})", self.label, build_date);
                    // Defer the next interval-gated check; an install should
                    // not be chased by an immediate redundant probe.
                    self.last_checked = Some(now);
                } else {
                    log::debug!("{}: destination empty and source has nothing to offer", self.label);
                }
            }
            Some(dest_meta) => {
                let check_due = match self.last_checked {
                    Some(checked_at) => !is_still_fresh(checked_at, now, self.check_interval),
                    None => true,
                };
                if !check_due {
                    return Ok(());
                }

                if let Some(src_meta) = DatabaseSource::fetch_metadata(self.source.as_ref()).await? {
                    if src_meta.is_newer_than(&dest_meta) {
                        if let Some(db) = self.source.fetch_database().await? {
                            let new_build = db.metadata.build_date;
                            self.destination.store_database(db).await?;
                            log::info!(
                                "{}: updated database from build {} to {}",
                                self.label,
                                dest_meta.build_date,
                                new_build
                            );
                        }
                    }
                }
                self.last_checked = Some(now);
            }
        }
        Ok(())
    }
}
