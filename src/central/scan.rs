use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::events::{BleEvent, EventEmitter};
use super::registry::DeviceRegistry;
use crate::error::ScanError;
use crate::hw::{Advertisement, BleDriver, UNKNOWN_DEVICE_NAME};

#[derive(Debug)]
struct ActiveScan {
    generation: u64,
    name_filter: Option<String>,
    timer: CancellationToken,
}

#[derive(Debug, Default)]
struct ScanState {
    active: Option<ActiveScan>,
    generation: u64,
}

#[derive(Debug)]
struct ScanInner {
    driver: Arc<dyn BleDriver>,
    registry: DeviceRegistry,
    emitter: EventEmitter,
    rssi_change_threshold: u16,
    state: Mutex<ScanState>,
}

/// Owns the discovery scan lifecycle.
#[derive(Debug, Clone)]
pub(crate) struct ScanSession {
    inner: Arc<ScanInner>,
}

impl ScanSession {
    pub(crate) fn new(
        driver: Arc<dyn BleDriver>,
        registry: DeviceRegistry,
        emitter: EventEmitter,
        rssi_change_threshold: u16,
    ) -> Self {
        Self {
            inner: Arc::new(ScanInner {
                driver,
                registry,
                emitter,
                rssi_change_threshold,
                state: Mutex::new(ScanState::default()),
            }),
        }
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Starts a scan that stops itself after `timeout`.
    #[instrument(skip(self), level = "debug")]
    pub(crate) async fn start(
        &self,
        name_filter: Option<&str>,
        timeout: Duration,
    ) -> Result<(), ScanError> {
        self.check_preconditions().await?;

        let name_filter = name_filter
            .map(str::trim)
            .filter(|filter| !filter.is_empty())
            .map(str::to_lowercase);
        let (generation, timer) = {
            let mut state = self.lock();
            if state.active.is_some() {
                debug!("scan already in progress");
                return Ok(());
            }

            self.inner.registry.clear();
            state.generation += 1;
            let generation = state.generation;
            let timer = CancellationToken::new();
            state.active = Some(ActiveScan {
                generation,
                name_filter: name_filter.clone(),
                timer: timer.clone(),
            });
            (generation, timer)
        };

        if let Err(error) = self.inner.driver.begin_scan(name_filter.as_deref()).await {
            warn!(?error, "driver refused to start scanning");
            self.deactivate(Some(generation));
            return Err(ScanError::Driver(error));
        }

        self.spawn_timeout(generation, timer, timeout);
        info!("scan started");
        Ok(())
    }

    /// Stops the active scan. Stopping an idle session succeeds.
    #[instrument(skip(self), level = "debug")]
    pub(crate) async fn stop(&self) -> Result<(), ScanError> {
        self.stop_generation(None).await
    }

    async fn stop_generation(&self, expected: Option<u64>) -> Result<(), ScanError> {
        if self.deactivate(expected).is_none() {
            trace!("no matching scan to stop");
            return Ok(());
        }

        self.inner
            .driver
            .end_scan()
            .await
            .map_err(ScanError::Driver)?;
        info!("scan stopped");
        Ok(())
    }

    /// Folds one advertisement into the registry and announces news.
    pub(crate) fn on_advertisement(&self, advertisement: Advertisement) {
        let name_filter = {
            let state = self.lock();
            let Some(active) = state.active.as_ref() else {
                trace!(
                    peripheral = %advertisement.peripheral,
                    "ignoring advertisement outside a scan"
                );
                return;
            };
            active.name_filter.clone()
        };

        if !matches_name_filter(advertisement.name.as_deref(), name_filter.as_deref()) {
            return;
        }

        let display_name = advertisement
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_DEVICE_NAME);
        let outcome = self.inner.registry.upsert(
            &advertisement.peripheral,
            display_name,
            advertisement.rssi,
            self.inner.rssi_change_threshold,
        );
        if !outcome.should_announce() {
            return;
        }

        debug!(
            peripheral = %advertisement.peripheral,
            name = display_name,
            rssi = advertisement.rssi,
            ?outcome,
            "announcing scan result"
        );
        self.inner.emitter.emit(BleEvent::ScanResult {
            devices: self.inner.registry.scanned_devices(),
        });
    }

    /// Handles an asynchronous scan failure raised by the driver.
    pub(crate) fn on_scan_failed(&self, code: i32, message: String) {
        warn!(code, %message, "scan failed");
        self.deactivate(None);
        self.inner.emitter.emit(BleEvent::ScanError { code, message });
    }

    async fn check_preconditions(&self) -> Result<(), ScanError> {
        let driver = &self.inner.driver;
        if !driver.radio_is_ready().await {
            return Err(ScanError::RadioUnavailable);
        }
        if !driver.has_required_permissions().await {
            return Err(ScanError::PermissionDenied);
        }
        if !driver.location_services_enabled().await {
            return Err(ScanError::LocationServiceDisabled);
        }
        Ok(())
    }

    fn spawn_timeout(&self, generation: u64, timer: CancellationToken, timeout: Duration) {
        let session = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = sleep(timeout) => {
                    debug!(generation, "scan timeout reached");
                    if let Err(error) = session.stop_generation(Some(generation)).await {
                        warn!(?error, "failed to stop scan after timeout");
                    }
                }
            }
        });
    }

    /// Marks the session idle and cancels its timer.
    fn deactivate(&self, expected: Option<u64>) -> Option<ActiveScan> {
        let mut state = self.lock();
        let matches = state
            .active
            .as_ref()
            .is_some_and(|active| {
                expected.is_none_or(|generation| generation == active.generation)
            });
        if !matches {
            return None;
        }

        let active = state.active.take()?;
        active.timer.cancel();
        Some(active)
    }

    fn lock(&self) -> MutexGuard<'_, ScanState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Case-insensitive substring match. `filter` must already be lowercase.
fn matches_name_filter(name: Option<&str>, filter: Option<&str>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    name.is_some_and(|name| name.to_lowercase().contains(filter))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Some("KGiTON Scale 01"), Some("scale"), true)]
    #[case(Some("kgiton-scale"), Some("kgiton"), true)]
    #[case(Some("My KGITON"), Some("kgiton"), true)]
    #[case(Some("Speaker"), Some("kgiton"), false)]
    #[case(None, Some("kgiton"), false)]
    #[case(None, None, true)]
    #[case(Some("Speaker"), None, true)]
    fn name_filter_is_case_insensitive_substring(
        #[case] name: Option<&str>,
        #[case] filter: Option<&str>,
        #[case] expected: bool,
    ) {
        assert_eq!(expected, matches_name_filter(name, filter));
    }
}
