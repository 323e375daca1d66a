use std::time::Duration;

use bon::Builder;

pub(crate) const DEFAULT_RSSI_CHANGE_THRESHOLD: u16 = 5;
pub(crate) const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(15);

/// Tunables for a [`crate::Central`].
///
/// ```
/// use std::time::Duration;
///
/// let config = blecentral::CentralConfig::builder()
///     .discovery_timeout(Duration::from_secs(10))
///     .build();
/// assert_eq!(5, config.rssi_change_threshold());
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Builder)]
pub struct CentralConfig {
    /// Minimum RSSI delta, exclusive, that re-announces a known peripheral.
    #[builder(default = DEFAULT_RSSI_CHANGE_THRESHOLD)]
    rssi_change_threshold: u16,
    /// Bound on one service discovery pass.
    #[builder(default = DEFAULT_DISCOVERY_TIMEOUT)]
    discovery_timeout: Duration,
    /// Scan duration used when callers do not pass one.
    #[builder(default = DEFAULT_SCAN_TIMEOUT)]
    default_scan_timeout: Duration,
}

impl CentralConfig {
    #[must_use]
    pub fn rssi_change_threshold(&self) -> u16 {
        self.rssi_change_threshold
    }

    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    #[must_use]
    pub fn default_scan_timeout(&self) -> Duration {
        self.default_scan_timeout
    }
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
