use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;

use super::events::ScannedDevice;
use crate::hw::{DiscoveredPeripheral, PeripheralId};

/// Result of folding one advertisement into the registry.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum UpsertOutcome {
    New,
    SignalChanged,
    Unchanged,
}

impl UpsertOutcome {
    pub(crate) fn should_announce(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Debug)]
struct RegistryEntry {
    peripheral: DiscoveredPeripheral,
    last_announced_rssi: i16,
    first_seen: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    discovered: HashMap<PeripheralId, RegistryEntry>,
    remembered: HashSet<PeripheralId>,
    next_sequence: u64,
}

/// Discovered peripherals for the current scan plus every id seen this process.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeviceRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl DeviceRegistry {
    /// Upserts one observation atomically and decides whether it is news.
    pub(crate) fn upsert(
        &self,
        id: &PeripheralId,
        display_name: &str,
        rssi: i16,
        rssi_change_threshold: u16,
    ) -> UpsertOutcome {
        let now = OffsetDateTime::now_utc();
        let mut state = self.lock();
        state.remembered.insert(id.clone());

        if let Some(entry) = state.discovered.get_mut(id) {
            entry.peripheral.observe(display_name.to_string(), rssi, now);
            if rssi.abs_diff(entry.last_announced_rssi) > rssi_change_threshold {
                entry.last_announced_rssi = rssi;
                return UpsertOutcome::SignalChanged;
            }
            return UpsertOutcome::Unchanged;
        }

        let first_seen = state.next_sequence;
        state.next_sequence += 1;
        state.discovered.insert(
            id.clone(),
            RegistryEntry {
                peripheral: DiscoveredPeripheral::new(
                    id.clone(),
                    display_name.to_string(),
                    rssi,
                    now,
                ),
                last_announced_rssi: rssi,
                first_seen,
            },
        );
        UpsertOutcome::New
    }

    /// Forgets the current scan's peripherals but keeps remembered ids.
    pub(crate) fn clear(&self) {
        self.lock().discovered.clear();
    }

    /// Wipes both discovered and remembered peripherals.
    pub(crate) fn reset(&self) {
        let mut state = self.lock();
        state.discovered.clear();
        state.remembered.clear();
    }

    pub(crate) fn remember(&self, id: &PeripheralId) {
        self.lock().remembered.insert(id.clone());
    }

    pub(crate) fn is_known(&self, id: &PeripheralId) -> bool {
        let state = self.lock();
        state.discovered.contains_key(id) || state.remembered.contains(id)
    }

    /// Returns discovered peripherals in first-seen order.
    pub(crate) fn snapshot(&self) -> Vec<DiscoveredPeripheral> {
        let state = self.lock();
        let mut entries: Vec<&RegistryEntry> = state.discovered.values().collect();
        entries.sort_by_key(|entry| entry.first_seen);
        entries
            .into_iter()
            .map(|entry| entry.peripheral.clone())
            .collect()
    }

    pub(crate) fn scanned_devices(&self) -> Vec<ScannedDevice> {
        self.snapshot()
            .into_iter()
            .map(|peripheral| ScannedDevice {
                id: peripheral.id().clone(),
                name: peripheral.display_name().to_string(),
                rssi: peripheral.last_rssi(),
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(-60, UpsertOutcome::Unchanged)]
    #[case(-65, UpsertOutcome::Unchanged)]
    #[case(-55, UpsertOutcome::Unchanged)]
    #[case(-66, UpsertOutcome::SignalChanged)]
    #[case(-54, UpsertOutcome::SignalChanged)]
    fn repeat_advertisement_is_news_only_beyond_threshold(
        #[case] rssi: i16,
        #[case] expected: UpsertOutcome,
    ) {
        let registry = DeviceRegistry::default();
        let id = PeripheralId::from("AA:BB");

        assert_eq!(UpsertOutcome::New, registry.upsert(&id, "Scale", -60, 5));
        assert_eq!(expected, registry.upsert(&id, "Scale", rssi, 5));
        assert_eq!(1, registry.snapshot().len());
    }

    #[test]
    fn damping_compares_against_last_announced_value() {
        let registry = DeviceRegistry::default();
        let id = PeripheralId::from("AA:BB");

        registry.upsert(&id, "Scale", -60, 5);
        assert_eq!(UpsertOutcome::Unchanged, registry.upsert(&id, "Scale", -63, 5));
        assert_eq!(UpsertOutcome::Unchanged, registry.upsert(&id, "Scale", -65, 5));
        assert_eq!(UpsertOutcome::SignalChanged, registry.upsert(&id, "Scale", -66, 5));
        assert_eq!(-66, registry.snapshot()[0].last_rssi());
    }

    #[test]
    fn unannounced_observations_still_refresh_entry() {
        let registry = DeviceRegistry::default();
        let id = PeripheralId::from("AA:BB");

        registry.upsert(&id, "Unknown", -60, 5);
        registry.upsert(&id, "Scale", -61, 5);

        let peripheral = &registry.snapshot()[0];
        assert_eq!("Scale", peripheral.display_name());
        assert_eq!(-61, peripheral.last_rssi());
    }

    #[test]
    fn clear_keeps_remembered_ids() {
        let registry = DeviceRegistry::default();
        let id = PeripheralId::from("AA:BB");
        registry.upsert(&id, "Scale", -60, 5);

        registry.clear();

        assert!(registry.snapshot().is_empty());
        assert!(registry.is_known(&id));

        registry.reset();
        assert!(!registry.is_known(&id));
    }

    #[test]
    fn snapshot_preserves_first_seen_order() {
        let registry = DeviceRegistry::default();
        for id in ["CC", "AA", "BB"] {
            registry.upsert(&id.into(), id, -50, 5);
        }
        registry.upsert(&"AA".into(), "AA", -20, 5);

        let ids: Vec<String> = registry
            .scanned_devices()
            .into_iter()
            .map(|device| device.id.to_string())
            .collect();
        assert_eq!(vec!["CC", "AA", "BB"], ids);
    }
}
