//! Storage guard — keeps the key/value store writable under quota pressure.
//!
//! Browsers cap `localStorage` around 5 MB and reject writes past it with a
//! quota exception. The guard probes for headroom before the pipeline
//! persists anything, and on exhaustion runs a two-phase eviction:
//!
//! 1. remove the pipeline's own log keys, on the theory that diagnostics
//!    data is always sacrificial;
//! 2. if the store is still nearly full, remove the largest WB keys until
//!    at least a megabyte is reclaimed, never touching configuration or
//!    settings keys.
//!
//! The store itself sits behind [`KeyValueStore`], so the policy is tested
//! against an in-memory quota-enforcing implementation.

use crate::error::StorageError;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Throwaway key written to probe for quota headroom.
pub const QUOTA_PROBE_KEY: &str = "wb-event-log-quota-test";
/// Value written under the probe key.
const QUOTA_PROBE_VALUE: &str = "test";

/// Store size past which phase-two eviction runs, in bytes.
pub const AGGRESSIVE_THRESHOLD_BYTES: u64 = 4_718_592; // 4.5 MB
/// Phase-two eviction stops once this much has been reclaimed.
pub const TARGET_REMOVAL_BYTES: u64 = 1_048_576; // 1 MB
/// Size assumed when the store cannot report one.
pub const ASSUMED_FULL_BYTES: u64 = 5_242_880; // 5 MB

// =============================================================================
// KeyValueStore
// =============================================================================

/// String key/value store with localStorage-like semantics.
///
/// Entry size is measured in characters of key plus value, matching how
/// browsers account quota.
pub trait KeyValueStore: Send + Sync {
    /// All keys, in unspecified order.
    fn keys(&self) -> Vec<String>;

    fn get(&self, key: &str) -> Option<String>;

    /// Insert or replace. Fails with [`StorageError::QuotaExceeded`] when
    /// the write would not fit.
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Missing keys fail with [`StorageError::KeyNotFound`].
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;

    /// Total stored size in bytes, or `None` when the store cannot say.
    fn estimated_size(&self) -> Option<u64> {
        let mut total = 0u64;
        for key in self.keys() {
            let value_len = self.get(&key).map_or(0, |v| v.len() as u64);
            total += key.len() as u64 + value_len;
        }
        Some(total)
    }
}

/// In-memory [`KeyValueStore`] with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
    quota_bytes: Option<u64>,
    /// When set, `estimated_size` reports `None`.
    opaque_size: bool,
}

impl MemoryStore {
    /// Unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects writes once `quota_bytes` is reached.
    #[must_use]
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            quota_bytes: Some(quota_bytes),
            opaque_size: false,
        }
    }

    /// Make `estimated_size` report `None`, simulating a backend that
    /// cannot enumerate its contents.
    pub fn hide_size(&mut self) {
        self.opaque_size = true;
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn used_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota_bytes {
            let existing = self
                .entries
                .get(key)
                .map_or(0, |v| (key.len() + v.len()) as u64);
            let needed = (key.len() + value.len()) as u64;
            if self.used_bytes() - existing + needed > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed: needed as usize,
                });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))
    }

    fn estimated_size(&self) -> Option<u64> {
        if self.opaque_size {
            None
        } else {
            Some(self.used_bytes())
        }
    }
}

// =============================================================================
// StorageGuard
// =============================================================================

/// Outcome of an emergency cleanup run.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// Log-specific keys removed in phase one.
    pub log_keys_removed: Vec<String>,
    /// Largest-first WB keys removed in phase two.
    pub bulk_keys_removed: Vec<String>,
    /// Total bytes reclaimed across both phases.
    pub bytes_reclaimed: u64,
    /// Whether phase two ran at all.
    pub aggressive_ran: bool,
}

impl CleanupReport {
    /// Total keys removed across both phases.
    #[must_use]
    pub fn keys_removed(&self) -> usize {
        self.log_keys_removed.len() + self.bulk_keys_removed.len()
    }
}

/// Quota probe and two-phase eviction policy.
#[derive(Debug, Clone)]
pub struct StorageGuard {
    aggressive_threshold_bytes: u64,
    target_removal_bytes: u64,
}

impl Default for StorageGuard {
    fn default() -> Self {
        Self {
            aggressive_threshold_bytes: AGGRESSIVE_THRESHOLD_BYTES,
            target_removal_bytes: TARGET_REMOVAL_BYTES,
        }
    }
}

impl StorageGuard {
    /// Guard with custom thresholds, for tests and embedded stores smaller
    /// than a browser's.
    #[must_use]
    pub fn with_thresholds(aggressive_threshold_bytes: u64, target_removal_bytes: u64) -> Self {
        Self {
            aggressive_threshold_bytes,
            target_removal_bytes,
        }
    }

    /// Probe the store for headroom; on quota exhaustion, run the cleanup
    /// and report what was evicted.
    ///
    /// Returns `None` when the store has room (or fails for a non-quota
    /// reason, which is not the guard's problem to solve).
    pub fn check(&self, store: &mut dyn KeyValueStore) -> Option<CleanupReport> {
        match store.set(QUOTA_PROBE_KEY, QUOTA_PROBE_VALUE) {
            Ok(()) => {
                // Probe fit; leave no residue.
                let _ = store.remove(QUOTA_PROBE_KEY);
                None
            }
            Err(err) if err.is_quota_exceeded() => {
                warn!("storage quota exceeded, performing emergency cleanup");
                Some(self.emergency_cleanup(store))
            }
            Err(err) => {
                warn!(%err, "storage probe failed for a non-quota reason");
                None
            }
        }
    }

    /// Two-phase eviction. Phase one drops log keys; phase two, entered
    /// only when the store is still nearly full, drops the largest WB keys
    /// until the removal target is met.
    pub fn emergency_cleanup(&self, store: &mut dyn KeyValueStore) -> CleanupReport {
        let mut report = CleanupReport::default();

        // Phase 1: diagnostics data is always sacrificial.
        let log_keys: Vec<String> = store
            .keys()
            .into_iter()
            .filter(|key| is_log_key(key))
            .collect();
        for key in log_keys {
            let size = entry_size(store, &key);
            // Individual removal failures do not stop the sweep.
            if store.remove(&key).is_ok() {
                debug!(%key, size, "removed log key");
                report.bytes_reclaimed += size;
                report.log_keys_removed.push(key);
            }
        }

        // Phase 2: still nearly full means log keys were not the problem.
        let estimated = store.estimated_size().unwrap_or(ASSUMED_FULL_BYTES);
        if estimated > self.aggressive_threshold_bytes {
            report.aggressive_ran = true;
            self.aggressive_cleanup(store, &mut report);
        }

        warn!(
            removed = report.keys_removed(),
            reclaimed = report.bytes_reclaimed,
            aggressive = report.aggressive_ran,
            "emergency cleanup completed"
        );
        report
    }

    fn aggressive_cleanup(&self, store: &mut dyn KeyValueStore, report: &mut CleanupReport) {
        let mut sized: Vec<(String, u64)> = store
            .keys()
            .into_iter()
            .map(|key| {
                let size = entry_size(store, &key);
                (key, size)
            })
            .collect();
        // Largest first, so the fewest removals meet the target.
        sized.sort_by(|a, b| b.1.cmp(&a.1));

        let mut removed = 0u64;
        for (key, size) in sized {
            if removed >= self.target_removal_bytes {
                break;
            }
            if is_protected_key(&key) {
                continue;
            }
            if store.remove(&key).is_ok() {
                debug!(%key, size, "aggressively removed key");
                removed += size;
                report.bulk_keys_removed.push(key);
            }
        }
        report.bytes_reclaimed += removed;
    }
}

fn entry_size(store: &dyn KeyValueStore, key: &str) -> u64 {
    key.len() as u64 + store.get(key).map_or(0, |v| v.len() as u64)
}

/// Phase-one selector: the pipeline's own persisted data.
fn is_log_key(key: &str) -> bool {
    key.starts_with("wb-event-log") || (key.starts_with("wb-") && key.contains("log"))
}

/// Phase-two skip rule: only WB keys are candidates, and configuration or
/// settings keys are never evicted.
fn is_protected_key(key: &str) -> bool {
    !key.contains("wb-") || key.contains("config") || key.contains("settings")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(store: &mut MemoryStore, key: &str, bytes: usize) {
        let value = "x".repeat(bytes.saturating_sub(key.len()));
        store.set(key, &value).unwrap();
    }

    // -- MemoryStore ------------------------------------------------------------

    #[test]
    fn quota_rejects_oversized_write() {
        let mut store = MemoryStore::with_quota(100);
        store.set("a", &"x".repeat(50)).unwrap();
        let err = store.set("b", &"y".repeat(60)).unwrap_err();
        assert!(err.is_quota_exceeded());
        // Replacing an existing entry accounts for the freed bytes.
        store.set("a", &"z".repeat(90)).unwrap();
    }

    #[test]
    fn remove_missing_key_reports_not_found() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            store.remove("ghost"),
            Err(StorageError::KeyNotFound(_))
        ));
    }

    // -- Probe ------------------------------------------------------------------

    #[test]
    fn probe_with_headroom_leaves_no_residue() {
        let guard = StorageGuard::default();
        let mut store = MemoryStore::with_quota(1_000);
        fill(&mut store, "wb-theme", 100);
        assert!(guard.check(&mut store).is_none());
        assert!(store.get(QUOTA_PROBE_KEY).is_none());
        assert_eq!(store.len(), 1);
    }

    // -- Phase 1 ----------------------------------------------------------------

    #[test]
    fn exhausted_store_drops_log_keys_first() {
        let guard = StorageGuard::default();
        // Quota small enough that the probe write fails.
        let mut store = MemoryStore::with_quota(600);
        fill(&mut store, "wb-event-log-entries", 300);
        fill(&mut store, "wb-session-log", 200);
        fill(&mut store, "wb-theme", 90);

        let report = guard.check(&mut store).expect("cleanup should run");
        assert_eq!(report.log_keys_removed.len(), 2);
        assert!(report.log_keys_removed.contains(&"wb-event-log-entries".to_string()));
        assert!(report.log_keys_removed.contains(&"wb-session-log".to_string()));
        assert!(!report.aggressive_ran);
        // Unrelated data untouched.
        assert!(store.get("wb-theme").is_some());
        assert_eq!(report.bytes_reclaimed, 500);
    }

    // -- Phase 2 ----------------------------------------------------------------

    #[test]
    fn aggressive_phase_removes_largest_wb_keys_until_target() {
        // Tiny thresholds stand in for the browser-scale defaults.
        let guard = StorageGuard::with_thresholds(400, 300);
        let mut store = MemoryStore::with_quota(1_000);
        fill(&mut store, "wb-palette-cache", 400);
        fill(&mut store, "wb-draft", 250);
        fill(&mut store, "wb-color-picker-config", 200);
        fill(&mut store, "unrelated-app-data", 120);
        // Fill to the quota so the probe fails.
        let headroom = 1_000 - 970 - QUOTA_PROBE_KEY.len() as u64;
        fill(&mut store, "wb-pad", headroom as usize);

        let report = guard.check(&mut store).expect("cleanup should run");
        assert!(report.aggressive_ran);
        // Largest first: palette cache alone exceeds the 300-byte target.
        assert_eq!(report.bulk_keys_removed, vec!["wb-palette-cache".to_string()]);
        // Config and non-WB keys survive.
        assert!(store.get("wb-color-picker-config").is_some());
        assert!(store.get("unrelated-app-data").is_some());
        assert!(store.get("wb-draft").is_some());
    }

    #[test]
    fn protected_keys_never_evicted_even_when_target_unmet() {
        let guard = StorageGuard::with_thresholds(10, 10_000);
        let mut store = MemoryStore::with_quota(500);
        fill(&mut store, "wb-editor-settings", 250);
        fill(&mut store, "wb-global-config", 200);
        fill(&mut store, "other", 40);

        let report = guard.check(&mut store).expect("cleanup should run");
        assert!(report.aggressive_ran);
        assert!(report.bulk_keys_removed.is_empty());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn unknown_size_assumes_full_and_runs_aggressive_phase() {
        let guard = StorageGuard::default();
        let mut store = MemoryStore::with_quota(300);
        fill(&mut store, "wb-draft", 280);
        store.hide_size();

        let report = guard.check(&mut store).expect("cleanup should run");
        // 5 MB assumption exceeds the 4.5 MB threshold.
        assert!(report.aggressive_ran);
        assert_eq!(report.bulk_keys_removed, vec!["wb-draft".to_string()]);
    }

    // -- Selectors --------------------------------------------------------------

    #[test]
    fn log_key_selector() {
        assert!(is_log_key("wb-event-log-entries"));
        assert!(is_log_key("wb-audit-log"));
        assert!(!is_log_key("wb-theme"));
        assert!(!is_log_key("app-log")); // not a WB key
    }

    #[test]
    fn protected_key_selector() {
        assert!(is_protected_key("user-data")); // not WB, never touched
        assert!(is_protected_key("wb-editor-config"));
        assert!(is_protected_key("wb-app-settings"));
        assert!(!is_protected_key("wb-palette-cache"));
    }
}
