//! Process-unique log entry identifiers.
//!
//! Ids follow the `event-{timestamp_ms}-{suffix}` shape the rest of the WB
//! component family expects in `wb-event-logged` notice payloads. The suffix
//! is nine base36 characters of randomness plus an atomic counter tiebreak,
//! so two entries created in the same millisecond still get distinct ids.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic tiebreak for same-millisecond ids.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

const SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn base36_suffix(mut value: u64) -> String {
    let mut out = [b'0'; SUFFIX_LEN];
    for slot in out.iter_mut().rev() {
        *slot = BASE36[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Generate a process-unique entry id for the given capture timestamp.
#[must_use]
pub fn generate_id(timestamp_ms: u64) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let entropy: u64 = rand::rng().random();
    // Fold the counter into the random suffix so same-ms ids never collide
    // even with an unlucky RNG.
    let suffix = base36_suffix(entropy ^ seq.rotate_left(17));
    format!("event-{timestamp_ms}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn id_has_expected_shape() {
        let id = generate_id(1_700_000_000_123);
        assert!(id.starts_with("event-1700000000123-"));
        let suffix = id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn same_millisecond_ids_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1_000 {
            assert!(seen.insert(generate_id(42)));
        }
    }

    #[test]
    fn base36_pads_to_width() {
        assert_eq!(base36_suffix(0), "000000000");
        assert_eq!(base36_suffix(35), "00000000z");
        assert_eq!(base36_suffix(36), "000000010");
    }
}
