use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const LOGICAL_BITS: u32 = 16;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// Hybrid logical clock owned by one fabric instance.
///
/// Combines wall-clock milliseconds with a logical counter so that:
/// - every timestamp issued is strictly greater than the previous one
/// - timestamps stay close to wall-clock time
///
/// Physical and logical parts are packed into a single atomic word, so the
/// advance is one CAS loop and two racing callers can never observe the same
/// value.
pub struct FabricClock {
    state: AtomicU64,
}

/// Timestamp issued by a [`FabricClock`].
///
/// Totally ordered: physical → logical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the Unix epoch.
    pub physical: u64,
    /// Counter disambiguating timestamps within one millisecond.
    pub logical: u16,
}

impl Timestamp {
    #[cfg(test)]
    fn pack(self) -> u64 {
        (self.physical << LOGICAL_BITS) | self.logical as u64
    }

    fn unpack(raw: u64) -> Self {
        Self {
            physical: raw >> LOGICAL_BITS,
            logical: (raw & LOGICAL_MASK) as u16,
        }
    }

    /// Wall-clock view of this timestamp (millisecond precision).
    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.physical as i64).unwrap_or_default()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}+{}",
            self.to_datetime().to_rfc3339_opts(SecondsFormat::Millis, true),
            self.logical
        )
    }
}

fn wall_clock_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn advance(prev: u64, wall_ms: u64) -> u64 {
    let candidate = wall_ms << LOGICAL_BITS;
    if candidate > prev {
        candidate
    } else {
        // Logical overflow carries into the physical part, which keeps
        // the sequence strictly increasing.
        prev + 1
    }
}

impl FabricClock {
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(wall_clock_ms() << LOGICAL_BITS),
        }
    }

    /// Generate a new timestamp. Strictly greater than every earlier one.
    pub fn now(&self) -> Timestamp {
        let wall = wall_clock_ms();
        let prev = match self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                Some(advance(prev, wall))
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        Timestamp::unpack(advance(prev, wall))
    }

    /// Last issued timestamp, without advancing.
    pub fn last(&self) -> Timestamp {
        Timestamp::unpack(self.state.load(Ordering::Acquire))
    }
}

impl Default for FabricClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn strictly_monotonic() {
        let clock = FabricClock::new();
        let mut prev = clock.now();
        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn logical_overflow_carries() {
        let prev = Timestamp {
            physical: 1_000,
            logical: u16::MAX,
        }
        .pack();
        let next = Timestamp::unpack(advance(prev, 500));
        assert_eq!(next.physical, 1_001);
        assert_eq!(next.logical, 0);
    }

    #[test]
    fn concurrent_callers_never_collide() {
        let clock = Arc::new(FabricClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || (0..2_000).map(|_| clock.now()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for ts in h.join().unwrap() {
                assert!(seen.insert(ts), "duplicate timestamp {}", ts);
            }
        }
        assert_eq!(seen.len(), 8_000);
    }

    #[test]
    fn display_is_rfc3339_with_counter() {
        let ts = Timestamp {
            physical: 0,
            logical: 2,
        };
        assert_eq!(ts.to_string(), "1970-01-01T00:00:00.000Z+2");
    }
}
