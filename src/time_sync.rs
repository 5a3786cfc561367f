//! Nanosecond timestamps for message ids.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

struct Anchor {
    instant: Instant,
    unix_ns: u128,
}

fn anchor() -> &'static Anchor {
    static ANCHOR: OnceLock<Anchor> = OnceLock::new();
    ANCHOR.get_or_init(|| Anchor {
        unix_ns: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos()),
        instant: Instant::now(),
    })
}

/// UNIX time in nanoseconds, read once from the wall clock and advanced with
/// `Instant`, so it never steps backwards when the system clock is adjusted.
#[inline]
pub fn now_unix_ns() -> u64 {
    let a = anchor();
    let ns = a.unix_ns.saturating_add(a.instant.elapsed().as_nanos());
    u64::try_from(ns).unwrap_or(u64::MAX)
}

/// A clock that never returns the same value twice to its owner.
///
/// If two reads land on the same nanosecond (or the platform clock is
/// coarser than that), the second read is bumped one past the first.
#[derive(Debug, Default)]
pub struct UniqueNanos {
    last: u64,
}

impl UniqueNanos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self) -> u64 {
        let now = now_unix_ns();
        self.last = now.max(self.last.saturating_add(1));
        self.last
    }
}
