//! Global atomic counters for Mnemos observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a CLI command).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

macro_rules! counters {
    ($($field:ident => $inc:ident),+ $(,)?) => {
        /// Lightweight atomic counters, no allocations and no locking.
        pub struct Metrics {
            $($field: AtomicU64,)+
        }

        impl Metrics {
            pub const fn new() -> Self {
                Self {
                    $($field: AtomicU64::new(0),)+
                }
            }

            $(
                pub fn $inc(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(metric = stringify!($field), "counter incremented");
                }

                pub fn $field(&self) -> u64 {
                    self.$field.load(Ordering::Relaxed)
                }
            )+

            /// Emit all current counter values as a single `info!` event.
            ///
            /// Call this at natural boundaries rather than on every increment.
            pub fn flush(&self) {
                tracing::info!(metric = "flush", $($field = self.$field(),)+);
            }

            /// Reset all counters to zero (useful in tests).
            pub fn reset(&self) {
                $(self.$field.store(0, Ordering::Relaxed);)+
            }
        }
    };
}

counters! {
    memories_created => inc_memories_created,
    versions_committed => inc_versions_committed,
    memories_tombstoned => inc_memories_tombstoned,
    conflicts_detected => inc_conflicts_detected,
    conflicts_resolved => inc_conflicts_resolved,
    decisions_recorded => inc_decisions_recorded,
    decisions_verified => inc_decisions_verified,
    replays_executed => inc_replays,
    retries => inc_retries,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
