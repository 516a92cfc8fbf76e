use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique request ids of the form `req_<32 hex>`.
///
/// A random 128-bit seed is mixed with a monotonically increasing counter,
/// so ids never repeat within a process and differ across restarts.
pub(crate) struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub(crate) fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let uuid = uuid::Uuid::from_u128(self.seed ^ u128::from(seq));
        let mut out = String::with_capacity(4 + 32);
        out.push_str("req_");
        out.push_str(uuid.simple().encode_lower(&mut uuid::Uuid::encode_buffer()));
        out
    }
}
