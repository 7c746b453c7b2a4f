// Monotonic notification identifiers.
use std::sync::atomic::{AtomicU32, Ordering};

/// Allocates the 32-bit identifiers APNs echoes back in error frames.
///
/// Identifiers are strictly increasing for the life of the allocator and
/// wrap only after 2^32 sends. The allocator is owned by a [`crate::Client`]
/// rather than living as process-global state; callers that want explicit
/// identifiers simply construct notifications with their own values.
///
/// ```
/// use apns_client::IdAllocator;
///
/// let ids = IdAllocator::default();
/// assert_eq!(ids.next(), 1);
/// assert_eq!(ids.next(), 2);
/// ```
#[derive(Debug, Default)]
pub struct IdAllocator {
    counter: AtomicU32,
}

impl IdAllocator {
    /// Reserve and return the next identifier.
    pub fn next(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn identifiers_increase_monotonically() {
        let ids = IdAllocator::default();
        let first = ids.next();
        let second = ids.next();
        assert!(second > first);
    }

    #[test]
    fn wraps_after_the_counter_is_exhausted() {
        let ids = IdAllocator {
            counter: AtomicU32::new(u32::MAX),
        };
        assert_eq!(ids.next(), 0);
        assert_eq!(ids.next(), 1);
    }

    #[tokio::test]
    async fn concurrent_allocations_never_collide() {
        let ids = Arc::new(IdAllocator::default());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let ids = ids.clone();
            tasks.push(tokio::spawn(async move {
                (0..1_000).map(|_| ids.next()).collect::<Vec<_>>()
            }));
        }
        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.expect("join"));
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 8 * 1_000);
    }
}
