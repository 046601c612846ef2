use std::sync::{Arc, PoisonError, RwLock};

use crate::inference::domain::frame_result_set::FrameResultSet;

/// Latest completed result set, swapped atomically as a whole.
///
/// One writer (the coordinator) publishes; any number of readers take a
/// cheap `Arc` clone. Readers never observe a set under construction.
#[derive(Default)]
pub struct ResultSnapshot {
    slot: RwLock<Slot>,
}

#[derive(Default)]
struct Slot {
    version: u64,
    latest: Option<Arc<FrameResultSet>>,
}

impl ResultSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current set and returns the new version number.
    pub fn publish(&self, set: Arc<FrameResultSet>) -> u64 {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.version += 1;
        slot.latest = Some(set);
        slot.version
    }

    pub fn latest(&self) -> Option<Arc<FrameResultSet>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone()
    }

    /// Number of sets published so far.
    pub fn version(&self) -> u64 {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty() {
        let snapshot = ResultSnapshot::new();
        assert!(snapshot.latest().is_none());
        assert_eq!(snapshot.version(), 0);
    }

    #[test]
    fn test_publish_replaces_and_bumps_version() {
        let snapshot = ResultSnapshot::new();
        assert_eq!(snapshot.publish(Arc::new(FrameResultSet::empty(1))), 1);
        assert_eq!(snapshot.publish(Arc::new(FrameResultSet::empty(2))), 2);
        assert_eq!(snapshot.latest().unwrap().sequence_id(), 2);
        assert_eq!(snapshot.version(), 2);
    }

    #[test]
    fn test_readers_keep_their_copy() {
        let snapshot = ResultSnapshot::new();
        snapshot.publish(Arc::new(FrameResultSet::empty(1)));
        let held = snapshot.latest().unwrap();
        snapshot.publish(Arc::new(FrameResultSet::empty(2)));
        assert_eq!(held.sequence_id(), 1);
    }
}
