/// Running counters for one coordinator session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub admitted: u64,
    pub dropped: u64,
    /// Cycles that reached quiescence and published a result set.
    pub completed: u64,
    /// Cycles force-reset by the stall timeout.
    pub abandoned: u64,
    pub detection_failures: u64,
    pub classification_failures: u64,
}

impl SessionStats {
    pub fn frames_offered(&self) -> u64 {
        self.admitted + self.dropped
    }

    /// Share of offered frames that were dropped, in `[0, 1]`.
    pub fn drop_rate(&self) -> f64 {
        let offered = self.frames_offered();
        if offered == 0 {
            0.0
        } else {
            self.dropped as f64 / offered as f64
        }
    }
}
