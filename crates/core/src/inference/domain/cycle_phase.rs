use std::fmt;

/// Where the coordinator is within one admitted frame's inference cycle.
///
/// `Idle → Admitted → Detecting → Classifying → Idle`; a frame with no faces
/// goes straight from `Detecting` back to `Idle`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CyclePhase {
    #[default]
    Idle,
    Admitted,
    Detecting,
    Classifying,
}

impl CyclePhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, CyclePhase::Idle)
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Admitted => "admitted",
            CyclePhase::Detecting => "detecting",
            CyclePhase::Classifying => "classifying",
        };
        f.write_str(name)
    }
}

/// Outcome of offering a frame to the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The frame started a new inference cycle.
    Admitted,
    /// Work was still in flight; the frame is displayed but not analysed.
    Dropped,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}
