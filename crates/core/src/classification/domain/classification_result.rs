use crate::shared::face_region::FaceRegion;

use super::classifier_kind::ClassifierKind;

/// One raw `(label, confidence)` pair produced by a classifier invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelCandidate {
    pub label: String,
    pub confidence: f32,
}

impl LabelCandidate {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// The resolved outcome of one classification task.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    pub region_index: usize,
    pub region: FaceRegion,
    pub kind: ClassifierKind,
    pub label: String,
    /// Always within `[0, 1]`.
    pub confidence: f32,
}

impl ClassificationResult {
    /// Collapses a classifier's candidates into a single result: the highest
    /// confidence wins, the earliest candidate wins a tie. Candidates with a
    /// non-finite confidence are ignored. `None` when nothing usable remains.
    pub fn from_candidates(
        region_index: usize,
        region: FaceRegion,
        kind: ClassifierKind,
        candidates: &[LabelCandidate],
    ) -> Option<Self> {
        let best = candidates
            .iter()
            .filter(|c| c.confidence.is_finite())
            .fold(None::<&LabelCandidate>, |best, c| match best {
                Some(b) if c.confidence <= b.confidence => Some(b),
                _ => Some(c),
            })?;

        Some(Self {
            region_index,
            region,
            kind,
            label: best.label.clone(),
            confidence: best.confidence.clamp(0.0, 1.0),
        })
    }
}
