use crate::classification::domain::classification_result::ClassificationResult;
use crate::classification::domain::classifier_kind::ClassifierKind;
use crate::shared::face_region::FaceRegion;

/// A detected face with both attribute labels resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedFace {
    /// Position in the detector's output for the originating frame.
    pub index: usize,
    pub region: FaceRegion,
    pub gender: ClassificationResult,
    pub race: ClassificationResult,
}

impl ResolvedFace {
    pub fn label(&self, kind: ClassifierKind) -> &str {
        match kind {
            ClassifierKind::Gender => &self.gender.label,
            ClassifierKind::Race => &self.race.label,
        }
    }
}

/// The published outcome of one completed inference cycle.
///
/// Only built once every classification task of the cycle has finished.
/// Faces missing either label are left out and counted in `unresolved`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameResultSet {
    sequence_id: u64,
    faces: Vec<ResolvedFace>,
    unresolved: usize,
}

impl FrameResultSet {
    pub fn empty(sequence_id: u64) -> Self {
        Self {
            sequence_id,
            faces: Vec::new(),
            unresolved: 0,
        }
    }

    /// Pairs each region with its gender and race slots. Slices are indexed
    /// by region; a slot shorter than `regions` counts as missing.
    pub fn assemble(
        sequence_id: u64,
        regions: &[FaceRegion],
        gender: &[Option<ClassificationResult>],
        race: &[Option<ClassificationResult>],
    ) -> Self {
        let mut faces = Vec::with_capacity(regions.len());
        let mut unresolved = 0;

        for (index, region) in regions.iter().enumerate() {
            let g = gender.get(index).cloned().flatten();
            let r = race.get(index).cloned().flatten();
            match (g, r) {
                (Some(gender), Some(race)) => faces.push(ResolvedFace {
                    index,
                    region: *region,
                    gender,
                    race,
                }),
                _ => unresolved += 1,
            }
        }

        Self {
            sequence_id,
            faces,
            unresolved,
        }
    }

    /// Sequence id of the frame this set was computed from.
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Resolved faces in detection order.
    pub fn faces(&self) -> &[ResolvedFace] {
        &self.faces
    }

    pub fn unresolved(&self) -> usize {
        self.unresolved
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}
