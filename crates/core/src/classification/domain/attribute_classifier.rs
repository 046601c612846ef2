use std::sync::Arc;

use crate::shared::frame::Frame;
use crate::shared::pipeline_fault::SendError;

use super::classification_result::LabelCandidate;
use super::classifier_kind::ClassifierKind;

/// Domain interface for a single attribute classifier.
///
/// Receives the cropped face and returns every candidate label it
/// considered. An empty list is a valid answer ("nothing usable"). Calls
/// arrive from worker threads, possibly concurrently, hence `Sync`.
pub trait AttributeClassifier: Send + Sync {
    fn classify(&self, face: &Frame) -> Result<Vec<LabelCandidate>, SendError>;
}

/// The pair of classifiers run on every region, addressed by kind.
#[derive(Clone)]
pub struct ClassifierSet {
    gender: Arc<dyn AttributeClassifier>,
    race: Arc<dyn AttributeClassifier>,
}

impl ClassifierSet {
    pub fn new(gender: Arc<dyn AttributeClassifier>, race: Arc<dyn AttributeClassifier>) -> Self {
        Self { gender, race }
    }

    pub fn get(&self, kind: ClassifierKind) -> &Arc<dyn AttributeClassifier> {
        match kind {
            ClassifierKind::Gender => &self.gender,
            ClassifierKind::Race => &self.race,
        }
    }

    pub fn classify(
        &self,
        kind: ClassifierKind,
        face: &Frame,
    ) -> Result<Vec<LabelCandidate>, SendError> {
        self.get(kind).classify(face)
    }
}
