use crate::shared::face_region::FaceRegion;
use crate::shared::frame::Frame;
use crate::shared::pipeline_fault::SendError;

/// Domain interface for face detection.
///
/// The coordinator runs `detect` on a worker thread and feeds the outcome
/// back into its detection-complete step exactly once per admitted frame.
/// Regions are returned in detection order; that order is kept all the way
/// to the compositor.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, SendError>;
}
