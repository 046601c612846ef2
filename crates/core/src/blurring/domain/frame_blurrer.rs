use crate::shared::face_region::PixelRect;
use crate::shared::frame::Frame;
use crate::shared::pipeline_fault::SendError;

/// Applies blur to pixel rectangles of a frame, in place.
///
/// Rectangles are processed in the order given. Parts of a rectangle that
/// fall outside the frame are ignored.
pub trait FrameBlurrer: Send {
    fn blur(&self, frame: &mut Frame, regions: &[PixelRect]) -> Result<(), SendError>;
}
