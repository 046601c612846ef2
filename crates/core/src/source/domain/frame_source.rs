use crate::shared::frame::Frame;
use crate::shared::pipeline_fault::SendError;

/// Produces frames in capture order with increasing sequence ids.
pub trait FrameSource: Send {
    /// Next frame, `Ok(None)` once the source is exhausted. An error skips
    /// one frame; the source stays usable.
    fn next_frame(&mut self) -> Result<Option<Frame>, SendError>;

    /// Total frame count, when known up front.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}
