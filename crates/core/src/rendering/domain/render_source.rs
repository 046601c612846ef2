use std::sync::Arc;

use crate::inference::domain::frame_result_set::FrameResultSet;
use crate::shared::frame::Frame;

/// What the compositor reads on each render trigger. The two values are
/// read independently and may belong to different frames.
pub trait RenderSource {
    /// Most recently offered frame, admitted or not.
    fn current_frame(&self) -> Option<Arc<Frame>>;

    /// Latest completed result set.
    fn latest_results(&self) -> Option<Arc<FrameResultSet>>;
}
