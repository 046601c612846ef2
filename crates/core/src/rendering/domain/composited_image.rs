use crate::shared::frame::Frame;

/// Output of one render pass, sized to the drawable surface.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositedImage {
    /// Carries the sequence id of the source frame.
    pub frame: Frame,
    /// Uniform fill scale applied to the source frame.
    pub scale: f64,
    /// Where the scaled frame's top-left corner landed. Negative when the
    /// frame overflows the surface and is cropped.
    pub offset_x: i64,
    pub offset_y: i64,
    pub blurred_regions: usize,
    /// Sequence id of the result set used, `None` before the first one.
    pub results_sequence: Option<u64>,
}

impl CompositedImage {
    /// How many frames the labels trail the displayed frame by.
    pub fn result_lag(&self) -> Option<u64> {
        self.results_sequence
            .map(|seq| self.frame.sequence_id().saturating_sub(seq))
    }
}
