use crate::shared::pipeline_fault::SendError;

use super::composited_image::CompositedImage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Somewhere composited frames are shown.
pub trait DisplaySurface {
    /// Current drawable size, `None` while the surface is not ready.
    fn drawable_size(&self) -> Option<SurfaceSize>;

    fn present(&mut self, image: &CompositedImage) -> Result<(), SendError>;
}
