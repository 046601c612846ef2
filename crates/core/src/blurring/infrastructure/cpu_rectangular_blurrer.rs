use std::cell::RefCell;

use crate::blurring::domain::frame_blurrer::FrameBlurrer;
use crate::shared::face_region::PixelRect;
use crate::shared::frame::Frame;
use crate::shared::pipeline_fault::SendError;
use crate::shared::settings::DEFAULT_BLUR_STRENGTH;

use super::gaussian::{self, GaussianKernel};

/// CPU blurrer that applies a separable Gaussian over each whole rectangle.
///
/// ROI and scratch buffers are reused across regions and frames, so one
/// blurrer should stay with the thread that renders.
pub struct CpuRectangularBlurrer {
    kernel: GaussianKernel,
    roi_buf: RefCell<Vec<u8>>,
    blur_temp: RefCell<Vec<f32>>,
}

impl CpuRectangularBlurrer {
    /// `kernel_size` is forced odd.
    pub fn new(kernel_size: usize) -> Self {
        Self {
            kernel: GaussianKernel::new(kernel_size.max(1) | 1),
            roi_buf: RefCell::new(Vec::new()),
            blur_temp: RefCell::new(Vec::new()),
        }
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel.size()
    }
}

impl Default for CpuRectangularBlurrer {
    fn default() -> Self {
        Self::new(DEFAULT_BLUR_STRENGTH)
    }
}

impl FrameBlurrer for CpuRectangularBlurrer {
    fn blur(&self, frame: &mut Frame, regions: &[PixelRect]) -> Result<(), SendError> {
        let fw = frame.width();
        let fh = frame.height();
        let channels = frame.channels() as usize;
        let data = frame.data_mut();

        let mut roi = self
            .roi_buf
            .try_borrow_mut()
            .map_err(|e| format!("blur buffer busy: {e}"))?;
        let mut temp = self
            .blur_temp
            .try_borrow_mut()
            .map_err(|e| format!("blur buffer busy: {e}"))?;

        for &rect in regions {
            let Some(rect) = clip_to_frame(rect, fw, fh) else {
                continue;
            };
            gaussian::extract_roi(data, fw as usize, channels, rect, &mut roi);
            self.kernel.blur_in_place(
                &mut roi,
                rect.width as usize,
                rect.height as usize,
                channels,
                &mut temp,
            );
            gaussian::write_roi_back(data, &roi, fw as usize, channels, rect);
        }

        Ok(())
    }
}

fn clip_to_frame(rect: PixelRect, frame_w: u32, frame_h: u32) -> Option<PixelRect> {
    if rect.x >= frame_w || rect.y >= frame_h {
        return None;
    }
    let clipped = PixelRect {
        x: rect.x,
        y: rect.y,
        width: rect.width.min(frame_w - rect.x),
        height: rect.height.min(frame_h - rect.y),
    };
    (!clipped.is_empty()).then_some(clipped)
}
