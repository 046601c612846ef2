use image::imageops::{self, FilterType};
use image::{ImageBuffer, Pixel, Rgb, Rgba};

use crate::blurring::domain::frame_blurrer::FrameBlurrer;
use crate::inference::domain::frame_result_set::FrameResultSet;
use crate::shared::face_region::PixelRect;
use crate::shared::frame::Frame;
use crate::shared::pipeline_fault::PipelineFault;

use super::domain::composited_image::CompositedImage;
use super::domain::display_surface::{DisplaySurface, SurfaceSize};
use super::domain::exemption_policy::ExemptionPolicy;
use super::domain::render_source::RenderSource;

/// Blurs non-exempt faces over the current frame and fits the result to a
/// drawable surface.
///
/// The result set used may lag the frame by any number of frames. Regions
/// are normalized, so they are mapped onto the current frame's dimensions
/// as they are.
pub struct Compositor {
    blurrer: Box<dyn FrameBlurrer>,
    policy: ExemptionPolicy,
}

impl Compositor {
    pub fn new(blurrer: Box<dyn FrameBlurrer>, policy: ExemptionPolicy) -> Self {
        Self { blurrer, policy }
    }

    /// Renders the current frame for a `target` sized surface.
    ///
    /// `None` when no frame has been received yet, the target is empty or
    /// the frame cannot be composited. The source frame is never modified.
    pub fn render_now(&self, source: &dyn RenderSource, target: SurfaceSize) -> Option<CompositedImage> {
        if target.is_empty() {
            PipelineFault::SurfaceUnavailable.log();
            return None;
        }
        let frame = source.current_frame()?;
        let results = source.latest_results();

        let rects = self.blur_targets(&frame, results.as_deref());
        let mut accumulator = Frame::clone(&frame);
        if let Err(e) = self.blurrer.blur(&mut accumulator, &rects) {
            // Showing the frame unblurred would expose faces meant to be hidden.
            log::warn!("Blur failed on frame {}, skipping render: {e}", frame.sequence_id());
            return None;
        }

        let fitted = match fit_to_surface(&accumulator, target) {
            Some(fitted) => fitted,
            None => {
                log::warn!(
                    "Cannot composite frame {} with {} channel(s)",
                    frame.sequence_id(),
                    frame.channels()
                );
                return None;
            }
        };

        Some(CompositedImage {
            frame: fitted.frame,
            scale: fitted.scale,
            offset_x: fitted.offset_x,
            offset_y: fitted.offset_y,
            blurred_regions: rects.len(),
            results_sequence: results.map(|r| r.sequence_id()),
        })
    }

    /// Renders for `surface` and presents the result. An unavailable
    /// surface or a failed present is logged and otherwise ignored.
    pub fn render_to(
        &self,
        source: &dyn RenderSource,
        surface: &mut dyn DisplaySurface,
    ) -> Option<CompositedImage> {
        let Some(size) = surface.drawable_size() else {
            PipelineFault::SurfaceUnavailable.log();
            return None;
        };
        let image = self.render_now(source, size)?;
        if let Err(e) = surface.present(&image) {
            log::warn!("Presenting frame {} failed: {e}", image.frame.sequence_id());
            return None;
        }
        Some(image)
    }

    /// Pixel bounds of every face the policy wants blurred, in detection
    /// order.
    fn blur_targets(&self, frame: &Frame, results: Option<&FrameResultSet>) -> Vec<PixelRect> {
        let Some(results) = results else {
            return Vec::new();
        };
        results
            .faces()
            .iter()
            .filter(|face| self.policy.requires_blur(face))
            .map(|face| face.region.to_pixel_rect(frame.width(), frame.height()))
            .filter(|rect| !rect.is_empty())
            .collect()
    }
}

struct Fitted {
    frame: Frame,
    scale: f64,
    offset_x: i64,
    offset_y: i64,
}

/// Aspect-fill: scale uniformly by `max(dw/iw, dh/ih)` and center, cropping
/// whatever overflows.
fn fill_geometry(image_w: u32, image_h: u32, target: SurfaceSize) -> (f64, u32, u32, i64, i64) {
    let iw = image_w.max(1) as f64;
    let ih = image_h.max(1) as f64;
    let scale = (target.width as f64 / iw).max(target.height as f64 / ih);
    let scaled_w = ((iw * scale).round() as u32).max(1);
    let scaled_h = ((ih * scale).round() as u32).max(1);
    let offset_x = (target.width as i64 - scaled_w as i64) / 2;
    let offset_y = (target.height as i64 - scaled_h as i64) / 2;
    (scale, scaled_w, scaled_h, offset_x, offset_y)
}

fn fit_to_surface(frame: &Frame, target: SurfaceSize) -> Option<Fitted> {
    match frame.channels() {
        3 => fit_pixels::<Rgb<u8>>(frame, target),
        4 => fit_pixels::<Rgba<u8>>(frame, target),
        _ => None,
    }
}

fn fit_pixels<P>(frame: &Frame, target: SurfaceSize) -> Option<Fitted>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let (scale, scaled_w, scaled_h, offset_x, offset_y) =
        fill_geometry(frame.width(), frame.height(), target);

    let source: ImageBuffer<P, Vec<u8>> =
        ImageBuffer::from_raw(frame.width(), frame.height(), frame.data().to_vec())?;
    let scaled = if (scaled_w, scaled_h) == (frame.width(), frame.height()) {
        source
    } else {
        imageops::resize(&source, scaled_w, scaled_h, FilterType::Triangle)
    };

    let mut canvas: ImageBuffer<P, Vec<u8>> = ImageBuffer::new(target.width, target.height);
    imageops::replace(&mut canvas, &scaled, offset_x, offset_y);

    Some(Fitted {
        frame: Frame::new(
            canvas.into_raw(),
            target.width,
            target.height,
            frame.channels(),
            frame.sequence_id(),
        ),
        scale,
        offset_x,
        offset_y,
    })
}
