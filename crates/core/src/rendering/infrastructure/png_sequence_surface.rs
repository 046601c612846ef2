use std::fs;
use std::path::{Path, PathBuf};

use image::ExtendedColorType;

use crate::rendering::domain::composited_image::CompositedImage;
use crate::rendering::domain::display_surface::{DisplaySurface, SurfaceSize};
use crate::shared::pipeline_fault::SendError;

/// Stands in for a screen: every presented image is written to
/// `<dir>/frame_<n>.png`, numbered in presentation order.
pub struct PngSequenceSurface {
    dir: PathBuf,
    size: SurfaceSize,
    presented: usize,
}

impl PngSequenceSurface {
    /// Creates `dir` if needed.
    pub fn new(dir: &Path, size: SurfaceSize) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            size,
            presented: 0,
        })
    }

    pub fn presented(&self) -> usize {
        self.presented
    }

    fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("frame_{index:06}.png"))
    }
}

impl DisplaySurface for PngSequenceSurface {
    fn drawable_size(&self) -> Option<SurfaceSize> {
        (!self.size.is_empty() && self.dir.is_dir()).then_some(self.size)
    }

    fn present(&mut self, image: &CompositedImage) -> Result<(), SendError> {
        let frame = &image.frame;
        let color = match frame.channels() {
            3 => ExtendedColorType::Rgb8,
            4 => ExtendedColorType::Rgba8,
            n => return Err(format!("cannot write {n}-channel frame as PNG").into()),
        };
        let path = self.path_for(self.presented);
        image::save_buffer(&path, frame.data(), frame.width(), frame.height(), color)?;
        log::debug!(
            "Presented frame {} ({} blurred) to {}",
            frame.sequence_id(),
            image.blurred_regions,
            path.display()
        );
        self.presented += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::frame::Frame;

    fn composited(frame: Frame) -> CompositedImage {
        CompositedImage {
            frame,
            scale: 1.0,
            offset_x: 0,
            offset_y: 0,
            blurred_regions: 0,
            results_sequence: None,
        }
    }

    #[test]
    fn test_creates_directory_and_reports_size() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("out");
        let surface = PngSequenceSurface::new(&dir, SurfaceSize::new(8, 6)).unwrap();
        assert!(dir.is_dir());
        assert_eq!(surface.drawable_size(), Some(SurfaceSize::new(8, 6)));
    }

    #[test]
    fn test_empty_size_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let surface = PngSequenceSurface::new(tmp.path(), SurfaceSize::new(0, 6)).unwrap();
        assert_eq!(surface.drawable_size(), None);
    }

    #[test]
    fn test_present_writes_numbered_pngs() {
        let tmp = tempfile::tempdir().unwrap();
        let mut surface = PngSequenceSurface::new(tmp.path(), SurfaceSize::new(4, 4)).unwrap();
        surface.present(&composited(Frame::filled(4, 4, 3, 10, 0))).unwrap();
        surface.present(&composited(Frame::filled(4, 4, 4, 20, 1))).unwrap();

        assert_eq!(surface.presented(), 2);
        let first = image::open(tmp.path().join("frame_000000.png")).unwrap().to_rgb8();
        assert_eq!(first.dimensions(), (4, 4));
        assert_eq!(first.get_pixel(0, 0).0, [10, 10, 10]);
        assert!(tmp.path().join("frame_000001.png").exists());
    }

    #[test]
    fn test_present_rejects_grayscale() {
        let tmp = tempfile::tempdir().unwrap();
        let mut surface = PngSequenceSurface::new(tmp.path(), SurfaceSize::new(4, 4)).unwrap();
        assert!(surface.present(&composited(Frame::filled(4, 4, 1, 0, 0))).is_err());
        assert_eq!(surface.presented(), 0);
    }
}
