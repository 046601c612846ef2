use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;
use crate::shared::pipeline_fault::SendError;
use crate::source::domain::frame_source::FrameSource;

/// Replays a directory of still images, sorted by file name, as a camera
/// feed. With a frame rate set, frames are released no faster than that
/// rate, the way a device delivers them.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    position: usize,
    next_sequence: u64,
    frame_interval: Option<Duration>,
    last_emitted: Option<Instant>,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, fps: Option<f64>) -> Result<Self, SendError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| format!("cannot read {}: {e}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(format!("no images found in {}", dir.display()).into());
        }
        log::info!("Found {} image(s) in {}", paths.len(), dir.display());
        Ok(Self::from_paths(paths, fps))
    }

    pub fn from_paths(paths: Vec<PathBuf>, fps: Option<f64>) -> Self {
        let frame_interval = fps
            .filter(|f| f.is_finite() && *f > 0.0)
            .map(|f| Duration::from_secs_f64(1.0 / f));
        Self {
            paths,
            position: 0,
            next_sequence: 0,
            frame_interval,
            last_emitted: None,
        }
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_emitted) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_emitted = Some(Instant::now());
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SendError> {
        let Some(path) = self.paths.get(self.position).cloned() else {
            return Ok(None);
        };
        self.position += 1;
        self.pace();

        let sequence_id = self.next_sequence;
        self.next_sequence += 1;

        let img = image::open(&path)
            .map_err(|e| format!("cannot decode {}: {e}", path.display()))?
            .to_rgb8();
        let (width, height) = img.dimensions();
        Ok(Some(Frame::try_new(img.into_raw(), width, height, 3, sequence_id)?))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.paths.len())
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
