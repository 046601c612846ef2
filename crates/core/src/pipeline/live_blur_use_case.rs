use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::inference::domain::cycle_phase::Admission;
use crate::inference::domain::session_stats::SessionStats;
use crate::inference::inference_coordinator::InferenceCoordinator;
use crate::rendering::compositor::Compositor;
use crate::rendering::domain::composited_image::CompositedImage;
use crate::rendering::domain::display_surface::DisplaySurface;
use crate::shared::frame::Frame;
use crate::source::domain::frame_source::FrameSource;

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// When the compositor runs relative to incoming frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderCadence {
    /// One render per admitted frame.
    #[default]
    AdmittedFrames,
    /// One render per offered frame, so dropped frames are still shown.
    EveryFrame,
}

impl RenderCadence {
    fn should_render(&self, admission: Admission) -> bool {
        match self {
            RenderCadence::AdmittedFrames => admission.is_admitted(),
            RenderCadence::EveryFrame => true,
        }
    }
}

/// What a finished session did.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    pub frames: usize,
    pub rendered: usize,
    pub source_errors: usize,
    /// Whether all inference work finished before the drain timeout.
    pub drained: bool,
    pub stats: SessionStats,
}

/// Drives frames from a source through the coordinator and presents one
/// composited image per render trigger.
///
/// The producer side (this loop) never waits on inference: frames are
/// offered, admitted or dropped, and rendered with whatever results are
/// current at that moment.
pub struct LiveBlurUseCase {
    coordinator: InferenceCoordinator,
    compositor: Compositor,
    surface: Box<dyn DisplaySurface>,
    cadence: RenderCadence,
    drain_timeout: Duration,
    cancelled: Arc<AtomicBool>,
}

impl LiveBlurUseCase {
    pub fn new(
        coordinator: InferenceCoordinator,
        compositor: Compositor,
        surface: Box<dyn DisplaySurface>,
        cadence: RenderCadence,
        cancelled: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            coordinator,
            compositor,
            surface,
            cadence,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            cancelled: cancelled.unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
        }
    }

    /// How long `execute` waits for in-flight work once the source ends.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn coordinator(&self) -> &InferenceCoordinator {
        &self.coordinator
    }

    /// Offers one frame and renders if the cadence calls for it.
    pub fn offer(&mut self, frame: Frame) -> (Admission, Option<CompositedImage>) {
        let admission = self.coordinator.submit_frame(frame);
        if !self.cadence.should_render(admission) {
            return (admission, None);
        }

        let started = Instant::now();
        let image = self
            .compositor
            .render_to(&self.coordinator, self.surface.as_mut());
        let render_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Some(image) = &image {
            self.coordinator.with_pipeline_logger(|logger| {
                logger.timing("render", render_ms);
                logger.metric("blurred", image.blurred_regions as f64);
            });
        }
        (admission, image)
    }

    /// Runs until the source is exhausted or the session is cancelled, then
    /// waits for in-flight inference to settle.
    pub fn execute(&mut self, source: &mut dyn FrameSource) -> SessionReport {
        let total = source.len_hint().unwrap_or(0);
        let mut frames = 0;
        let mut rendered = 0;
        let mut source_errors = 0;

        while !self.cancelled.load(Ordering::Relaxed) {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Skipping unreadable frame: {e}");
                    source_errors += 1;
                    continue;
                }
            };
            frames += 1;
            let (_, image) = self.offer(frame);
            if image.is_some() {
                rendered += 1;
            }
            self.coordinator
                .with_pipeline_logger(|logger| logger.progress(frames, total));
        }

        let drained = self.coordinator.wait_for_quiescence(self.drain_timeout);
        if !drained {
            log::warn!(
                "Inference still in flight after {:?}; last results may be missing",
                self.drain_timeout
            );
        }
        self.coordinator.with_pipeline_logger(|logger| logger.summary());

        SessionReport {
            frames,
            rendered,
            source_errors,
            drained,
            stats: self.coordinator.stats(),
        }
    }
}
