use thiserror::Error;

use crate::classification::domain::classifier_kind::ClassifierKind;

/// Boxed error returned by injected capabilities. They run on worker threads,
/// so the error has to cross thread boundaries.
pub type SendError = Box<dyn std::error::Error + Send + Sync>;

/// Faults the pipeline absorbs locally.
///
/// None of these reach the caller of `submit_frame` or `render_now`: each is
/// logged and degrades output instead (missing regions, missing labels, or a
/// skipped render). Missing labels are never blurred.
#[derive(Debug, Error)]
pub enum PipelineFault {
    #[error("face detection failed on frame {sequence_id}: {message}")]
    DetectionFailure { sequence_id: u64, message: String },

    #[error("{kind} classification failed for region {region_index} of frame {sequence_id}: {message}")]
    ClassificationFailure {
        sequence_id: u64,
        region_index: usize,
        kind: ClassifierKind,
        message: String,
    },

    #[error("presentation surface is not available")]
    SurfaceUnavailable,
}

impl PipelineFault {
    /// Emits the fault through the `log` facade at warning level.
    pub fn log(&self) {
        log::warn!("{self}");
    }
}
