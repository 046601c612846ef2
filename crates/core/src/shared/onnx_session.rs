use std::path::Path;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

use super::pipeline_fault::SendError;

/// Opens an ONNX Runtime session with the platform's preferred execution
/// provider (CoreML on macOS, DirectML on Windows, CPU elsewhere).
///
/// `intra_threads` bounds the per-inference thread count. Several sessions
/// run side by side in this pipeline, so callers keep it small.
pub fn open_session(model_path: &Path, intra_threads: usize) -> Result<Session, SendError> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_inter_threads(1)?
        .with_intra_threads(intra_threads.max(1))?
        .with_execution_providers(preferred_execution_providers())?
        .commit_from_file(model_path)?;
    log::info!("Loaded ONNX model {}", model_path.display());
    Ok(session)
}

/// Input tensor shape of the session's first input, when it is static.
pub fn first_input_shape(session: &Session) -> Option<Vec<i64>> {
    session.inputs().first().and_then(|input| {
        if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
            Some(shape.iter().copied().collect())
        } else {
            None
        }
    })
}

fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}
