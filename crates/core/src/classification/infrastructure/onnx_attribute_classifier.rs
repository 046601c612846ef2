/// Attribute classifier backed by an ONNX Runtime session.
///
/// Expects the face classifiers this pipeline ships with: a 224×224 RGB
/// input scaled to `[0, 1]` and one score per label. Both NHWC and NCHW
/// inputs are handled; the layout is read from the model's input shape.
use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;

use crate::classification::domain::attribute_classifier::AttributeClassifier;
use crate::classification::domain::classification_result::LabelCandidate;
use crate::shared::constants::CLASSIFIER_INPUT_SIZE;
use crate::shared::frame::Frame;
use crate::shared::onnx_session;
use crate::shared::pipeline_fault::SendError;

const PIXEL_SCALE: f32 = 1.0 / 255.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TensorLayout {
    Nhwc,
    Nchw,
}

pub struct OnnxAttributeClassifier {
    session: Mutex<ort::session::Session>,
    labels: Vec<String>,
    layout: TensorLayout,
}

impl OnnxAttributeClassifier {
    /// Loads a classifier whose output scores line up with `labels`.
    pub fn new(model_path: &Path, labels: &[&str]) -> Result<Self, SendError> {
        if labels.is_empty() {
            return Err("classifier needs at least one label".into());
        }
        let session = onnx_session::open_session(model_path, 1)?;
        let layout = match onnx_session::first_input_shape(&session) {
            Some(shape) if shape.len() == 4 && shape[1] == 3 => TensorLayout::Nchw,
            _ => TensorLayout::Nhwc,
        };
        log::debug!(
            "Classifier {} uses {:?} input with {} labels",
            model_path.display(),
            layout,
            labels.len()
        );
        Ok(Self {
            session: Mutex::new(session),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            layout,
        })
    }
}

impl AttributeClassifier for OnnxAttributeClassifier {
    fn classify(&self, face: &Frame) -> Result<Vec<LabelCandidate>, SendError> {
        let tensor = preprocess(face, self.layout)?;
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        let scores = outputs[0].try_extract_array::<f32>()?;
        let scores: Vec<f32> = scores.iter().copied().collect();

        if scores.len() != self.labels.len() {
            return Err(format!(
                "classifier produced {} scores for {} labels",
                scores.len(),
                self.labels.len()
            )
            .into());
        }
        Ok(pair_with_labels(&self.labels, &to_probabilities(&scores)))
    }
}

/// Nearest-neighbour resize to the classifier input size, scaled to [0, 1].
fn preprocess(face: &Frame, layout: TensorLayout) -> Result<Array4<f32>, SendError> {
    let channels = face.channels() as usize;
    if channels < 3 {
        return Err(format!("classifier needs RGB input, got {channels} channel(s)").into());
    }
    if face.width() == 0 || face.height() == 0 {
        return Err("empty face crop".into());
    }

    let size = CLASSIFIER_INPUT_SIZE;
    let pixels = face.as_ndarray();
    let src_w = face.width() as usize;
    let src_h = face.height() as usize;

    let mut tensor = match layout {
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, size, size, 3)),
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, size, size)),
    };

    for y in 0..size {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / size as f64) as usize).min(src_h - 1);
        for x in 0..size {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / size as f64) as usize).min(src_w - 1);
            for c in 0..3 {
                let value = pixels[[src_y, src_x, c]] as f32 * PIXEL_SCALE;
                match layout {
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                }
            }
        }
    }

    Ok(tensor)
}

/// Passes scores through when they already form a distribution, applies a
/// softmax otherwise.
fn to_probabilities(scores: &[f32]) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    let in_range = scores.iter().all(|s| (0.0..=1.0).contains(s));
    if in_range && (sum - 1.0).abs() < 1e-3 {
        return scores.to_vec();
    }
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

fn pair_with_labels(labels: &[String], probabilities: &[f32]) -> Vec<LabelCandidate> {
    labels
        .iter()
        .zip(probabilities)
        .map(|(label, &p)| LabelCandidate::new(label.clone(), p))
        .collect()
}
