/// YOLO face detector using ONNX Runtime via `ort`.
///
/// Letterboxes the frame into the model input, filters raw detections by
/// confidence, suppresses overlaps and returns normalized regions ordered by
/// confidence (highest first).
use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;

use crate::detection::domain::region_detector::RegionDetector;
use crate::shared::face_region::FaceRegion;
use crate::shared::frame::Frame;
use crate::shared::onnx_session;
use crate::shared::pipeline_fault::SendError;

/// Fallback input resolution when the model does not declare one.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Overlap above which the weaker of two detections is dropped.
const NMS_IOU_THRESH: f64 = 0.45;

/// YOLO pads with 114 gray.
const PAD_VALUE: f32 = 114.0 / 255.0;

pub struct OnnxFaceDetector {
    session: Mutex<ort::session::Session>,
    confidence: f64,
    input_size: u32,
}

impl OnnxFaceDetector {
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, SendError> {
        let intra_threads = std::thread::available_parallelism()
            .map(|n| n.get() / 2)
            .unwrap_or(1);
        let session = onnx_session::open_session(model_path, intra_threads)?;
        let input_size = onnx_session::first_input_shape(&session)
            .filter(|shape| shape.len() >= 4 && shape[2] > 0)
            .map(|shape| shape[2] as u32)
            .unwrap_or(DEFAULT_INPUT_SIZE);
        log::info!("Face detector input size {input_size}, confidence {confidence}");
        Ok(Self {
            session: Mutex::new(session),
            confidence,
            input_size,
        })
    }
}

impl RegionDetector for OnnxFaceDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, SendError> {
        if frame.channels() < 3 {
            return Err(format!("detector needs RGB input, got {} channel(s)", frame.channels()).into());
        }
        let (input, letterbox) = letterbox(frame, self.input_size);
        let input_value = ort::value::Tensor::from_array(input)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("face model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(format!("Unexpected face model output shape: {shape:?}").into());
        }
        // Either [1, features, detections] or [1, detections, features].
        let transposed = shape[1] < shape[2];
        let (num_dets, num_feats) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if num_feats < 5 {
            return Err(format!("face model rows carry {num_feats} values, need 5").into());
        }
        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;
        let value = |det: usize, feat: usize| -> f64 {
            if transposed {
                data[feat * num_dets + det] as f64
            } else {
                data[det * num_feats + feat] as f64
            }
        };

        let mut candidates: Vec<(f64, FaceRegion)> = Vec::new();
        for det in 0..num_dets {
            let conf = value(det, 4);
            if conf < self.confidence {
                continue;
            }
            let (cx, cy, w, h) = (value(det, 0), value(det, 1), value(det, 2), value(det, 3));
            let corners = letterbox.to_frame((cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0));
            let region =
                FaceRegion::from_pixel_corners(corners, frame.width(), frame.height(), frame.sequence_id());
            if region.area() > 0.0 {
                candidates.push((conf, region));
            }
        }

        Ok(suppress_overlaps(candidates, NMS_IOU_THRESH))
    }
}

/// Geometry of a letterboxed model input.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f64,
    pad_x: f64,
    pad_y: f64,
}

impl Letterbox {
    /// Maps model-space corners back onto the source frame.
    fn to_frame(&self, corners: (f64, f64, f64, f64)) -> (f64, f64, f64, f64) {
        let (x1, y1, x2, y2) = corners;
        (
            (x1 - self.pad_x) / self.scale,
            (y1 - self.pad_y) / self.scale,
            (x2 - self.pad_x) / self.scale,
            (y2 - self.pad_y) / self.scale,
        )
    }
}

fn letterbox(frame: &Frame, target_size: u32) -> (Array4<f32>, Letterbox) {
    let fw = frame.width().max(1) as f64;
    let fh = frame.height().max(1) as f64;
    let target = target_size as usize;

    let scale = (target_size as f64 / fw).min(target_size as f64 / fh);
    let new_w = ((fw * scale).round() as usize).min(target);
    let new_h = ((fh * scale).round() as usize).min(target);
    let pad_x = (target - new_w) / 2;
    let pad_y = (target - new_h) / 2;

    let mut tensor = Array4::<f32>::from_elem((1, 3, target, target), PAD_VALUE);
    let src = frame.as_ndarray();
    let src_w = frame.width() as usize;
    let src_h = frame.height() as usize;

    if src_w > 0 && src_h > 0 {
        for y in 0..new_h {
            let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
            for x in 0..new_w {
                let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
                for c in 0..3 {
                    tensor[[0, c, pad_y + y, pad_x + x]] = src[[src_y, src_x, c]] as f32 / 255.0;
                }
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x: pad_x as f64,
            pad_y: pad_y as f64,
        },
    )
}

/// Greedy NMS: strongest first, drop anything overlapping a kept region by
/// more than `iou_thresh`.
fn suppress_overlaps(mut candidates: Vec<(f64, FaceRegion)>, iou_thresh: f64) -> Vec<FaceRegion> {
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<FaceRegion> = Vec::with_capacity(candidates.len());
    for (_, region) in candidates {
        if kept.iter().all(|k| k.iou(&region) <= iou_thresh) {
            kept.push(region);
        }
    }
    kept
}
