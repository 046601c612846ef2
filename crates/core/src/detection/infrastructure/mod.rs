pub mod onnx_face_detector;
