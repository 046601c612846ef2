pub mod onnx_attribute_classifier;
