pub mod constants;
pub mod face_region;
pub mod frame;
pub mod model_resolver;
pub mod onnx_session;
pub mod pipeline_fault;
pub mod settings;
