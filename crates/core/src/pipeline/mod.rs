pub mod live_blur_use_case;
pub mod pipeline_logger;
