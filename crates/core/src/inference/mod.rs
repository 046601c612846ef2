pub mod domain;
pub mod inference_coordinator;
pub mod infrastructure;
