pub mod blurring;
pub mod classification;
pub mod detection;
pub mod inference;
pub mod pipeline;
pub mod rendering;
pub mod shared;
pub mod source;
