pub const YOLO_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const YOLO_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

/// Labels emitted by the gender classifier, in model output order.
pub const GENDER_LABELS: &[&str] = &["Woman", "Man"];

/// Labels emitted by the race classifier, in model output order.
pub const RACE_LABELS: &[&str] = &[
    "asian",
    "indian",
    "black",
    "white",
    "middle eastern",
    "latino hispanic",
];

pub const DEFAULT_EXEMPT_GENDER: &str = "Man";
pub const DEFAULT_EXEMPT_RACE: &str = "white";

/// Concurrent classification tasks allowed across the whole session.
pub const DEFAULT_CLASSIFICATION_PERMITS: usize = 2;

/// Side length of the square classifier input.
pub const CLASSIFIER_INPUT_SIZE: usize = 224;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
