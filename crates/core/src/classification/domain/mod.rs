pub mod attribute_classifier;
pub mod classification_result;
pub mod classifier_kind;
