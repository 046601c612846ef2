use serde::{Deserialize, Serialize};

use crate::inference::domain::frame_result_set::ResolvedFace;
use crate::shared::constants::{DEFAULT_EXEMPT_GENDER, DEFAULT_EXEMPT_RACE};

/// The single (gender, race) outcome whose faces stay unblurred.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExemptLabelPair {
    pub gender: String,
    pub race: String,
}

impl ExemptLabelPair {
    pub fn new(gender: impl Into<String>, race: impl Into<String>) -> Self {
        Self {
            gender: gender.into(),
            race: race.into(),
        }
    }

    /// Case-insensitive match on both labels.
    pub fn matches(&self, gender: &str, race: &str) -> bool {
        self.gender.trim().eq_ignore_ascii_case(gender.trim())
            && self.race.trim().eq_ignore_ascii_case(race.trim())
    }
}

impl Default for ExemptLabelPair {
    fn default() -> Self {
        Self::new(DEFAULT_EXEMPT_GENDER, DEFAULT_EXEMPT_RACE)
    }
}

/// Decides which resolved faces get blurred: every face except those whose
/// labels equal the exempt pair.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExemptionPolicy {
    exempt: ExemptLabelPair,
}

impl ExemptionPolicy {
    pub fn new(exempt: ExemptLabelPair) -> Self {
        Self { exempt }
    }

    pub fn requires_blur(&self, face: &ResolvedFace) -> bool {
        !self.exempt.matches(&face.gender.label, &face.race.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::domain::classification_result::ClassificationResult;
    use crate::classification::domain::classifier_kind::ClassifierKind;
    use crate::shared::face_region::FaceRegion;
    use rstest::rstest;

    fn face(gender: &str, race: &str) -> ResolvedFace {
        let region = FaceRegion::new(0.25, 0.25, 0.25, 0.25, 1);
        let result = |kind, label: &str| ClassificationResult {
            region_index: 0,
            region,
            kind,
            label: label.to_string(),
            confidence: 0.75,
        };
        ResolvedFace {
            index: 0,
            region,
            gender: result(ClassifierKind::Gender, gender),
            race: result(ClassifierKind::Race, race),
        }
    }

    #[test]
    fn test_default_pair() {
        assert_eq!(ExemptLabelPair::default(), ExemptLabelPair::new("Man", "white"));
    }

    #[rstest]
    #[case("Man", "white", false)]
    #[case("man", "WHITE", false)]
    #[case(" Man ", "white", false)]
    #[case("Woman", "white", true)]
    #[case("Man", "asian", true)]
    #[case("Woman", "latino hispanic", true)]
    fn test_default_policy(#[case] gender: &str, #[case] race: &str, #[case] blurred: bool) {
        assert_eq!(ExemptionPolicy::default().requires_blur(&face(gender, race)), blurred);
    }

    #[rstest]
    #[case("WOMAN", "Asian", true)]
    #[case("woman", " asian", true)]
    #[case("Woman", "asian indian", false)]
    #[case("Wo man", "asian", false)]
    #[case("", "asian", false)]
    fn test_pair_matching_ignores_only_case_and_padding(
        #[case] gender: &str,
        #[case] race: &str,
        #[case] matches: bool,
    ) {
        assert_eq!(ExemptLabelPair::new("Woman", "asian").matches(gender, race), matches);
    }

    #[test]
    fn test_custom_pair() {
        let policy = ExemptionPolicy::new(ExemptLabelPair::new("Woman", "middle eastern"));
        assert!(!policy.requires_blur(&face("Woman", "Middle Eastern")));
        assert!(policy.requires_blur(&face("Man", "white")));
    }

    #[test]
    fn test_pair_serializes_as_object() {
        let json = serde_json::to_string(&ExemptLabelPair::default()).unwrap();
        assert_eq!(json, r#"{"gender":"Man","race":"white"}"#);
    }
}
