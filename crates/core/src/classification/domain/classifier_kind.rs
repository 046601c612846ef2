use std::fmt;

use crate::shared::constants::{GENDER_LABELS, RACE_LABELS};

/// The two independent attribute predictions run on every face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClassifierKind {
    Gender,
    Race,
}

impl ClassifierKind {
    /// Submission order within a region.
    pub const ALL: [ClassifierKind; 2] = [ClassifierKind::Gender, ClassifierKind::Race];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierKind::Gender => "gender",
            ClassifierKind::Race => "race",
        }
    }

    /// Labels the stock model for this kind emits, in output order.
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            ClassifierKind::Gender => GENDER_LABELS,
            ClassifierKind::Race => RACE_LABELS,
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
