//! Feature schema for the caries model.
//!
//! The schema is a fixed constant shared by training and serving. The
//! position of a feature in [`CARIES_SCHEMA`] is its column index in the
//! feature matrix, and the position of a level inside a categorical
//! feature is the integer code the model receives.

/// Probability cutoff above which the label is positive.
///
/// A probability exactly equal to the threshold maps to label `0`.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Column carrying the positive-class probability in scored output.
pub const PROBABILITY_COLUMN: &str = "predict_proba";

/// Column carrying the thresholded label in scored output.
pub const LABEL_COLUMN: &str = "prediction";

/// Derive the binary label from a positive-class probability.
pub fn label_for(probability: f64) -> u8 {
    if probability > DECISION_THRESHOLD {
        1
    } else {
        0
    }
}

/// Kind of a single feature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// Closed, ordered set of permitted string levels
    Categorical(&'static [&'static str]),
    /// Real or integer value, passed through as f64
    Numeric,
}

/// One named column of the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub kind: FeatureKind,
}

impl FeatureSpec {
    pub const fn categorical(name: &'static str, levels: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: FeatureKind::Categorical(levels),
        }
    }

    pub const fn numeric(name: &'static str) -> Self {
        Self {
            name,
            kind: FeatureKind::Numeric,
        }
    }

    /// Code of `value` within this feature's levels, if categorical and known.
    pub fn code_of(&self, value: &str) -> Option<u32> {
        match self.kind {
            FeatureKind::Categorical(levels) => {
                levels.iter().position(|&l| l == value).map(|p| p as u32)
            }
            FeatureKind::Numeric => None,
        }
    }
}

/// Versioned, ordered set of features the model was fit on.
#[derive(Debug, PartialEq, Eq)]
pub struct FeatureSchema {
    pub version: &'static str,
    pub features: &'static [FeatureSpec],
}

impl FeatureSchema {
    /// Number of columns in the feature matrix.
    pub fn width(&self) -> usize {
        self.features.len()
    }

    /// Feature names in column order.
    pub fn feature_names(&self) -> Vec<&'static str> {
        self.features.iter().map(|f| f.name).collect()
    }

    /// Look up a feature by name.
    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Column index of a feature.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|f| f.name == name)
    }

    /// Whether `names` is exactly this schema's column list, in order.
    pub fn matches_signature<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.len() == self.features.len()
            && names
                .iter()
                .zip(self.features)
                .all(|(n, f)| n.as_ref() == f.name)
    }
}

const RACE: &[&str] = &["chinese", "malay", "indian"];
const GENDER: &[&str] = &["male", "female"];
const MOTHER_OCCUPATION: &[&str] = &["professional", "non-professional"];
const HOUSEHOLD_INCOME: &[&str] = &["<4000", ">=4000"];
const MOTHER_EDU: &[&str] = &["no education", "primary/secondary", "university"];
const DELIVERY_TYPE: &[&str] = &["normal", "not normal"];
const NO_YES: &[&str] = &["No", "Yes"];

/// Schema the caries classifier is trained and served with.
///
/// Column order matches the training frame: the target column is
/// dropped and every remaining column keeps its original position.
pub static CARIES_SCHEMA: FeatureSchema = FeatureSchema {
    version: "caries-v1",
    features: &[
        FeatureSpec::categorical("race", RACE),
        FeatureSpec::numeric("age"),
        FeatureSpec::categorical("gender", GENDER),
        FeatureSpec::numeric("breast_feeding_month"),
        FeatureSpec::categorical("mother_occupation", MOTHER_OCCUPATION),
        FeatureSpec::categorical("household_income", HOUSEHOLD_INCOME),
        FeatureSpec::categorical("mother_edu", MOTHER_EDU),
        FeatureSpec::categorical("delivery_type", DELIVERY_TYPE),
        FeatureSpec::categorical("smoke_mother", NO_YES),
        FeatureSpec::categorical("night_bottle_feeding", NO_YES),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_column_order() {
        assert_eq!(
            CARIES_SCHEMA.feature_names(),
            vec![
                "race",
                "age",
                "gender",
                "breast_feeding_month",
                "mother_occupation",
                "household_income",
                "mother_edu",
                "delivery_type",
                "smoke_mother",
                "night_bottle_feeding",
            ]
        );
        assert_eq!(CARIES_SCHEMA.width(), 10);
    }

    #[test]
    fn test_level_codes_follow_declaration_order() {
        let edu = CARIES_SCHEMA.get("mother_edu").unwrap();
        assert_eq!(edu.code_of("no education"), Some(0));
        assert_eq!(edu.code_of("primary/secondary"), Some(1));
        assert_eq!(edu.code_of("university"), Some(2));
        assert_eq!(edu.code_of("University"), None);

        let age = CARIES_SCHEMA.get("age").unwrap();
        assert_eq!(age.code_of("30"), None);
    }

    #[test]
    fn test_label_threshold() {
        assert_eq!(label_for(0.3), 0);
        assert_eq!(label_for(DECISION_THRESHOLD), 0);
        assert_eq!(label_for(0.5000001), 1);
        assert_eq!(label_for(1.0), 1);
    }

    #[test]
    fn test_signature_match() {
        let names = CARIES_SCHEMA.feature_names();
        assert!(CARIES_SCHEMA.matches_signature(&names));

        let mut swapped = names.clone();
        swapped.swap(0, 1);
        assert!(!CARIES_SCHEMA.matches_signature(&swapped));
        assert!(!CARIES_SCHEMA.matches_signature(&names[..9]));
    }
}
