//! Best-effort recovery of a model's input contract.

use std::collections::HashSet;

use crate::pipeline::{FittedPipeline, PipelineStage};

/// Well-known name of the preprocessing step.
pub const PRE_STAGE: &str = "pre";
/// Group-name convention for numeric columns.
pub const NUMERIC_GROUP: &str = "num";

/// The ordered column contract a model expects at inference time.
///
/// `required_fields` order reproduces training-time column order exactly;
/// consumers align columns positionally, not by name. `numeric_fields` is
/// always a subset of `required_fields`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub required_fields: Vec<String>,
    pub numeric_fields: HashSet<String>,
}

impl Schema {
    pub fn is_empty(&self) -> bool {
        self.required_fields.is_empty()
    }

    /// Numeric field names in sorted order, for stable external output.
    pub fn sorted_numeric(&self) -> Vec<String> {
        let mut v: Vec<String> = self.numeric_fields.iter().cloned().collect();
        v.sort();
        v
    }
}

/// Derives the schema from the artifact's `pre` step.
///
/// Recovery is best-effort: any structural mismatch (no `pre` step, `pre` is
/// not a column transformer, a column spec that is not a list of names)
/// yields the empty schema and the model stays servable through the
/// normalizer's pass-through fallback.
pub fn extract(pipeline: &FittedPipeline) -> Schema {
    let Some(PipelineStage::ColumnTransformer(pre)) = pipeline.step(PRE_STAGE) else {
        return Schema::default();
    };
    let mut required = Vec::new();
    let mut numeric = HashSet::new();
    for spec in &pre.transformers {
        let Some(cols) = spec.columns.as_list() else {
            return Schema::default();
        };
        required.extend(cols.iter().cloned());
        if spec.name == NUMERIC_GROUP {
            numeric.extend(cols.iter().cloned());
        }
    }
    Schema {
        required_fields: required,
        numeric_fields: numeric,
    }
}
