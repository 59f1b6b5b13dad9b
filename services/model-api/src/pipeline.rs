//! The fitted-pipeline artifact: what the trainer persists, deserialized and
//! scored natively.
//!
//! An artifact is a JSON document with an ordered list of named steps: a
//! `pre` column-transformer stage carrying its training-time statistics,
//! followed by a fitted estimator. A model is either a probability scorer
//! (gradient-boosting ensemble, sigmoid link) or a label scorer
//! (nearest-centroid); which one is probed once at load, never per request.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::normalize::{Cell, NormalizedBatch};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedPipeline {
    #[serde(default)]
    pub format: u32,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub trained_at: Option<i64>,
    pub steps: Vec<PipelineStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub name: String,
    #[serde(flatten)]
    pub stage: PipelineStage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineStage {
    ColumnTransformer(ColumnTransformer),
    GradientBoosting(GradientBoosting),
    NearestCentroid(NearestCentroid),
}

/// Per-group `(name, fitted transform, column list)` declarations, kept in
/// the order the trainer declared them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnTransformer {
    #[serde(alias = "transformers_")]
    pub transformers: Vec<TransformerSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerSpec {
    pub name: String,
    pub transform: GroupTransform,
    pub columns: ColumnSpec,
}

/// Column declarations are a list of names in every artifact the trainer
/// emits, but the encoding tolerates other shapes so that schema recovery
/// can degrade instead of failing the whole load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSpec {
    List(Vec<String>),
    Other(serde_json::Value),
}

impl ColumnSpec {
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ColumnSpec::List(cols) => Some(cols),
            ColumnSpec::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupTransform {
    /// Impute-then-standardize: `statistics` fills nulls, then
    /// `(x - mean) / scale` per column.
    Numeric {
        statistics: Vec<f64>,
        means: Vec<f64>,
        scales: Vec<f64>,
    },
    /// Fill-then-one-hot: `fill` replaces nulls, `categories` is the fitted
    /// vocabulary per column. Unknown categories encode to all zeros.
    Categorical {
        fill: Vec<String>,
        categories: Vec<Vec<String>>,
    },
}

impl ColumnTransformer {
    /// Replays the fitted transforms over `batch`, one dense row per record.
    /// Group outputs are concatenated in declaration order. Declared columns
    /// absent from the batch read as null and go through imputation.
    pub fn transform(&self, batch: &NormalizedBatch) -> Result<Vec<Vec<f64>>> {
        let mut rows: Vec<Vec<f64>> = vec![Vec::new(); batch.rows.len()];
        for spec in &self.transformers {
            let Some(cols) = spec.columns.as_list() else {
                continue;
            };
            let idx: Vec<Option<usize>> = cols.iter().map(|c| batch.column_index(c)).collect();
            match &spec.transform {
                GroupTransform::Numeric {
                    statistics,
                    means,
                    scales,
                } => {
                    if statistics.len() != cols.len()
                        || means.len() != cols.len()
                        || scales.len() != cols.len()
                    {
                        return Err(anyhow!(
                            "numeric group '{}' statistics do not match its columns",
                            spec.name
                        ));
                    }
                    for (r, out) in rows.iter_mut().enumerate() {
                        for (j, ix) in idx.iter().enumerate() {
                            let v = ix
                                .and_then(|i| batch.rows[r].get(i))
                                .and_then(Cell::as_f64)
                                .unwrap_or(statistics[j]);
                            let scale = if scales[j].abs() > f64::EPSILON {
                                scales[j]
                            } else {
                                1.0
                            };
                            out.push((v - means[j]) / scale);
                        }
                    }
                }
                GroupTransform::Categorical { fill, categories } => {
                    if fill.len() != cols.len() || categories.len() != cols.len() {
                        return Err(anyhow!(
                            "categorical group '{}' vocabulary does not match its columns",
                            spec.name
                        ));
                    }
                    for (r, out) in rows.iter_mut().enumerate() {
                        for (j, ix) in idx.iter().enumerate() {
                            let value = ix
                                .and_then(|i| batch.rows[r].get(i))
                                .and_then(Cell::as_text)
                                .unwrap_or_else(|| fill[j].clone());
                            for cat in &categories[j] {
                                out.push(if *cat == value { 1.0 } else { 0.0 });
                            }
                        }
                    }
                }
            }
        }
        Ok(rows)
    }
}

/// One node of a regression tree. Leaves have `left < 0` and carry `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: usize,
    pub threshold: f64,
    pub left: i32,
    pub right: i32,
    pub value: f64,
    #[serde(default)]
    pub default_left: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    fn predict(&self, row: &[f64]) -> Result<f64> {
        let mut at = 0usize;
        // bounded walk: a malformed artifact must fail the request, not hang it
        for _ in 0..=self.nodes.len() {
            let node = self
                .nodes
                .get(at)
                .ok_or_else(|| anyhow!("tree node index {at} out of range"))?;
            if node.left < 0 {
                return Ok(node.value);
            }
            let x = row
                .get(node.feature)
                .copied()
                .ok_or_else(|| anyhow!("feature index {} out of range", node.feature))?;
            let go_left = if x.is_nan() {
                node.default_left
            } else {
                x <= node.threshold
            };
            at = if go_left {
                node.left as usize
            } else {
                node.right as usize
            };
        }
        Err(anyhow!("tree walk did not terminate"))
    }
}

/// Additive tree ensemble with a sigmoid link; binary classes ordered
/// `[negative, positive]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub classes: Vec<String>,
    pub base_score: f64,
    pub trees: Vec<Tree>,
}

impl GradientBoosting {
    fn decision(&self, row: &[f64]) -> Result<f64> {
        let mut raw = self.base_score;
        for tree in &self.trees {
            raw += tree.predict(row)?;
        }
        Ok(raw)
    }

    pub fn predict_proba(&self, row: &[f64]) -> Result<f64> {
        Ok(sigmoid(self.decision(row)?))
    }

    pub fn predict_label(&self, row: &[f64]) -> Result<String> {
        let p = self.predict_proba(row)?;
        let ix = usize::from(p >= 0.5);
        self.classes
            .get(ix)
            .cloned()
            .ok_or_else(|| anyhow!("class index {ix} out of range"))
    }
}

/// Euclidean nearest-centroid classifier. Labels only, no probabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestCentroid {
    pub classes: Vec<String>,
    pub centroids: Vec<Vec<f64>>,
}

impl NearestCentroid {
    pub fn predict_label(&self, row: &[f64]) -> Result<String> {
        if self.classes.len() != self.centroids.len() || self.classes.is_empty() {
            return Err(anyhow!("centroid table does not match class list"));
        }
        let mut best = 0usize;
        let mut best_d = f64::INFINITY;
        for (i, c) in self.centroids.iter().enumerate() {
            if c.len() != row.len() {
                return Err(anyhow!(
                    "centroid width {} does not match feature width {}",
                    c.len(),
                    row.len()
                ));
            }
            let d: f64 = c.iter().zip(row).map(|(a, b)| (a - b) * (a - b)).sum();
            if d < best_d {
                best_d = d;
                best = i;
            }
        }
        Ok(self.classes[best].clone())
    }
}

/// Scoring capability of a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreKind {
    Probability,
    Label,
}

impl FittedPipeline {
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn step(&self, name: &str) -> Option<&PipelineStage> {
        self.steps.iter().find(|s| s.name == name).map(|s| &s.stage)
    }

    fn preprocessor(&self) -> Option<&ColumnTransformer> {
        self.steps.iter().find_map(|s| match &s.stage {
            PipelineStage::ColumnTransformer(ct) => Some(ct),
            _ => None,
        })
    }

    /// The estimator is the last step that is not a preprocessor.
    fn estimator(&self) -> Result<&PipelineStage> {
        self.steps
            .iter()
            .rev()
            .map(|s| &s.stage)
            .find(|st| !matches!(st, PipelineStage::ColumnTransformer(_)))
            .ok_or_else(|| anyhow!("pipeline has no estimator step"))
    }

    pub fn score_kind(&self) -> Result<ScoreKind> {
        match self.estimator()? {
            PipelineStage::GradientBoosting(_) => Ok(ScoreKind::Probability),
            _ => Ok(ScoreKind::Label),
        }
    }

    fn features(&self, batch: &NormalizedBatch) -> Result<Vec<Vec<f64>>> {
        match self.preprocessor() {
            Some(pre) => pre.transform(batch),
            // no fitted preprocessor: consume the batch as raw numerics
            None => Ok(batch
                .rows
                .iter()
                .map(|row| row.iter().map(|c| c.as_f64().unwrap_or(f64::NAN)).collect())
                .collect()),
        }
    }

    /// Positive-class probability per row. Errs if the estimator is not a
    /// probability scorer; the registry routes by [`ScoreKind`] so this is
    /// only called on models that are.
    pub fn predict_proba(&self, batch: &NormalizedBatch) -> Result<Vec<f64>> {
        let rows = self.features(batch)?;
        match self.estimator()? {
            PipelineStage::GradientBoosting(gb) => {
                rows.iter().map(|r| gb.predict_proba(r)).collect()
            }
            _ => Err(anyhow!("estimator does not expose probabilities")),
        }
    }

    /// Predicted label per row.
    pub fn predict_label(&self, batch: &NormalizedBatch) -> Result<Vec<String>> {
        let rows = self.features(batch)?;
        match self.estimator()? {
            PipelineStage::GradientBoosting(gb) => {
                rows.iter().map(|r| gb.predict_label(r)).collect()
            }
            PipelineStage::NearestCentroid(nc) => {
                rows.iter().map(|r| nc.predict_label(r)).collect()
            }
            PipelineStage::ColumnTransformer(_) => Err(anyhow!("pipeline has no estimator step")),
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_batch;
    use crate::schema;
    use serde_json::json;

    fn leaf(value: f64) -> TreeNode {
        TreeNode {
            feature: 0,
            threshold: 0.0,
            left: -1,
            right: -1,
            value,
            default_left: false,
        }
    }

    fn split(feature: usize, threshold: f64, left: i32, right: i32) -> TreeNode {
        TreeNode {
            feature,
            threshold,
            left,
            right,
            value: 0.0,
            default_left: true,
        }
    }

    /// `pre` with one numeric column (identity scaling) and one categorical
    /// column, then a single stump on the numeric feature.
    fn fixture() -> FittedPipeline {
        FittedPipeline {
            format: 1,
            dataset: Some("unit".into()),
            trained_at: None,
            steps: vec![
                PipelineStep {
                    name: "pre".into(),
                    stage: PipelineStage::ColumnTransformer(ColumnTransformer {
                        transformers: vec![
                            TransformerSpec {
                                name: "num".into(),
                                transform: GroupTransform::Numeric {
                                    statistics: vec![5.0],
                                    means: vec![10.0],
                                    scales: vec![2.0],
                                },
                                columns: ColumnSpec::List(vec!["age".into()]),
                            },
                            TransformerSpec {
                                name: "cat".into(),
                                transform: GroupTransform::Categorical {
                                    fill: vec!["red".into()],
                                    categories: vec![vec!["red".into(), "blue".into()]],
                                },
                                columns: ColumnSpec::List(vec!["color".into()]),
                            },
                        ],
                    }),
                },
                PipelineStep {
                    name: "clf".into(),
                    stage: PipelineStage::GradientBoosting(GradientBoosting {
                        classes: vec!["no".into(), "yes".into()],
                        base_score: 0.0,
                        trees: vec![Tree {
                            nodes: vec![leaf(2.0)],
                        }],
                    }),
                },
            ],
        }
    }

    fn batch_for(pipe: &FittedPipeline, rows: Vec<serde_json::Value>) -> crate::normalize::NormalizedBatch {
        let sch = schema::extract(pipe);
        let records: Vec<_> = rows
            .into_iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect();
        normalize_batch(&records, &sch)
    }

    #[test]
    fn transform_imputes_scales_and_one_hots() {
        let pipe = fixture();
        let batch = batch_for(&pipe, vec![json!({"age": 14, "color": "blue"}), json!({})]);
        let pre = pipe.preprocessor().unwrap();
        let rows = pre.transform(&batch).unwrap();
        // (14 - 10) / 2, then one-hot [red, blue]
        assert_eq!(rows[0], vec![2.0, 0.0, 1.0]);
        // null age imputes to 5.0, null color fills to "red"
        assert_eq!(rows[1], vec![(5.0 - 10.0) / 2.0, 1.0, 0.0]);
    }

    #[test]
    fn gradient_boosting_scores_through_the_sigmoid() {
        let pipe = fixture();
        let batch = batch_for(&pipe, vec![json!({"age": 14, "color": "blue"})]);
        let proba = pipe.predict_proba(&batch).unwrap();
        assert!((proba[0] - sigmoid(2.0)).abs() < 1e-12);
        let labels = pipe.predict_label(&batch).unwrap();
        assert_eq!(labels, vec!["yes"]);
    }

    #[test]
    fn tree_splits_route_rows() {
        let gb = GradientBoosting {
            classes: vec!["no".into(), "yes".into()],
            base_score: 0.0,
            trees: vec![Tree {
                nodes: vec![split(0, 0.0, 1, 2), leaf(-3.0), leaf(3.0)],
            }],
        };
        assert!(gb.predict_proba(&[-1.0]).unwrap() < 0.5);
        assert!(gb.predict_proba(&[1.0]).unwrap() > 0.5);
        // NaN routes down the default branch
        assert!(gb.predict_proba(&[f64::NAN]).unwrap() < 0.5);
    }

    #[test]
    fn cyclic_tree_fails_instead_of_hanging() {
        let gb = GradientBoosting {
            classes: vec!["no".into(), "yes".into()],
            base_score: 0.0,
            trees: vec![Tree {
                nodes: vec![split(0, 0.0, 0, 0)],
            }],
        };
        assert!(gb.predict_proba(&[-1.0]).is_err());
    }

    #[test]
    fn nearest_centroid_is_a_label_scorer() {
        let nc = NearestCentroid {
            classes: vec!["a".into(), "b".into()],
            centroids: vec![vec![0.0, 0.0], vec![10.0, 10.0]],
        };
        assert_eq!(nc.predict_label(&[1.0, 1.0]).unwrap(), "a");
        assert_eq!(nc.predict_label(&[9.0, 9.0]).unwrap(), "b");

        let pipe = FittedPipeline {
            format: 1,
            dataset: None,
            trained_at: None,
            steps: vec![PipelineStep {
                name: "clf".into(),
                stage: PipelineStage::NearestCentroid(nc),
            }],
        };
        assert_eq!(pipe.score_kind().unwrap(), ScoreKind::Label);
        assert!(pipe
            .predict_proba(&crate::normalize::NormalizedBatch {
                columns: vec![],
                rows: vec![],
            })
            .is_err());
    }

    #[test]
    fn pipeline_without_estimator_is_rejected() {
        let mut pipe = fixture();
        pipe.steps.truncate(1);
        assert!(pipe.score_kind().is_err());
    }
}
