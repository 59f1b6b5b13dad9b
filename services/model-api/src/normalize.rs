//! Request normalization: reshaping arbitrary JSON records onto the column
//! contract a model was trained with.
//!
//! Pure over its inputs. Missing columns become null, extra columns are
//! dropped without comment, and numeric columns are coerced to
//! number-or-null; the model's own missing-value handling takes it from
//! there.

use serde_json::{Map, Value};

use crate::schema::Schema;

/// One incoming record: field name to arbitrary scalar value.
pub type RawRecord = Map<String, Value>;

/// One normalized cell. Numeric fields carry `Num` or `Null` after coercion;
/// everything else keeps its text form for the categorical vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Num(f64),
    Text(String),
    Null,
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Num(v) => Some(*v),
            Cell::Text(s) => s.trim().parse().ok(),
            Cell::Null => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Num(v) => Some(v.to_string()),
            Cell::Text(s) => Some(s.clone()),
            Cell::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

/// A batch of rows aligned to one column order.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl NormalizedBatch {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Aligns `records` to `schema.required_fields` order. With an empty schema
/// (extraction failed) the batch passes through on the union of record keys
/// in first-seen order instead.
pub fn normalize_batch(records: &[RawRecord], schema: &Schema) -> NormalizedBatch {
    let columns: Vec<String> = if schema.required_fields.is_empty() {
        let mut seen: Vec<String> = Vec::new();
        for rec in records {
            for key in rec.keys() {
                if !seen.iter().any(|k| k == key) {
                    seen.push(key.clone());
                }
            }
        }
        seen
    } else {
        schema.required_fields.clone()
    };

    let rows = records
        .iter()
        .map(|rec| {
            columns
                .iter()
                .map(|col| match rec.get(col) {
                    Some(value) if schema.numeric_fields.contains(col) => numeric_cell(value),
                    Some(value) => text_cell(value),
                    None => Cell::Null,
                })
                .collect()
        })
        .collect();

    NormalizedBatch { columns, rows }
}

fn text_cell(value: &Value) -> Cell {
    match value {
        Value::Number(n) => n.as_f64().map(Cell::Num).unwrap_or(Cell::Null),
        Value::String(s) => Cell::Text(s.clone()),
        Value::Bool(b) => Cell::Text(b.to_string()),
        _ => Cell::Null,
    }
}

/// `to_numeric` with coercion: parse what parses, null the rest.
fn numeric_cell(value: &Value) -> Cell {
    match value {
        Value::Number(n) => n.as_f64().map(Cell::Num).unwrap_or(Cell::Null),
        Value::String(s) => s.trim().parse().map(Cell::Num).unwrap_or(Cell::Null),
        Value::Bool(b) => Cell::Num(if *b { 1.0 } else { 0.0 }),
        _ => Cell::Null,
    }
}
