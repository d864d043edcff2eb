//! Built-in task handlers.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::TaskHandler;
use crate::error::{Error, Result};

const PREVIEW_ROWS: usize = 5;
const TOP_VALUES: usize = 5;

/// `echo`: returns the payload unchanged.
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    fn task_type(&self) -> &str {
        "echo"
    }

    async fn handle(&self, payload: &str) -> Result<Value> {
        Ok(json!({ "echo": payload }))
    }
}

/// `analyze`: summary statistics over tabular text.
///
/// The payload is read as a JSON array of objects, else as CSV with a header
/// row, else as one value per line under a single `values` column.
pub struct AnalyzeHandler;

#[async_trait]
impl TaskHandler for AnalyzeHandler {
    fn task_type(&self) -> &str {
        "analyze"
    }

    async fn handle(&self, payload: &str) -> Result<Value> {
        let table = Table::parse(payload)?;
        Ok(table.summarize())
    }
}

/// Rows of cells under named columns. Missing cells are `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn parse(payload: &str) -> Result<Self> {
        let text = payload.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("payload is empty".to_string()));
        }
        Ok(Self::from_json(text)
            .or_else(|| Self::from_csv(text))
            .unwrap_or_else(|| Self::from_lines(text)))
    }

    fn from_json(text: &str) -> Option<Self> {
        let Value::Array(items) = serde_json::from_str::<Value>(text).ok()? else {
            return None;
        };
        let mut columns: Vec<String> = Vec::new();
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let Value::Object(record) = item else {
                return None;
            };
            for key in record.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
            records.push(record);
        }
        if records.is_empty() {
            return None;
        }
        let rows = records
            .into_iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Some(Self { columns, rows })
    }

    /// Header plus at least one data row, every row as wide as the header.
    fn from_csv(text: &str) -> Option<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let columns: Vec<String> = reader.headers().ok()?.iter().map(str::to_string).collect();
        if columns.len() < 2 {
            return None;
        }
        // Ragged records surface as errors; the caller falls back to lines.
        let rows = reader
            .records()
            .map(|record| record.ok().map(|r| r.iter().map(cell).collect()))
            .collect::<Option<Vec<Vec<Value>>>>()?;
        if rows.is_empty() {
            return None;
        }
        Some(Self { columns, rows })
    }

    fn from_lines(text: &str) -> Self {
        Self {
            columns: vec!["values".to_string()],
            rows: text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| vec![cell(l)])
                .collect(),
        }
    }

    fn column(&self, index: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    pub fn summarize(&self) -> Value {
        let mut numeric = Map::new();
        let mut categorical = Map::new();

        for (i, name) in self.columns.iter().enumerate() {
            let present: Vec<&Value> = self.column(i).filter(|v| !v.is_null()).collect();
            if present.is_empty() {
                continue;
            }
            let numbers: Option<Vec<f64>> = present.iter().map(|v| v.as_f64()).collect();
            match numbers {
                Some(values) => {
                    numeric.insert(name.clone(), numeric_summary(values));
                }
                None => {
                    categorical.insert(name.clone(), categorical_summary(&present));
                }
            }
        }

        let mut summary = Map::new();
        if !numeric.is_empty() {
            summary.insert("numeric".to_string(), Value::Object(numeric));
        }
        if !categorical.is_empty() {
            summary.insert("categorical".to_string(), Value::Object(categorical));
        }

        let preview: Vec<Value> = self
            .rows
            .iter()
            .take(PREVIEW_ROWS)
            .map(|row| {
                Value::Object(
                    self.columns
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect(),
                )
            })
            .collect();

        json!({
            "row_count": self.rows.len(),
            "column_count": self.columns.len(),
            "columns": self.columns,
            "summary": summary,
            "preview": preview,
        })
    }
}

fn cell(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => json!(n),
        _ => Value::String(raw.to_string()),
    }
}

fn numeric_summary(mut values: Vec<f64>) -> Value {
    let n = values.len() as f64;
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mean = values.iter().sum::<f64>() / n;
    let mid = values.len() / 2;
    let median = if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    };
    // Sample standard deviation; undefined for a single value.
    let std = (values.len() > 1).then(|| {
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        var.sqrt()
    });

    json!({
        "mean": mean,
        "median": median,
        "std": std,
        "min": values[0],
        "max": values[values.len() - 1],
    })
}

fn categorical_summary(values: &[&Value]) -> Value {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for v in values {
        let key = match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        *counts.entry(key).or_default() += 1;
    }

    let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let unique_count = ranked.len();
    let top_values: BTreeMap<String, u64> = ranked.into_iter().take(TOP_VALUES).collect();

    json!({
        "unique_count": unique_count,
        "top_values": top_values,
    })
}
