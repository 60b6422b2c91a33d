//! In-memory table parsed from an uploaded CSV. Columns are typed once at
//! parse time (numeric or text) and the table is discarded after the
//! response is built.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("no columns found in CSV input")]
    NoColumns,
    #[error("{0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    raw: Vec<String>,
    numeric: Option<Vec<f64>>,
}

impl Column {
    fn new(name: String, raw: Vec<String>) -> Self {
        // A column is numeric only when every cell parses; empty columns
        // stay text so a header-only table yields no chart series.
        let numeric = if raw.is_empty() {
            None
        } else {
            raw.iter()
                .map(|cell| cell.trim().parse::<f64>().ok())
                .collect::<Option<Vec<f64>>>()
        };
        Self { name, raw, numeric }
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric.is_some()
    }

    pub fn numeric_values(&self) -> Option<&[f64]> {
        self.numeric.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub columns: Vec<Column>,
    pub row_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub label: String,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<ChartSeries>,
}

impl Table {
    /// Parse CSV bytes: header row plus records. Records shorter than the
    /// header are padded with empty fields; longer ones have the surplus
    /// dropped.
    pub fn from_csv(bytes: &[u8]) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);

        let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        if headers.is_empty() {
            return Err(TableError::NoColumns);
        }

        let mut cells: Vec<Vec<String>> = headers.iter().map(|_| Vec::new()).collect();
        let mut row_count = 0usize;
        for result in reader.records() {
            let record = result?;
            for (idx, column) in cells.iter_mut().enumerate() {
                column.push(record.get(idx).unwrap_or("").to_string());
            }
            row_count += 1;
        }

        let columns = headers
            .into_iter()
            .zip(cells)
            .map(|(name, raw)| Column::new(name, raw))
            .collect();

        Ok(Self { columns, row_count })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Column-keyed map of the first `rows` rows, keyed by stringified row
    /// index: `{"sales": {"0": 100, "1": 120}, ...}`.
    pub fn preview(&self, rows: usize) -> Value {
        let take = rows.min(self.row_count);
        let mut out = Map::new();
        for column in &self.columns {
            let mut col_map = Map::new();
            for idx in 0..take {
                col_map.insert(idx.to_string(), cell_value(column, idx));
            }
            out.insert(column.name.clone(), Value::Object(col_map));
        }
        Value::Object(out)
    }

    /// One series per numeric column, in file column order, with row indices
    /// as labels.
    pub fn chart_series(&self) -> ChartData {
        let labels = (0..self.row_count).map(|i| i.to_string()).collect();
        let datasets = self
            .columns
            .iter()
            .filter_map(|column| {
                column.numeric_values().map(|values| ChartSeries {
                    label: column.name.clone(),
                    data: values.to_vec(),
                })
            })
            .collect();
        ChartData { labels, datasets }
    }
}

/// Numeric cells become JSON numbers (integers where exact), text cells stay
/// strings.
fn cell_value(column: &Column, idx: usize) -> Value {
    if let Some(values) = column.numeric_values() {
        let v = values[idx];
        if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
            return Value::from(v as i64);
        }
        return serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    Value::String(column.raw[idx].clone())
}
