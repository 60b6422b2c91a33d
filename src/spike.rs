//! Row-over-row jump detection on numeric columns.

use serde::Serialize;

use crate::table::Table;

/// Absolute first-difference a column must exceed to count as a spike.
pub const SPIKE_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpikeFinding {
    pub product: String,
    pub message: String,
}

/// Scan numeric columns in file order and report the first one whose largest
/// absolute first-difference exceeds the threshold. First match wins, not
/// the global maximum across columns. The first row's difference is zero.
pub fn detect(table: &Table) -> Option<SpikeFinding> {
    for column in &table.columns {
        let Some(values) = column.numeric_values() else {
            continue;
        };

        let mut max_abs = 0.0f64;
        let mut max_idx = 0usize;
        for idx in 1..values.len() {
            let diff = (values[idx] - values[idx - 1]).abs();
            if diff > max_abs {
                max_abs = diff;
                max_idx = idx;
            }
        }

        if max_abs > SPIKE_THRESHOLD {
            return Some(SpikeFinding {
                product: column.name.clone(),
                message: format!(
                    "I found a spike in {}'s data at row {}. Want to explore why?",
                    column.name, max_idx
                ),
            });
        }
    }
    None
}
