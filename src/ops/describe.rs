//! Read-only profiling: per-column descriptive statistics and the
//! whole-dataset summary. Neither mutates anything.

use super::{mean, median, std_dev, ExecutionOutcome};
use crate::dataset::{round2, CellValue, Dataset, Schema};
use crate::error::{EngineError, Result};
use itertools::Itertools;

fn non_blank_count(dataset: &Dataset, column: &str) -> usize {
    dataset
        .column_values(column)
        .iter()
        .filter(|v| !v.is_blank())
        .count()
}

fn fmt(n: f64) -> String {
    CellValue::Number(round2(n)).to_string()
}

fn describe_column(dataset: &Dataset, column: &str) -> String {
    let values = dataset.numeric_values(column);
    let filled = non_blank_count(dataset, column);
    let nulls = dataset.row_count() - filled;
    if !values.is_empty() && values.len() * 2 >= filled {
        // Mostly numeric: report the numeric profile.
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        let max = values.iter().cloned().fold(f64::MIN, f64::max);
        format!(
            "'{}': {} numeric values ({} null{}), mean {}, median {}, min {}, max {}, std {}",
            column,
            values.len(),
            nulls,
            if nulls == 1 { "" } else { "s" },
            fmt(mean(&values).unwrap_or(0.0)),
            fmt(median(&values).unwrap_or(0.0)),
            fmt(min),
            fmt(max),
            fmt(std_dev(&values).unwrap_or(0.0)),
        )
    } else {
        let mut distinct: Vec<(String, usize)> = Vec::new();
        for value in dataset.column_values(column) {
            if value.is_blank() {
                continue;
            }
            let label = value.to_string();
            match distinct.iter_mut().find(|(v, _)| *v == label) {
                Some((_, n)) => *n += 1,
                None => distinct.push((label, 1)),
            }
        }
        let top = distinct
            .iter()
            .max_by_key(|(_, n)| *n)
            .map(|(v, n)| format!(", most common '{}' ({}x)", v, n))
            .unwrap_or_default();
        format!(
            "'{}': {} text value{} ({} null{}), {} distinct{}",
            column,
            filled,
            if filled == 1 { "" } else { "s" },
            nulls,
            if nulls == 1 { "" } else { "s" },
            distinct.len(),
            top
        )
    }
}

pub fn describe(dataset: &Dataset, column: Option<&str>) -> Result<ExecutionOutcome> {
    if dataset.row_count() == 0 {
        return Err(EngineError::Execution(
            "The dataset has no rows to describe".to_string(),
        ));
    }
    match column {
        Some(name) => {
            if !dataset.has_column(name) {
                return Err(EngineError::Validation(format!(
                    "There is no column named '{}'",
                    name
                )));
            }
            Ok(ExecutionOutcome::report(describe_column(dataset, name)))
        }
        None => {
            let lines = dataset
                .columns
                .iter()
                .map(|c| format!("  {}", describe_column(dataset, c)))
                .join("\n");
            Ok(ExecutionOutcome::report(format!("Column profile:\n{}", lines)))
        }
    }
}

pub fn summarize(dataset: &Dataset, schema: &Schema) -> Result<ExecutionOutcome> {
    let total_nulls: usize = dataset
        .columns
        .iter()
        .map(|c| dataset.row_count() - non_blank_count(dataset, c))
        .sum();
    let numeric: Vec<&String> = dataset
        .columns
        .iter()
        .filter(|c| !dataset.numeric_values(c).is_empty())
        .collect();

    let mut lines = vec![format!(
        "The dataset has {} rows and {} columns ({} empty cell{}).",
        dataset.row_count(),
        dataset.column_count(),
        total_nulls,
        if total_nulls == 1 { "" } else { "s" }
    )];
    let names: Vec<String> = schema.column_names();
    if !names.is_empty() {
        lines.push(format!("Columns: {}.", names.join(", ")));
    }
    for col in numeric {
        let values = dataset.numeric_values(col);
        lines.push(format!(
            "  {}: mean {}, min {}, max {}",
            col,
            fmt(mean(&values).unwrap_or(0.0)),
            fmt(values.iter().cloned().fold(f64::MAX, f64::min)),
            fmt(values.iter().cloned().fold(f64::MIN, f64::max)),
        ));
    }
    Ok(ExecutionOutcome::report(lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ColumnInfo, ColumnType, Row};

    fn dataset() -> Dataset {
        let data = [
            (Some(10.0), "N"),
            (Some(20.0), "S"),
            (None, "N"),
        ];
        let rows = data
            .iter()
            .map(|(sales, region)| {
                let mut row = Row::new();
                row.insert(
                    "Sales".to_string(),
                    sales.map(CellValue::Number).unwrap_or(CellValue::Null),
                );
                row.insert("Region".to_string(), CellValue::Text(region.to_string()));
                row
            })
            .collect();
        Dataset::new(vec!["Sales".into(), "Region".into()], rows)
    }

    fn schema() -> Schema {
        Schema {
            columns: vec![
                ColumnInfo {
                    name: "Sales".into(),
                    inferred_type: ColumnType::Number,
                    sample_values: vec![],
                },
                ColumnInfo {
                    name: "Region".into(),
                    inferred_type: ColumnType::Text,
                    sample_values: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_describe_numeric_column() {
        let out = describe(&dataset(), Some("Sales")).unwrap();
        assert!(out.summary.contains("mean 15"));
        assert!(out.summary.contains("1 null"));
        assert!(out.dataset.is_none());
    }

    #[test]
    fn test_describe_text_column() {
        let out = describe(&dataset(), Some("Region")).unwrap();
        assert!(out.summary.contains("2 distinct"));
        assert!(out.summary.contains("most common 'N'"));
    }

    #[test]
    fn test_describe_all_columns() {
        let out = describe(&dataset(), None).unwrap();
        assert!(out.summary.contains("'Sales'"));
        assert!(out.summary.contains("'Region'"));
    }

    #[test]
    fn test_summarize_counts() {
        let out = summarize(&dataset(), &schema()).unwrap();
        assert!(out.summary.contains("3 rows and 2 columns"));
        assert!(out.summary.contains("1 empty cell"));
    }
}
