//! Null handling: deletion, statistical imputation, custom fill, and null
//! counting. Imputation statistics are always computed over the whole column
//! before any row mutation begins.

use super::{mean, median, ExecutionOutcome};
use crate::batch;
use crate::dataset::{round2, CellValue, Dataset};
use crate::error::{EngineError, Result};
use crate::intent::NullMethod;
use std::collections::HashMap;

fn target_columns(dataset: &Dataset, column: Option<&str>) -> Result<Vec<String>> {
    match column {
        Some(name) => {
            if dataset.has_column(name) {
                Ok(vec![name.to_string()])
            } else {
                Err(EngineError::Validation(format!(
                    "There is no column named '{}'",
                    name
                )))
            }
        }
        None => Ok(dataset.columns.clone()),
    }
}

fn null_count(dataset: &Dataset, column: &str) -> usize {
    dataset
        .column_values(column)
        .iter()
        .filter(|v| v.is_blank())
        .count()
}

/// Most frequent non-blank value; ties break toward first appearance.
fn mode_value(dataset: &Dataset, column: &str) -> Option<CellValue> {
    let mut counts: Vec<(CellValue, usize)> = Vec::new();
    for value in dataset.column_values(column) {
        if value.is_blank() {
            continue;
        }
        match counts.iter_mut().find(|(v, _)| v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value.clone(), 1)),
        }
    }
    // max_by_key would keep the last of equal counts; scan keeps the first.
    let mut best: Option<(CellValue, usize)> = None;
    for (value, n) in counts {
        if best.as_ref().map_or(true, |(_, bn)| n > *bn) {
            best = Some((value, n));
        }
    }
    best.map(|(v, _)| v)
}

pub async fn handle_nulls(
    dataset: &Dataset,
    column: Option<&str>,
    method: NullMethod,
    custom_value: Option<&CellValue>,
) -> Result<ExecutionOutcome> {
    let targets = target_columns(dataset, column)?;
    let total_nulls: usize = targets.iter().map(|c| null_count(dataset, c)).sum();
    if total_nulls == 0 {
        let scope = match column {
            Some(c) => format!("in '{}'", c),
            None => "in the dataset".to_string(),
        };
        return Ok(ExecutionOutcome::report(format!(
            "No nulls found {}; nothing to do.",
            scope
        )));
    }

    if method == NullMethod::Delete {
        let before = dataset.row_count();
        let targets_owned = targets.clone();
        let kept = batch::retain_rows(dataset.rows.clone(), move |row| {
            !targets_owned
                .iter()
                .any(|c| row.get(c).map(|v| v.is_blank()).unwrap_or(true))
        })
        .await;
        let removed = before - kept.len();
        if kept.is_empty() {
            return Err(EngineError::Execution(
                "Deleting every row with a null would empty the dataset; try filling instead"
                    .to_string(),
            ));
        }
        let scope = match column {
            Some(c) => format!("in '{}'", c),
            None => "in any column".to_string(),
        };
        return Ok(ExecutionOutcome::mutation(
            Dataset::new(dataset.columns.clone(), kept),
            format!(
                "Removed {} row{} with nulls {}.",
                removed,
                if removed == 1 { "" } else { "s" },
                scope
            ),
            removed,
        ));
    }

    // Fill values per column, computed over the full column up front.
    let mut fills: HashMap<String, CellValue> = HashMap::new();
    for target in &targets {
        let fill = match method {
            NullMethod::Mean => {
                mean(&dataset.numeric_values(target)).map(|m| CellValue::Number(round2(m)))
            }
            NullMethod::Median => median(&dataset.numeric_values(target))
                .map(|m| CellValue::Number(round2(m))),
            NullMethod::Mode => mode_value(dataset, target),
            NullMethod::Custom => custom_value.cloned().map(|v| match v {
                CellValue::Number(n) => CellValue::Number(round2(n)),
                other => other,
            }),
            NullMethod::Delete => unreachable!(),
        };
        match fill {
            Some(value) => {
                fills.insert(target.clone(), value);
            }
            // A column with nothing to impute from is skipped in the
            // all-columns case but is an error when named directly.
            None if column.is_some() => {
                return Err(EngineError::Execution(format!(
                    "'{}' has no usable values to compute the {} from",
                    target,
                    method_label(method)
                )));
            }
            None => {}
        }
    }
    if fills.is_empty() {
        return Err(EngineError::Execution(format!(
            "No column has usable values to compute the {} from",
            method_label(method)
        )));
    }

    let rows = batch::map_rows(dataset.rows.clone(), move |mut row| {
        for (col, fill) in &fills {
            let blank = row.get(col).map(|v| v.is_blank()).unwrap_or(true);
            if blank {
                row.insert(col.clone(), fill.clone());
            }
        }
        row
    })
    .await;
    let new_dataset = Dataset::new(dataset.columns.clone(), rows);
    let remaining: usize = targets.iter().map(|c| null_count(&new_dataset, c)).sum();
    let actually_filled = total_nulls - remaining;

    let description = match method {
        NullMethod::Custom => match custom_value {
            Some(v) => format!("the value {}", v),
            None => "the custom value".to_string(),
        },
        other => format!("the {}", method_label(other)),
    };
    let scope = match column {
        Some(c) => format!("in '{}'", c),
        None => "across the dataset".to_string(),
    };
    Ok(ExecutionOutcome::mutation(
        new_dataset,
        format!(
            "Filled {} null{} {} with {}.",
            actually_filled,
            if actually_filled == 1 { "" } else { "s" },
            scope,
            description
        ),
        actually_filled,
    ))
}

fn method_label(method: NullMethod) -> &'static str {
    match method {
        NullMethod::Delete => "delete",
        NullMethod::Mean => "mean",
        NullMethod::Median => "median",
        NullMethod::Mode => "mode",
        NullMethod::Custom => "custom value",
    }
}

pub fn count_nulls(dataset: &Dataset, column: Option<&str>) -> Result<ExecutionOutcome> {
    match column {
        Some(name) => {
            if !dataset.has_column(name) {
                return Err(EngineError::Validation(format!(
                    "There is no column named '{}'",
                    name
                )));
            }
            let n = null_count(dataset, name);
            Ok(ExecutionOutcome::report(format!(
                "'{}' has {} null{} out of {} rows.",
                name,
                n,
                if n == 1 { "" } else { "s" },
                dataset.row_count()
            )))
        }
        None => {
            let mut lines = vec![format!(
                "Null counts across {} rows:",
                dataset.row_count()
            )];
            for col in &dataset.columns {
                lines.push(format!("  {}: {}", col, null_count(dataset, col)));
            }
            Ok(ExecutionOutcome::report(lines.join("\n")))
        }
    }
}
