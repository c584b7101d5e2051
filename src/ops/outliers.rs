//! Outlier detection and treatment. Fences are computed over the whole
//! column before any row mutation: IQR uses the 1.5x rule, z-score flags
//! |z| > 3.

use super::{mean, median, quantile, std_dev, ExecutionOutcome};
use crate::batch;
use crate::dataset::{round2, CellValue, Dataset};
use crate::error::{EngineError, Result};
use crate::intent::{OutlierAction, OutlierMethod};

const IQR_FACTOR: f64 = 1.5;
const ZSCORE_LIMIT: f64 = 3.0;

/// Inclusive bounds; values outside are outliers.
#[derive(Debug, Clone, Copy)]
struct Fences {
    lower: f64,
    upper: f64,
}

fn fences(values: &[f64], method: OutlierMethod) -> Option<Fences> {
    match method {
        OutlierMethod::Iqr => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let q1 = quantile(&sorted, 0.25)?;
            let q3 = quantile(&sorted, 0.75)?;
            let iqr = q3 - q1;
            Some(Fences {
                lower: q1 - IQR_FACTOR * iqr,
                upper: q3 + IQR_FACTOR * iqr,
            })
        }
        OutlierMethod::ZScore => {
            let m = mean(values)?;
            let sd = std_dev(values)?;
            if sd == 0.0 {
                // A constant column has no outliers.
                Some(Fences {
                    lower: f64::MIN,
                    upper: f64::MAX,
                })
            } else {
                Some(Fences {
                    lower: m - ZSCORE_LIMIT * sd,
                    upper: m + ZSCORE_LIMIT * sd,
                })
            }
        }
    }
}

fn method_label(method: OutlierMethod) -> &'static str {
    match method {
        OutlierMethod::Iqr => "IQR",
        OutlierMethod::ZScore => "z-score",
    }
}

fn outlier_values(dataset: &Dataset, column: &str, f: Fences) -> Vec<f64> {
    dataset
        .numeric_values(column)
        .into_iter()
        .filter(|v| *v < f.lower || *v > f.upper)
        .collect()
}

/// Report outliers without mutating. A named column with no numeric data is
/// an error; the all-columns sweep just skips such columns.
pub fn detect(
    dataset: &Dataset,
    column: Option<&str>,
    method: OutlierMethod,
) -> Result<ExecutionOutcome> {
    let targets: Vec<String> = match column {
        Some(name) => {
            if !dataset.has_column(name) {
                return Err(EngineError::Validation(format!(
                    "There is no column named '{}'",
                    name
                )));
            }
            vec![name.to_string()]
        }
        None => dataset.columns.clone(),
    };

    let mut lines = Vec::new();
    let mut total = 0usize;
    for target in &targets {
        let values = dataset.numeric_values(target);
        if values.is_empty() {
            if column.is_some() {
                return Err(EngineError::Execution(format!(
                    "'{}' has no numeric values to check for outliers",
                    target
                )));
            }
            continue;
        }
        let f = match fences(&values, method) {
            Some(f) => f,
            None => continue,
        };
        let found = outlier_values(dataset, target, f);
        total += found.len();
        if found.is_empty() {
            lines.push(format!("  {}: none", target));
        } else {
            let sample: Vec<String> = found
                .iter()
                .take(5)
                .map(|v| CellValue::Number(*v).to_string())
                .collect();
            lines.push(format!(
                "  {}: {} ({})",
                target,
                found.len(),
                sample.join(", ")
            ));
        }
    }
    if lines.is_empty() {
        return Err(EngineError::Execution(
            "No numeric columns to check for outliers".to_string(),
        ));
    }

    let header = format!(
        "Outlier check ({} method), {} flagged:",
        method_label(method),
        total
    );
    Ok(ExecutionOutcome::report(format!(
        "{}\n{}",
        header,
        lines.join("\n")
    )))
}

pub async fn treat(
    dataset: &Dataset,
    column: &str,
    method: OutlierMethod,
    action: OutlierAction,
) -> Result<ExecutionOutcome> {
    if !dataset.has_column(column) {
        return Err(EngineError::Validation(format!(
            "There is no column named '{}'",
            column
        )));
    }
    let values = dataset.numeric_values(column);
    if values.is_empty() {
        return Err(EngineError::Execution(format!(
            "'{}' has no numeric values to treat",
            column
        )));
    }
    let f = fences(&values, method).ok_or_else(|| {
        EngineError::Execution(format!("Could not compute outlier bounds for '{}'", column))
    })?;
    let count = outlier_values(dataset, column, f).len();
    if count == 0 {
        return Ok(ExecutionOutcome::report(format!(
            "No outliers found in '{}' with the {} method.",
            column,
            method_label(method)
        )));
    }

    let col = column.to_string();
    let is_outlier =
        move |row: &crate::dataset::Row| -> Option<f64> {
            row.get(&col)
                .and_then(CellValue::as_number)
                .filter(|v| *v < f.lower || *v > f.upper)
        };

    let (new_dataset, description) = match action {
        OutlierAction::Remove => {
            let before = dataset.row_count();
            let check = is_outlier.clone();
            let kept =
                batch::retain_rows(dataset.rows.clone(), move |row| check(row).is_none()).await;
            if kept.is_empty() {
                return Err(EngineError::Execution(
                    "Removing every outlier row would empty the dataset".to_string(),
                ));
            }
            let removed = before - kept.len();
            (
                Dataset::new(dataset.columns.clone(), kept),
                format!("removed {} row{}", removed, if removed == 1 { "" } else { "s" }),
            )
        }
        OutlierAction::Cap => {
            let col = column.to_string();
            let rows = batch::map_rows(dataset.rows.clone(), move |mut row| {
                if let Some(v) = row.get(&col).and_then(CellValue::as_number) {
                    let capped = v.clamp(f.lower, f.upper);
                    if capped != v {
                        row.insert(col.clone(), CellValue::Number(round2(capped)));
                    }
                }
                row
            })
            .await;
            (
                Dataset::new(dataset.columns.clone(), rows),
                format!("capped {} value{} at the fences", count, if count == 1 { "" } else { "s" }),
            )
        }
        OutlierAction::ReplaceMedian => {
            let med = round2(median(&values).unwrap_or(0.0));
            let check = is_outlier.clone();
            let col = column.to_string();
            let rows = batch::map_rows(dataset.rows.clone(), move |mut row| {
                if check(&row).is_some() {
                    row.insert(col.clone(), CellValue::Number(med));
                }
                row
            })
            .await;
            (
                Dataset::new(dataset.columns.clone(), rows),
                format!(
                    "replaced {} value{} with the median ({})",
                    count,
                    if count == 1 { "" } else { "s" },
                    CellValue::Number(med)
                ),
            )
        }
    };

    Ok(ExecutionOutcome::mutation(
        new_dataset,
        format!(
            "Treated outliers in '{}' ({} method): {}.",
            column,
            method_label(method),
            description
        ),
        count,
    ))
}
