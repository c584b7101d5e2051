//! Column-level operations: remove, rename, type conversion, normalization,
//! constant arithmetic, derived/static creation, and value replacement.

use super::ExecutionOutcome;
use crate::batch;
use crate::dataset::{round2, CellValue, ColumnType, Dataset};
use crate::error::{EngineError, Result};
use crate::expr::Expression;
use crate::intent::ModifyOp;
use chrono::NaiveDate;

fn require_column(dataset: &Dataset, name: &str) -> Result<()> {
    if dataset.has_column(name) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "There is no column named '{}'",
            name
        )))
    }
}

fn reject_duplicate(dataset: &Dataset, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation(
            "The new column needs a name".to_string(),
        ));
    }
    if dataset.has_column(name) {
        return Err(EngineError::Validation(format!(
            "A column named '{}' already exists",
            name
        )));
    }
    Ok(())
}

pub async fn remove(dataset: &Dataset, column: &str) -> Result<ExecutionOutcome> {
    require_column(dataset, column)?;
    if dataset.column_count() == 1 {
        return Err(EngineError::Execution(
            "Removing the only column would empty the dataset".to_string(),
        ));
    }
    let columns: Vec<String> = dataset
        .columns
        .iter()
        .filter(|c| c.as_str() != column)
        .cloned()
        .collect();
    let target = column.to_string();
    let rows = batch::map_rows(dataset.rows.clone(), move |mut row| {
        row.remove(&target);
        row
    })
    .await;
    let count = dataset.row_count();
    Ok(ExecutionOutcome::mutation(
        Dataset::new(columns, rows),
        format!("Removed the '{}' column.", column),
        count,
    ))
}

pub async fn rename(dataset: &Dataset, column: &str, new_name: &str) -> Result<ExecutionOutcome> {
    require_column(dataset, column)?;
    reject_duplicate(dataset, new_name)?;
    let columns: Vec<String> = dataset
        .columns
        .iter()
        .map(|c| {
            if c == column {
                new_name.to_string()
            } else {
                c.clone()
            }
        })
        .collect();
    let old = column.to_string();
    let new = new_name.to_string();
    let rows = batch::map_rows(dataset.rows.clone(), move |mut row| {
        if let Some(value) = row.remove(&old) {
            row.insert(new.clone(), value);
        }
        row
    })
    .await;
    Ok(ExecutionOutcome::mutation(
        Dataset::new(columns, rows),
        format!("Renamed '{}' to '{}'.", column, new_name),
        dataset.row_count(),
    ))
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d"];

fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text.trim(), fmt).ok())
}

/// Convert every convertible cell; unconvertible cells keep their value and
/// are excluded from the affected count. Zero conversions is a failure.
pub async fn convert_type(
    dataset: &Dataset,
    column: &str,
    target: ColumnType,
) -> Result<ExecutionOutcome> {
    require_column(dataset, column)?;
    let col = column.to_string();
    let mut converted = 0usize;
    let mut rows = Vec::with_capacity(dataset.row_count());
    for row in &dataset.rows {
        let mut row = row.clone();
        let current = row.get(&col).cloned().unwrap_or(CellValue::Null);
        if !current.is_blank() {
            let next = match target {
                ColumnType::Number => match &current {
                    CellValue::Number(_) => None,
                    other => other.as_number().map(CellValue::Number),
                },
                ColumnType::Text => match &current {
                    CellValue::Text(_) => None,
                    other => Some(CellValue::Text(other.to_string())),
                },
                ColumnType::Date => match &current {
                    CellValue::Text(s) => parse_date(s)
                        .map(|d| CellValue::Text(d.format("%Y-%m-%d").to_string()))
                        .filter(|next| *next != current),
                    _ => None,
                },
            };
            if let Some(next) = next {
                row.insert(col.clone(), next);
                converted += 1;
            }
        }
        rows.push(row);
    }
    if converted == 0 {
        let already = match target {
            ColumnType::Number => dataset
                .column_values(column)
                .iter()
                .all(|v| v.is_blank() || matches!(v, CellValue::Number(_))),
            ColumnType::Text => dataset
                .column_values(column)
                .iter()
                .all(|v| v.is_blank() || matches!(v, CellValue::Text(_))),
            ColumnType::Date => false,
        };
        if already {
            return Ok(ExecutionOutcome::report(format!(
                "'{}' is already {}; nothing to convert.",
                column, target
            )));
        }
        return Err(EngineError::Execution(format!(
            "No values in '{}' could be converted to {}",
            column, target
        )));
    }
    Ok(ExecutionOutcome::mutation(
        Dataset::new(dataset.columns.clone(), rows),
        format!(
            "Converted {} value{} in '{}' to {}.",
            converted,
            if converted == 1 { "" } else { "s" },
            column,
            target
        ),
        converted,
    ))
}

/// Min-max scaling to [0, 1] over the column's numeric values. A constant
/// column maps every value to 0; non-numeric cells become null.
pub async fn normalize(dataset: &Dataset, column: &str) -> Result<ExecutionOutcome> {
    require_column(dataset, column)?;
    let values = dataset.numeric_values(column);
    if values.is_empty() {
        return Err(EngineError::Execution(format!(
            "'{}' has no numeric values to normalize",
            column
        )));
    }
    let min = values.iter().cloned().fold(f64::MAX, f64::min);
    let max = values.iter().cloned().fold(f64::MIN, f64::max);
    let range = max - min;

    let col = column.to_string();
    let rows = batch::map_rows(dataset.rows.clone(), move |mut row| {
        let next = match row.get(&col).and_then(CellValue::as_number) {
            Some(_) if range == 0.0 => CellValue::Number(0.0),
            Some(v) => CellValue::Number(round2((v - min) / range)),
            None => CellValue::Null,
        };
        row.insert(col.clone(), next);
        row
    })
    .await;
    let affected = values.len();
    Ok(ExecutionOutcome::mutation(
        Dataset::new(dataset.columns.clone(), rows),
        format!(
            "Normalized '{}' to the 0-1 range ({} values scaled).",
            column, affected
        ),
        affected,
    ))
}

pub async fn modify(
    dataset: &Dataset,
    column: &str,
    op: ModifyOp,
    operand: f64,
) -> Result<ExecutionOutcome> {
    require_column(dataset, column)?;
    let col = column.to_string();
    let mut rows = Vec::with_capacity(dataset.row_count());
    let mut affected = 0usize;
    for row in &dataset.rows {
        let mut row = row.clone();
        if let Some(v) = row.get(&col).and_then(CellValue::as_number) {
            let next = match op {
                ModifyOp::Add => Some(v + operand),
                ModifyOp::Subtract => Some(v - operand),
                ModifyOp::Multiply => Some(v * operand),
                // Dividing by zero keeps the value instead of producing inf.
                ModifyOp::Divide if operand == 0.0 => None,
                ModifyOp::Divide => Some(v / operand),
            };
            if let Some(next) = next {
                row.insert(col.clone(), CellValue::Number(round2(next)));
                affected += 1;
            }
        }
        rows.push(row);
    }
    if affected == 0 {
        return Ok(ExecutionOutcome::report(format!(
            "No numeric values in '{}' were changed.",
            column
        )));
    }
    Ok(ExecutionOutcome::mutation(
        Dataset::new(dataset.columns.clone(), rows),
        format!(
            "Applied {} {} to {} value{} in '{}'.",
            op,
            operand,
            affected,
            if affected == 1 { "" } else { "s" },
            column
        ),
        affected,
    ))
}

pub async fn create_derived(
    dataset: &Dataset,
    name: &str,
    expression: &str,
) -> Result<ExecutionOutcome> {
    reject_duplicate(dataset, name)?;
    let parsed = Expression::parse(expression, &dataset.columns)?;
    let col = name.to_string();
    let rows = batch::map_rows(dataset.rows.clone(), move |mut row| {
        let value = match parsed.evaluate(&row) {
            Some(v) => CellValue::Number(round2(v)),
            None => CellValue::Null,
        };
        row.insert(col.clone(), value);
        row
    })
    .await;
    let mut columns = dataset.columns.clone();
    columns.push(name.to_string());
    let count = dataset.row_count();
    Ok(ExecutionOutcome::mutation(
        Dataset::new(columns, rows),
        format!("Created '{}' as {}.", name, expression.trim()),
        count,
    ))
}

pub async fn create_static(
    dataset: &Dataset,
    name: &str,
    value: &CellValue,
) -> Result<ExecutionOutcome> {
    reject_duplicate(dataset, name)?;
    let fill = match value {
        CellValue::Number(n) => CellValue::Number(round2(*n)),
        other => other.clone(),
    };
    let col = name.to_string();
    let fill_clone = fill.clone();
    let rows = batch::map_rows(dataset.rows.clone(), move |mut row| {
        row.insert(col.clone(), fill_clone.clone());
        row
    })
    .await;
    let mut columns = dataset.columns.clone();
    columns.push(name.to_string());
    let count = dataset.row_count();
    Ok(ExecutionOutcome::mutation(
        Dataset::new(columns, rows),
        format!("Created '{}' with every row set to {}.", name, fill),
        count,
    ))
}

/// Match rules are value-class-specific: null vocabulary matches blank
/// cells, a bare dash also matches typographic dashes, everything else
/// compares by trimmed equality.
fn matches_find(cell: &CellValue, find: &str) -> bool {
    let find = find.trim();
    let null_family = matches!(
        find.to_lowercase().as_str(),
        "" | "null" | "nulls" | "missing" | "blank" | "empty" | "nan" | "na"
    );
    if null_family {
        return cell.is_blank();
    }
    if find == "-" {
        return matches!(cell, CellValue::Text(s) if {
            let t = s.trim();
            t == "-" || t == "\u{2014}" || t == "\u{2013}"
        });
    }
    cell.to_string().trim() == find
}

pub async fn replace_value(
    dataset: &Dataset,
    column: Option<&str>,
    find: &str,
    replace_with: &CellValue,
) -> Result<ExecutionOutcome> {
    let targets: Vec<String> = match column {
        Some(name) => {
            require_column(dataset, name)?;
            vec![name.to_string()]
        }
        None => dataset.columns.clone(),
    };
    let replacement = match replace_with {
        CellValue::Number(n) => CellValue::Number(round2(*n)),
        other => other.clone(),
    };

    let mut rows = Vec::with_capacity(dataset.row_count());
    let mut replaced = 0usize;
    for row in &dataset.rows {
        let mut row = row.clone();
        for target in &targets {
            static NULL: CellValue = CellValue::Null;
            if matches_find(row.get(target).unwrap_or(&NULL), find) {
                row.insert(target.clone(), replacement.clone());
                replaced += 1;
            }
        }
        rows.push(row);
    }

    if replaced == 0 {
        return Ok(ExecutionOutcome::report(format!(
            "No cells matched '{}'; nothing changed.",
            find.trim()
        )));
    }
    let scope = match column {
        Some(c) => format!(" in '{}'", c),
        None => String::new(),
    };
    Ok(ExecutionOutcome::mutation(
        Dataset::new(dataset.columns.clone(), rows),
        format!(
            "Replaced {} occurrence{} of '{}' with {}{}.",
            replaced,
            if replaced == 1 { "" } else { "s" },
            find.trim(),
            replacement,
            scope
        ),
        replaced,
    ))
}
