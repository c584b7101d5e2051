//! Grouped aggregation and pivot. Both share one grouping plan; pivot is
//! aggregation keyed by a designated index column with an explicit or
//! "all remaining" value-column set.
//!
//! Very large datasets route through the columnar engine first; any failure
//! there falls back to the in-memory path, so the accelerator only ever
//! changes performance, not results.

use super::ExecutionOutcome;
use crate::batch::LARGE_DATASET_THRESHOLD;
use crate::columnar;
use crate::dataset::{round2, CellValue, Dataset, Row};
use crate::error::{EngineError, Result};
use crate::intent::AggFunc;
use std::collections::HashMap;
use tracing::warn;

/// A validated grouping plan: key column, value columns in dataset order,
/// and the function applied to each (Sum unless stated).
#[derive(Debug, Clone)]
pub struct GroupPlan {
    pub key: String,
    pub value_columns: Vec<String>,
    pub functions: HashMap<String, AggFunc>,
}

impl GroupPlan {
    pub fn function_for(&self, column: &str) -> AggFunc {
        self.functions
            .get(column)
            .copied()
            .unwrap_or(AggFunc::Sum)
    }

    pub fn output_name(&self, column: &str) -> String {
        format!("{} ({})", column, self.function_for(column).label())
    }
}

fn build_plan(
    dataset: &Dataset,
    key: &str,
    functions: &HashMap<String, AggFunc>,
    value_columns: Option<&[String]>,
) -> Result<GroupPlan> {
    if !dataset.has_column(key) {
        return Err(EngineError::Validation(format!(
            "There is no column named '{}'",
            key
        )));
    }
    let value_columns: Vec<String> = match value_columns {
        Some(explicit) => {
            for col in explicit {
                if !dataset.has_column(col) {
                    return Err(EngineError::Validation(format!(
                        "There is no column named '{}'",
                        col
                    )));
                }
            }
            explicit.iter().filter(|c| c.as_str() != key).cloned().collect()
        }
        // Default: every other column with at least one numeric value.
        None => dataset
            .columns
            .iter()
            .filter(|c| c.as_str() != key && !dataset.numeric_values(c).is_empty())
            .cloned()
            .collect(),
    };
    if value_columns.is_empty() {
        return Err(EngineError::Execution(format!(
            "No numeric columns to aggregate alongside '{}'",
            key
        )));
    }
    Ok(GroupPlan {
        key: key.to_string(),
        value_columns,
        functions: functions.clone(),
    })
}

fn apply_function(func: AggFunc, rows: &[&Row], column: &str) -> CellValue {
    if func == AggFunc::Count {
        let n = rows
            .iter()
            .filter(|r| r.get(column).map(|v| !v.is_blank()).unwrap_or(false))
            .count();
        return CellValue::Number(n as f64);
    }
    let values: Vec<f64> = rows
        .iter()
        .filter_map(|r| r.get(column).and_then(CellValue::as_number))
        .collect();
    if values.is_empty() {
        return CellValue::Null;
    }
    let result = match func {
        AggFunc::Sum => values.iter().sum(),
        AggFunc::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggFunc::Min => values.iter().cloned().fold(f64::MAX, f64::min),
        AggFunc::Max => values.iter().cloned().fold(f64::MIN, f64::max),
        AggFunc::Count => unreachable!(),
    };
    CellValue::Number(round2(result))
}

/// Group in first-appearance order and fold each value column.
fn group(dataset: &Dataset, plan: &GroupPlan) -> Dataset {
    let mut order: Vec<String> = Vec::new();
    let mut members: HashMap<String, Vec<&Row>> = HashMap::new();
    let mut key_cells: HashMap<String, CellValue> = HashMap::new();
    for row in &dataset.rows {
        let cell = row.get(&plan.key).cloned().unwrap_or(CellValue::Null);
        let label = cell.to_string();
        if !members.contains_key(&label) {
            order.push(label.clone());
            key_cells.insert(label.clone(), cell);
        }
        members.entry(label).or_default().push(row);
    }

    let mut columns = vec![plan.key.clone()];
    for col in &plan.value_columns {
        columns.push(plan.output_name(col));
    }

    let rows: Vec<Row> = order
        .iter()
        .map(|label| {
            let group_rows = &members[label];
            let mut row = Row::new();
            row.insert(plan.key.clone(), key_cells[label].clone());
            for col in &plan.value_columns {
                row.insert(
                    plan.output_name(col),
                    apply_function(plan.function_for(col), group_rows, col),
                );
            }
            row
        })
        .collect();
    Dataset::new(columns, rows)
}

fn sort_result(result: &mut Dataset, sort_by: &str, ascending: bool) -> Result<String> {
    let target = result
        .columns
        .iter()
        .find(|c| {
            c.as_str() == sort_by || c.starts_with(&format!("{} (", sort_by))
        })
        .cloned()
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "There is no result column to sort by for '{}'",
                sort_by
            ))
        })?;
    result.rows.sort_by(|a, b| {
        let av = a.get(&target);
        let bv = b.get(&target);
        let ord = match (
            av.and_then(|v| v.as_number()),
            bv.and_then(|v| v.as_number()),
        ) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
            _ => av
                .map(|v| v.to_string())
                .unwrap_or_default()
                .cmp(&bv.map(|v| v.to_string()).unwrap_or_default()),
        };
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    });
    Ok(target)
}

pub fn aggregate(
    dataset: &Dataset,
    group_by: &str,
    functions: &HashMap<String, AggFunc>,
    value_columns: Option<&[String]>,
    sort_by: Option<&str>,
    ascending: bool,
) -> Result<ExecutionOutcome> {
    let plan = build_plan(dataset, group_by, functions, value_columns)?;

    let mut result = if dataset.row_count() > LARGE_DATASET_THRESHOLD {
        match columnar::aggregate(dataset, &plan) {
            Ok(result) => result,
            Err(e) => {
                warn!("columnar aggregation unavailable, using in-memory path: {}", e);
                group(dataset, &plan)
            }
        }
    } else {
        group(dataset, &plan)
    };

    let mut summary = format!(
        "Aggregated {} rows into {} group{} by '{}'.",
        dataset.row_count(),
        result.row_count(),
        if result.row_count() == 1 { "" } else { "s" },
        group_by
    );
    if let Some(sort_by) = sort_by {
        let sorted_on = sort_result(&mut result, sort_by, ascending)?;
        summary.push_str(&format!(
            " Sorted by '{}' {}.",
            sorted_on,
            if ascending { "ascending" } else { "descending" }
        ));
    }

    let groups = result.row_count();
    Ok(ExecutionOutcome::mutation(result, summary, groups))
}

pub fn pivot(
    dataset: &Dataset,
    index: &str,
    value_columns: Option<&[String]>,
    functions: &HashMap<String, AggFunc>,
) -> Result<ExecutionOutcome> {
    let plan = build_plan(dataset, index, functions, value_columns)?;
    let result = group(dataset, &plan);
    let groups = result.row_count();
    let summary = format!(
        "Pivoted on '{}' over {} value column{} ({} group{}).",
        index,
        plan.value_columns.len(),
        if plan.value_columns.len() == 1 { "" } else { "s" },
        groups,
        if groups == 1 { "" } else { "s" }
    );
    Ok(ExecutionOutcome::mutation(result, summary, groups))
}
