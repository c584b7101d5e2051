//! Row-level operations: preview, removal by selector, and appending.

use super::ExecutionOutcome;
use crate::batch;
use crate::dataset::{CellValue, Dataset, Row};
use crate::error::{EngineError, Result};
use crate::intent::{PreviewMode, RowSelector};
use std::collections::HashMap;

pub fn preview(dataset: &Dataset, mode: PreviewMode) -> Result<ExecutionOutcome> {
    let total = dataset.row_count();
    if total == 0 {
        return Err(EngineError::Execution(
            "The dataset has no rows to show".to_string(),
        ));
    }
    let (rows, summary) = match mode {
        PreviewMode::First(n) => {
            let n = n.min(total);
            (
                dataset.rows[..n].to_vec(),
                format!("Showing the first {} of {} rows.", n, total),
            )
        }
        PreviewMode::Last(n) => {
            let n = n.min(total);
            (
                dataset.rows[total - n..].to_vec(),
                format!("Showing the last {} of {} rows.", n, total),
            )
        }
        PreviewMode::Row(n) => {
            if n == 0 || n > total {
                return Err(EngineError::Execution(format!(
                    "Row {} does not exist; the dataset has {} rows",
                    n, total
                )));
            }
            (
                vec![dataset.rows[n - 1].clone()],
                format!("Showing row {} of {}.", n, total),
            )
        }
        PreviewMode::Range(start, end) => {
            if start == 0 || start > end || end > total {
                return Err(EngineError::Execution(format!(
                    "Rows {}-{} are out of range; the dataset has {} rows",
                    start, end, total
                )));
            }
            (
                dataset.rows[start - 1..end].to_vec(),
                format!("Showing rows {}-{} of {}.", start, end, total),
            )
        }
    };
    Ok(ExecutionOutcome::report(summary).with_preview(rows))
}

/// 1-based indices of the rows a selector removes.
fn removal_indices(selector: RowSelector, total: usize) -> Result<Vec<usize>> {
    let indices: Vec<usize> = match selector {
        RowSelector::Index(n) => {
            if n == 0 || n > total {
                return Err(EngineError::Execution(format!(
                    "Row {} does not exist; the dataset has {} rows",
                    n, total
                )));
            }
            vec![n]
        }
        RowSelector::FirstN(n) => (1..=n.min(total)).collect(),
        RowSelector::LastN(n) => {
            let n = n.min(total);
            (total - n + 1..=total).collect()
        }
        RowSelector::KeepFirstN(n) => (n + 1..=total).collect(),
    };
    Ok(indices)
}

/// "row 4", "rows 3-7", or a plain count for scattered removals.
fn describe_removed(indices: &[usize]) -> String {
    match indices {
        [] => "no rows".to_string(),
        [one] => format!("row {}", one),
        _ => {
            let contiguous = indices.windows(2).all(|w| w[1] == w[0] + 1);
            if contiguous {
                format!("rows {}-{}", indices[0], indices[indices.len() - 1])
            } else {
                format!("{} rows", indices.len())
            }
        }
    }
}

pub async fn remove(dataset: &Dataset, selector: RowSelector) -> Result<ExecutionOutcome> {
    let total = dataset.row_count();
    let indices = removal_indices(selector, total)?;
    if indices.is_empty() {
        return Ok(ExecutionOutcome::report(
            "Nothing to remove; the dataset already fits that selection.",
        ));
    }
    if indices.len() >= total {
        return Err(EngineError::Execution(
            "That would remove every row; the dataset must keep at least one".to_string(),
        ));
    }

    let drop: std::collections::HashSet<usize> = indices.iter().copied().collect();
    let mut position = 0usize;
    let kept = batch::retain_rows(dataset.rows.clone(), move |_| {
        position += 1;
        !drop.contains(&position)
    })
    .await;

    let removed = total - kept.len();
    Ok(ExecutionOutcome::mutation(
        Dataset::new(dataset.columns.clone(), kept),
        format!(
            "Removed {} ({} row{} removed, {} remaining).",
            describe_removed(&indices),
            removed,
            if removed == 1 { "" } else { "s" },
            total - removed
        ),
        removed,
    ))
}

pub fn add(dataset: &Dataset, values: &HashMap<String, CellValue>) -> Result<ExecutionOutcome> {
    if values.is_empty() {
        return Err(EngineError::Validation(
            "I need at least one value for the new row".to_string(),
        ));
    }
    for key in values.keys() {
        if !dataset.has_column(key) {
            return Err(EngineError::Validation(format!(
                "There is no column named '{}'",
                key
            )));
        }
    }
    let mut row = Row::new();
    for col in &dataset.columns {
        row.insert(
            col.clone(),
            values.get(col).cloned().unwrap_or(CellValue::Null),
        );
    }
    let mut rows = dataset.rows.clone();
    rows.push(row);
    Ok(ExecutionOutcome::mutation(
        Dataset::new(dataset.columns.clone(), rows),
        format!("Added a row; the dataset now has {} rows.", dataset.row_count() + 1),
        1,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> Dataset {
        let rows = (1..=n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("A".to_string(), CellValue::Number(i as f64));
                row
            })
            .collect();
        Dataset::new(vec!["A".into()], rows)
    }

    #[test]
    fn test_preview_first() {
        let out = preview(&dataset(5), PreviewMode::First(3)).unwrap();
        let rows = out.preview.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("A"), Some(&CellValue::Number(1.0)));
    }

    #[test]
    fn test_preview_specific_row_out_of_range() {
        assert!(preview(&dataset(3), PreviewMode::Row(9)).is_err());
    }

    #[tokio::test]
    async fn test_keep_first_two_of_five() {
        let out = remove(&dataset(5), RowSelector::KeepFirstN(2)).await.unwrap();
        let new = out.dataset.unwrap();
        assert_eq!(new.row_count(), 2);
        assert_eq!(new.cell(1, "A"), &CellValue::Number(2.0));
        assert_eq!(out.affected, Some(3));
        assert!(out.summary.contains("rows 3-5"));
        assert!(out.summary.contains("3 rows removed"));
    }

    #[tokio::test]
    async fn test_remove_single_index_is_stable() {
        let out = remove(&dataset(4), RowSelector::Index(2)).await.unwrap();
        let new = out.dataset.unwrap();
        assert_eq!(new.cell(0, "A"), &CellValue::Number(1.0));
        assert_eq!(new.cell(1, "A"), &CellValue::Number(3.0));
        assert!(out.summary.contains("row 2"));
    }

    #[tokio::test]
    async fn test_remove_last_n() {
        let out = remove(&dataset(5), RowSelector::LastN(2)).await.unwrap();
        assert_eq!(out.dataset.unwrap().row_count(), 3);
        assert!(out.summary.contains("rows 4-5"));
    }

    #[tokio::test]
    async fn test_refuses_to_remove_all_rows() {
        assert!(remove(&dataset(3), RowSelector::FirstN(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_keep_first_larger_than_dataset_is_noop() {
        let out = remove(&dataset(2), RowSelector::KeepFirstN(10)).await.unwrap();
        assert!(out.dataset.is_none());
    }

    #[test]
    fn test_add_row_fills_missing_with_null() {
        let d = Dataset::new(
            vec!["A".into(), "B".into()],
            vec![Row::new()],
        );
        let mut values = HashMap::new();
        values.insert("A".to_string(), CellValue::Number(7.0));
        let out = add(&d, &values).unwrap();
        let new = out.dataset.unwrap();
        assert_eq!(new.cell(1, "A"), &CellValue::Number(7.0));
        assert_eq!(new.cell(1, "B"), &CellValue::Null);
    }

    #[test]
    fn test_add_row_rejects_unknown_column() {
        let d = dataset(1);
        let mut values = HashMap::new();
        values.insert("Zzz".to_string(), CellValue::Number(1.0));
        assert!(add(&d, &values).is_err());
    }
}
