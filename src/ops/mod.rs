//! Operation executors. Each is a pure function over the dataset that
//! either produces a full new snapshot or fails with a specific user-facing
//! reason and leaves the dataset untouched. No executor performs partial
//! mutation.

use crate::dataset::{Dataset, Row, Schema};
use crate::error::{EngineError, Result};
use crate::intent::OperationRequest;
use crate::trainer::ModelTrainer;

pub mod aggregate;
pub mod columns;
pub mod describe;
pub mod model;
pub mod nulls;
pub mod outliers;
pub mod rows;

/// What one executed operation produced. `dataset` is Some only when a
/// mutation should be committed as a new version.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub dataset: Option<Dataset>,
    pub summary: String,
    pub affected: Option<usize>,
    pub preview: Option<Vec<Row>>,
}

impl ExecutionOutcome {
    /// A read-only result: nothing to commit.
    pub fn report(summary: impl Into<String>) -> Self {
        Self {
            dataset: None,
            summary: summary.into(),
            affected: None,
            preview: None,
        }
    }

    pub fn mutation(dataset: Dataset, summary: impl Into<String>, affected: usize) -> Self {
        Self {
            dataset: Some(dataset),
            summary: summary.into(),
            affected: Some(affected),
            preview: None,
        }
    }

    pub fn with_preview(mut self, rows: Vec<Row>) -> Self {
        self.preview = Some(rows);
        self
    }
}

/// Dispatch a fully-resolved request to its executor. Requests still waiting
/// on clarification never reach this point; `revert` and `unknown` are the
/// assistant's responsibility, not an executor's.
pub async fn execute(
    dataset: &Dataset,
    request: &OperationRequest,
    schema: &Schema,
    trainer: &dyn ModelTrainer,
) -> Result<ExecutionOutcome> {
    if let Some(clarification) = request.clarification() {
        return Err(EngineError::Validation(clarification.prompt.clone()));
    }

    match request {
        OperationRequest::HandleNulls {
            column,
            method,
            custom_value,
            ..
        } => {
            let method = method.ok_or_else(|| {
                EngineError::Validation(
                    "I need to know how to handle the nulls before I can proceed".to_string(),
                )
            })?;
            nulls::handle_nulls(dataset, column.as_deref(), method, custom_value.as_ref()).await
        }
        OperationRequest::Preview { mode } => rows::preview(dataset, *mode),
        OperationRequest::Summarize => describe::summarize(dataset, schema),
        OperationRequest::ConvertType { column, target } => {
            columns::convert_type(dataset, column, *target).await
        }
        OperationRequest::CountNulls { column } => nulls::count_nulls(dataset, column.as_deref()),
        OperationRequest::Describe { column } => describe::describe(dataset, column.as_deref()),
        OperationRequest::CreateDerivedColumn {
            name, expression, ..
        } => columns::create_derived(dataset, name, expression).await,
        OperationRequest::CreateStaticColumn { name, value, .. } => {
            columns::create_static(dataset, name, value).await
        }
        OperationRequest::ModifyColumn {
            column,
            op,
            operand,
        } => columns::modify(dataset, column, *op, *operand).await,
        OperationRequest::NormalizeColumn { column, .. } => {
            let column = column.as_deref().ok_or_else(|| {
                EngineError::Validation("I need a column to normalize".to_string())
            })?;
            columns::normalize(dataset, column).await
        }
        OperationRequest::RemoveColumn { column, .. } => {
            let column = column.as_deref().ok_or_else(|| {
                EngineError::Validation("I need a column to remove".to_string())
            })?;
            columns::remove(dataset, column).await
        }
        OperationRequest::RenameColumn { column, new_name } => {
            columns::rename(dataset, column, new_name).await
        }
        OperationRequest::RemoveRows { selector } => rows::remove(dataset, *selector).await,
        OperationRequest::AddRow { values } => rows::add(dataset, values),
        OperationRequest::Aggregate {
            group_by,
            functions,
            value_columns,
            sort_by,
            ascending,
        } => aggregate::aggregate(
            dataset,
            group_by,
            functions,
            value_columns.as_deref(),
            sort_by.as_deref(),
            *ascending,
        ),
        OperationRequest::Pivot {
            index,
            value_columns,
            functions,
        } => aggregate::pivot(dataset, index, value_columns.as_deref(), functions),
        OperationRequest::TrainModel {
            model_kind,
            target,
            features,
            ..
        } => model::train(dataset, schema, trainer, *model_kind, target, features).await,
        OperationRequest::ReplaceValue {
            column,
            find,
            replace_with,
            ..
        } => columns::replace_value(dataset, column.as_deref(), find, replace_with).await,
        OperationRequest::DetectOutliers { column, method, .. } => {
            outliers::detect(dataset, column.as_deref(), *method)
        }
        OperationRequest::TreatOutliers {
            column,
            method,
            action,
            ..
        } => {
            let column = column.as_deref().ok_or_else(|| {
                EngineError::Validation("I need a column to treat outliers in".to_string())
            })?;
            outliers::treat(dataset, column, *method, *action).await
        }
        OperationRequest::Revert | OperationRequest::Unknown => Err(EngineError::Validation(
            format!("'{}' is not an executable operation", request.kind()),
        )),
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub(crate) fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if values.len() < 2 {
        return Some(0.0);
    }
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Linear-interpolation quantile over a pre-sorted slice.
pub(crate) fn quantile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        Some(sorted[lo])
    } else {
        let frac = pos - lo as f64;
        Some(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
    }
}
