//! Typed operation descriptors. Every free-text request is translated into
//! exactly one `OperationRequest` variant; executors match exhaustively, so
//! adding a kind is a compile-time checklist.

use crate::dataset::{CellValue, ColumnType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullMethod {
    Delete,
    Mean,
    Median,
    Mode,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifyOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl fmt::Display for ModifyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModifyOp::Add => write!(f, "add"),
            ModifyOp::Subtract => write!(f, "subtract"),
            ModifyOp::Multiply => write!(f, "multiply"),
            ModifyOp::Divide => write!(f, "divide"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggFunc {
    /// Suffix used on output column names, e.g. `Sales (Sum)`.
    pub fn label(&self) -> &'static str {
        match self {
            AggFunc::Sum => "Sum",
            AggFunc::Avg => "Avg",
            AggFunc::Min => "Min",
            AggFunc::Max => "Max",
            AggFunc::Count => "Count",
        }
    }

    pub fn from_keyword(word: &str) -> Option<AggFunc> {
        match word.to_lowercase().as_str() {
            "sum" | "total" => Some(AggFunc::Sum),
            "avg" | "average" | "mean" => Some(AggFunc::Avg),
            "min" | "minimum" | "lowest" => Some(AggFunc::Min),
            "max" | "maximum" | "highest" => Some(AggFunc::Max),
            "count" | "number" => Some(AggFunc::Count),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewMode {
    First(usize),
    Last(usize),
    Row(usize),
    Range(usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowSelector {
    /// 1-based row index.
    Index(usize),
    FirstN(usize),
    LastN(usize),
    /// "keep only first N" = remove everything from index N onward.
    KeepFirstN(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    Iqr,
    ZScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierAction {
    Remove,
    Cap,
    ReplaceMedian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    Logistic,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Linear => write!(f, "linear regression"),
            ModelKind::Logistic => write!(f, "logistic classification"),
        }
    }
}

/// What a pending clarification is asking for. Drives which resolver
/// interprets the user's next short answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationKind {
    Column,
    NullMethod,
    Value,
    Expression,
    RowSelection,
    GroupBy,
    ModelTarget,
    OutlierAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub kind: ClarificationKind,
    pub prompt: String,
}

/// Stable kind tag, used by pending-clarification state and version metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    HandleNulls,
    Preview,
    Summarize,
    ConvertType,
    CountNulls,
    Describe,
    CreateDerivedColumn,
    CreateStaticColumn,
    ModifyColumn,
    NormalizeColumn,
    RemoveColumn,
    RenameColumn,
    RemoveRows,
    AddRow,
    Aggregate,
    Pivot,
    TrainModel,
    ReplaceValue,
    DetectOutliers,
    TreatOutliers,
    Revert,
    Unknown,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// One variant per operation kind, carrying only the fields that kind needs.
/// A request with no `clarification` must have every required field populated
/// and column references already resolved against the schema (rename/create
/// kinds introduce new names and are exempt for those).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OperationRequest {
    HandleNulls {
        column: Option<String>,
        method: Option<NullMethod>,
        custom_value: Option<CellValue>,
        clarification: Option<Clarification>,
    },
    Preview {
        mode: PreviewMode,
    },
    Summarize,
    ConvertType {
        column: String,
        target: ColumnType,
    },
    CountNulls {
        column: Option<String>,
    },
    Describe {
        column: Option<String>,
    },
    CreateDerivedColumn {
        name: String,
        expression: String,
        clarification: Option<Clarification>,
    },
    CreateStaticColumn {
        name: String,
        value: CellValue,
        clarification: Option<Clarification>,
    },
    ModifyColumn {
        column: String,
        op: ModifyOp,
        operand: f64,
    },
    NormalizeColumn {
        column: Option<String>,
        clarification: Option<Clarification>,
    },
    RemoveColumn {
        column: Option<String>,
        clarification: Option<Clarification>,
    },
    RenameColumn {
        column: String,
        new_name: String,
    },
    RemoveRows {
        selector: RowSelector,
    },
    AddRow {
        values: HashMap<String, CellValue>,
    },
    Aggregate {
        group_by: String,
        /// Per-column aggregation function; columns not listed default to Sum.
        functions: HashMap<String, AggFunc>,
        value_columns: Option<Vec<String>>,
        sort_by: Option<String>,
        ascending: bool,
    },
    Pivot {
        index: String,
        value_columns: Option<Vec<String>>,
        functions: HashMap<String, AggFunc>,
    },
    TrainModel {
        model_kind: ModelKind,
        target: String,
        features: Vec<String>,
        clarification: Option<Clarification>,
    },
    ReplaceValue {
        column: Option<String>,
        find: String,
        replace_with: CellValue,
        clarification: Option<Clarification>,
    },
    DetectOutliers {
        column: Option<String>,
        method: OutlierMethod,
        clarification: Option<Clarification>,
    },
    TreatOutliers {
        column: Option<String>,
        method: OutlierMethod,
        action: OutlierAction,
        clarification: Option<Clarification>,
    },
    Revert,
    Unknown,
}

impl OperationRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationRequest::HandleNulls { .. } => OperationKind::HandleNulls,
            OperationRequest::Preview { .. } => OperationKind::Preview,
            OperationRequest::Summarize => OperationKind::Summarize,
            OperationRequest::ConvertType { .. } => OperationKind::ConvertType,
            OperationRequest::CountNulls { .. } => OperationKind::CountNulls,
            OperationRequest::Describe { .. } => OperationKind::Describe,
            OperationRequest::CreateDerivedColumn { .. } => OperationKind::CreateDerivedColumn,
            OperationRequest::CreateStaticColumn { .. } => OperationKind::CreateStaticColumn,
            OperationRequest::ModifyColumn { .. } => OperationKind::ModifyColumn,
            OperationRequest::NormalizeColumn { .. } => OperationKind::NormalizeColumn,
            OperationRequest::RemoveColumn { .. } => OperationKind::RemoveColumn,
            OperationRequest::RenameColumn { .. } => OperationKind::RenameColumn,
            OperationRequest::RemoveRows { .. } => OperationKind::RemoveRows,
            OperationRequest::AddRow { .. } => OperationKind::AddRow,
            OperationRequest::Aggregate { .. } => OperationKind::Aggregate,
            OperationRequest::Pivot { .. } => OperationKind::Pivot,
            OperationRequest::TrainModel { .. } => OperationKind::TrainModel,
            OperationRequest::ReplaceValue { .. } => OperationKind::ReplaceValue,
            OperationRequest::DetectOutliers { .. } => OperationKind::DetectOutliers,
            OperationRequest::TreatOutliers { .. } => OperationKind::TreatOutliers,
            OperationRequest::Revert => OperationKind::Revert,
            OperationRequest::Unknown => OperationKind::Unknown,
        }
    }

    pub fn clarification(&self) -> Option<&Clarification> {
        match self {
            OperationRequest::HandleNulls { clarification, .. }
            | OperationRequest::CreateDerivedColumn { clarification, .. }
            | OperationRequest::CreateStaticColumn { clarification, .. }
            | OperationRequest::NormalizeColumn { clarification, .. }
            | OperationRequest::RemoveColumn { clarification, .. }
            | OperationRequest::TrainModel { clarification, .. }
            | OperationRequest::ReplaceValue { clarification, .. }
            | OperationRequest::DetectOutliers { clarification, .. }
            | OperationRequest::TreatOutliers { clarification, .. } => clarification.as_ref(),
            _ => None,
        }
    }

    pub fn clarification_mut(&mut self) -> Option<&mut Clarification> {
        match self {
            OperationRequest::HandleNulls { clarification, .. }
            | OperationRequest::CreateDerivedColumn { clarification, .. }
            | OperationRequest::CreateStaticColumn { clarification, .. }
            | OperationRequest::NormalizeColumn { clarification, .. }
            | OperationRequest::RemoveColumn { clarification, .. }
            | OperationRequest::TrainModel { clarification, .. }
            | OperationRequest::ReplaceValue { clarification, .. }
            | OperationRequest::DetectOutliers { clarification, .. }
            | OperationRequest::TreatOutliers { clarification, .. } => clarification.as_mut(),
            _ => None,
        }
    }

    pub fn requires_clarification(&self) -> bool {
        self.clarification().is_some()
    }

    /// Column hint recorded alongside a pending clarification.
    pub fn column_hint(&self) -> Option<String> {
        match self {
            OperationRequest::HandleNulls { column, .. }
            | OperationRequest::NormalizeColumn { column, .. }
            | OperationRequest::RemoveColumn { column, .. }
            | OperationRequest::ReplaceValue { column, .. }
            | OperationRequest::DetectOutliers { column, .. }
            | OperationRequest::TreatOutliers { column, .. } => column.clone(),
            OperationRequest::ConvertType { column, .. }
            | OperationRequest::ModifyColumn { column, .. }
            | OperationRequest::RenameColumn { column, .. } => Some(column.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_kebab_case() {
        assert_eq!(OperationKind::HandleNulls.to_string(), "handle-nulls");
        assert_eq!(OperationKind::TrainModel.to_string(), "train-model");
    }

    #[test]
    fn test_requires_clarification() {
        let req = OperationRequest::HandleNulls {
            column: Some("A".into()),
            method: None,
            custom_value: None,
            clarification: Some(Clarification {
                kind: ClarificationKind::NullMethod,
                prompt: "How should nulls be handled?".into(),
            }),
        };
        assert!(req.requires_clarification());

        let req = OperationRequest::RemoveRows {
            selector: RowSelector::FirstN(3),
        };
        assert!(!req.requires_clarification());
    }

    #[test]
    fn test_agg_func_keywords() {
        assert_eq!(AggFunc::from_keyword("Total"), Some(AggFunc::Sum));
        assert_eq!(AggFunc::from_keyword("avg"), Some(AggFunc::Avg));
        assert_eq!(AggFunc::from_keyword("widgets"), None);
    }
}
