//! Clarification state machine. A session holds at most one pending
//! ambiguous request; follow-up replies are interpreted against it by a
//! resolver keyed on what the clarification asked for.
//!
//! State walk: NoPending -> Pending(request, created_at) -> resolved or
//! expired back to NoPending. Expiry is checked lazily on the next message.

use crate::column_resolver::resolve_column;
use crate::dataset::{CellValue, ColumnType, Schema};
use crate::expr::Expression;
use crate::intent::{
    ClarificationKind, NullMethod, OperationKind, OperationRequest, OutlierAction, RowSelector,
};
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How long an unanswered clarification stays live.
pub fn clarification_ttl() -> Duration {
    Duration::minutes(5)
}

lazy_static! {
    static ref NULL_TERMS: Regex =
        Regex::new(r"(?i)\b(?:null|nulls|missing|blank|blanks|empty|nan|na)\b").unwrap();
    static ref REMOVAL_VERB: Regex =
        Regex::new(r"(?i)\b(?:remove|delete|drop|get rid of)\b").unwrap();
    static ref WHOLE_DATASET: Regex =
        Regex::new(r"(?i)\b(?:entire|whole|all|everything|every column)\b").unwrap();
    static ref FIRST_N: Regex = Regex::new(r"(?i)\bfirst\s+(\d+)\b").unwrap();
    static ref LAST_N: Regex = Regex::new(r"(?i)\blast\s+(\d+)\b").unwrap();
    static ref BARE_NUMBER: Regex = Regex::new(r"^\s*(\d+)\s*$").unwrap();
    static ref NAME_VALUE_SPLIT: Regex =
        Regex::new(r"(?i)^\s*(.+?)\s*(?:=|:|\bwith\s+value\b|\bcontaining\b)\s*(.+)$").unwrap();
}

/// The one outstanding ambiguous request of a session. Stores the partial
/// request itself so the resolver has every field the classifier already
/// extracted; `created_at` never refreshes on re-emission, so the TTL is
/// measured from the original question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub request: OperationRequest,
    pub created_at: DateTime<Utc>,
}

impl PendingOperation {
    /// Wrap a request that asked for clarification. None when the request
    /// is already complete.
    pub fn new(request: OperationRequest, now: DateTime<Utc>) -> Option<Self> {
        if request.requires_clarification() {
            Some(Self {
                request,
                created_at: now,
            })
        } else {
            None
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.request.kind()
    }

    pub fn column(&self) -> Option<String> {
        self.request.column_hint()
    }

    pub fn prompt(&self) -> &str {
        self.request
            .clarification()
            .map(|c| c.prompt.as_str())
            .unwrap_or("")
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > clarification_ttl()
    }
}

/// Heuristic for "the user changed the subject": a pending null-handling
/// question followed by a message about removing a column, with no null
/// vocabulary, is a new request and must be classified fresh.
pub fn looks_like_new_request(pending: &PendingOperation, message: &str) -> bool {
    pending.kind() == OperationKind::HandleNulls
        && message.to_lowercase().contains("column")
        && REMOVAL_VERB.is_match(message)
        && !NULL_TERMS.is_match(message)
}

/// What interpreting a clarification reply produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ClarificationOutcome {
    /// The reply completed the request; pending state clears.
    Resolved(OperationRequest),
    /// The reply was insufficient; ask again and keep the pending state
    /// (same TTL origin).
    StillPending(PendingOperation),
}

/// Typo-tolerant keyword pick: best Jaro-Winkler score over the answer's
/// words, accepted at 0.85 so "meen" still reads as mean.
fn fuzzy_keyword<T: Copy>(answer: &str, candidates: &[(&str, T)]) -> Option<T> {
    let mut best: Option<(f64, T)> = None;
    for word in answer.split_whitespace() {
        let word = word
            .to_lowercase()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_string();
        if word.is_empty() {
            continue;
        }
        for (keyword, value) in candidates {
            let score = strsim::jaro_winkler(&word, keyword);
            if score >= 0.85 {
                match best {
                    Some((b, _)) if b >= score => {}
                    _ => best = Some((score, *value)),
                }
            }
        }
    }
    best.map(|(_, v)| v)
}

/// Column lookup for short replies: the layered resolver first, then a
/// typo-tolerant pass over whole column names.
fn resolve_answer_column(answer: &str, columns: &[String]) -> Option<String> {
    if let Some(col) = resolve_column(answer, columns) {
        return Some(col);
    }
    let needle = answer.trim().to_lowercase();
    if needle.len() < 3 {
        return None;
    }
    let mut best: Option<(f64, &String)> = None;
    for col in columns {
        let score = strsim::jaro_winkler(&needle, &col.to_lowercase());
        if score >= 0.85 {
            match best {
                Some((b, _)) if b >= score => {}
                _ => best = Some((score, col)),
            }
        }
    }
    best.map(|(_, c)| c.clone())
}

fn still(pending: &PendingOperation) -> ClarificationOutcome {
    ClarificationOutcome::StillPending(pending.clone())
}

/// Re-ask a column question with the available columns spelled out. The
/// TTL origin stays with the original question.
fn still_with_columns(pending: &PendingOperation, columns: &[String]) -> ClarificationOutcome {
    let mut again = pending.clone();
    if let Some(c) = again.request.clarification_mut() {
        if !c.prompt.contains("Available columns") {
            c.prompt = format!("{} Available columns: {}.", c.prompt, columns.join(", "));
        }
    }
    ClarificationOutcome::StillPending(again)
}

/// Interpret a reply against the pending request. The caller has already
/// ruled out expiry and the changed-subject heuristic.
pub fn resolve_pending(
    pending: &PendingOperation,
    answer: &str,
    schema: &Schema,
) -> ClarificationOutcome {
    let columns = schema.column_names();
    let kind = match pending.request.clarification() {
        Some(c) => c.kind,
        None => return still(pending),
    };
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return still(pending);
    }

    match kind {
        ClarificationKind::NullMethod => resolve_null_method(pending, trimmed),
        ClarificationKind::Column => resolve_column_answer(pending, trimmed, &columns),
        ClarificationKind::Value => resolve_value(pending, trimmed),
        ClarificationKind::Expression => resolve_expression(pending, trimmed, &columns),
        ClarificationKind::ModelTarget => resolve_model_target(pending, trimmed, schema),
        ClarificationKind::OutlierAction => resolve_outlier_action(pending, trimmed),
        ClarificationKind::RowSelection => resolve_row_selection(pending, trimmed),
        ClarificationKind::GroupBy => resolve_group_by(pending, trimmed, &columns),
    }
}

fn resolve_null_method(pending: &PendingOperation, answer: &str) -> ClarificationOutcome {
    let column = pending.column();
    let method = fuzzy_keyword(
        answer,
        &[
            ("delete", NullMethod::Delete),
            ("remove", NullMethod::Delete),
            ("drop", NullMethod::Delete),
            ("mean", NullMethod::Mean),
            ("average", NullMethod::Mean),
            ("median", NullMethod::Median),
            ("mode", NullMethod::Mode),
        ],
    );
    match method {
        Some(method) => ClarificationOutcome::Resolved(OperationRequest::HandleNulls {
            column,
            method: Some(method),
            custom_value: None,
            clarification: None,
        }),
        // Any other short reply is a literal fill value.
        None => ClarificationOutcome::Resolved(OperationRequest::HandleNulls {
            column,
            method: Some(NullMethod::Custom),
            custom_value: Some(CellValue::parse(answer)),
            clarification: None,
        }),
    }
}

fn resolve_column_answer(
    pending: &PendingOperation,
    answer: &str,
    columns: &[String],
) -> ClarificationOutcome {
    let resolved = resolve_answer_column(answer, columns);
    match &pending.request {
        OperationRequest::RemoveColumn { .. } => match resolved {
            Some(column) => ClarificationOutcome::Resolved(OperationRequest::RemoveColumn {
                column: Some(column),
                clarification: None,
            }),
            None => still_with_columns(pending, columns),
        },
        OperationRequest::NormalizeColumn { .. } => match resolved {
            Some(column) => ClarificationOutcome::Resolved(OperationRequest::NormalizeColumn {
                column: Some(column),
                clarification: None,
            }),
            None => still_with_columns(pending, columns),
        },
        OperationRequest::HandleNulls {
            method,
            custom_value,
            ..
        } => {
            // "entire dataset" means scan every column.
            if resolved.is_none() && !WHOLE_DATASET.is_match(answer) {
                return still_with_columns(pending, columns);
            }
            ClarificationOutcome::Resolved(OperationRequest::HandleNulls {
                column: resolved,
                method: *method,
                custom_value: custom_value.clone(),
                clarification: None,
            })
        }
        OperationRequest::DetectOutliers { method, .. } => {
            if resolved.is_none() && !WHOLE_DATASET.is_match(answer) {
                return still_with_columns(pending, columns);
            }
            ClarificationOutcome::Resolved(OperationRequest::DetectOutliers {
                column: resolved,
                method: *method,
                clarification: None,
            })
        }
        OperationRequest::TreatOutliers { method, action, .. } => match resolved {
            Some(column) => ClarificationOutcome::Resolved(OperationRequest::TreatOutliers {
                column: Some(column),
                method: *method,
                action: *action,
                clarification: None,
            }),
            None => still_with_columns(pending, columns),
        },
        _ => still(pending),
    }
}

fn resolve_value(pending: &PendingOperation, answer: &str) -> ClarificationOutcome {
    match &pending.request {
        OperationRequest::CreateStaticColumn { name, .. } => {
            if name.is_empty() {
                // The question asked for both a name and a value; accept
                // "Status = active" or "Status with value active".
                if let Some(caps) = NAME_VALUE_SPLIT.captures(answer) {
                    return ClarificationOutcome::Resolved(
                        OperationRequest::CreateStaticColumn {
                            name: caps[1].trim().to_string(),
                            value: CellValue::parse(caps[2].trim()),
                            clarification: None,
                        },
                    );
                }
                return still(pending);
            }
            ClarificationOutcome::Resolved(OperationRequest::CreateStaticColumn {
                name: name.clone(),
                value: CellValue::parse(answer),
                clarification: None,
            })
        }
        _ => still(pending),
    }
}

fn resolve_expression(
    pending: &PendingOperation,
    answer: &str,
    columns: &[String],
) -> ClarificationOutcome {
    match &pending.request {
        OperationRequest::CreateDerivedColumn { name, .. } => {
            match Expression::parse(answer, columns) {
                Ok(_) => ClarificationOutcome::Resolved(OperationRequest::CreateDerivedColumn {
                    name: name.clone(),
                    expression: answer.to_string(),
                    clarification: None,
                }),
                Err(_) => still(pending),
            }
        }
        _ => still(pending),
    }
}

fn resolve_model_target(
    pending: &PendingOperation,
    answer: &str,
    schema: &Schema,
) -> ClarificationOutcome {
    let columns = schema.column_names();
    match &pending.request {
        OperationRequest::TrainModel {
            model_kind,
            features,
            ..
        } => match resolve_answer_column(answer, &columns) {
            Some(target) => {
                let features = if features.is_empty() {
                    schema
                        .columns
                        .iter()
                        .filter(|c| c.inferred_type == ColumnType::Number && c.name != target)
                        .map(|c| c.name.clone())
                        .collect()
                } else {
                    features.clone()
                };
                ClarificationOutcome::Resolved(OperationRequest::TrainModel {
                    model_kind: *model_kind,
                    target,
                    features,
                    clarification: None,
                })
            }
            None => still_with_columns(pending, &columns),
        },
        _ => still(pending),
    }
}

fn resolve_outlier_action(pending: &PendingOperation, answer: &str) -> ClarificationOutcome {
    match &pending.request {
        OperationRequest::TreatOutliers { column, method, .. } => {
            let action = fuzzy_keyword(
                answer,
                &[
                    ("remove", OutlierAction::Remove),
                    ("delete", OutlierAction::Remove),
                    ("drop", OutlierAction::Remove),
                    ("cap", OutlierAction::Cap),
                    ("clip", OutlierAction::Cap),
                    ("median", OutlierAction::ReplaceMedian),
                ],
            );
            match action {
                Some(action) => ClarificationOutcome::Resolved(OperationRequest::TreatOutliers {
                    column: column.clone(),
                    method: *method,
                    action,
                    clarification: None,
                }),
                None => still(pending),
            }
        }
        _ => still(pending),
    }
}

fn resolve_row_selection(pending: &PendingOperation, answer: &str) -> ClarificationOutcome {
    let selector = if let Some(caps) = FIRST_N.captures(answer) {
        caps[1].parse().ok().map(RowSelector::FirstN)
    } else if let Some(caps) = LAST_N.captures(answer) {
        caps[1].parse().ok().map(RowSelector::LastN)
    } else if let Some(caps) = BARE_NUMBER.captures(answer) {
        caps[1].parse().ok().map(RowSelector::Index)
    } else {
        None
    };
    match selector {
        Some(selector) => {
            ClarificationOutcome::Resolved(OperationRequest::RemoveRows { selector })
        }
        None => still(pending),
    }
}

fn resolve_group_by(
    pending: &PendingOperation,
    answer: &str,
    columns: &[String],
) -> ClarificationOutcome {
    match resolve_answer_column(answer, columns) {
        Some(group_by) => ClarificationOutcome::Resolved(OperationRequest::Aggregate {
            group_by,
            functions: HashMap::new(),
            value_columns: None,
            sort_by: None,
            ascending: true,
        }),
        None => still_with_columns(pending, columns),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnInfo;
    use crate::intent::{Clarification, OutlierMethod};

    fn schema() -> Schema {
        Schema {
            columns: vec![
                ColumnInfo {
                    name: "Region".into(),
                    inferred_type: ColumnType::Text,
                    sample_values: vec![],
                },
                ColumnInfo {
                    name: "Sales".into(),
                    inferred_type: ColumnType::Number,
                    sample_values: vec![],
                },
                ColumnInfo {
                    name: "Cost".into(),
                    inferred_type: ColumnType::Number,
                    sample_values: vec![],
                },
            ],
        }
    }

    fn pending_nulls(column: Option<&str>) -> PendingOperation {
        PendingOperation::new(
            OperationRequest::HandleNulls {
                column: column.map(|c| c.to_string()),
                method: None,
                custom_value: None,
                clarification: Some(Clarification {
                    kind: ClarificationKind::NullMethod,
                    prompt: "How should I handle the nulls?".into(),
                }),
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_pending_only_wraps_ambiguous_requests() {
        assert!(PendingOperation::new(OperationRequest::Summarize, Utc::now()).is_none());
        assert!(PendingOperation::new(
            OperationRequest::RemoveColumn {
                column: None,
                clarification: Some(Clarification {
                    kind: ClarificationKind::Column,
                    prompt: "Which column?".into(),
                }),
            },
            Utc::now()
        )
        .is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let pending = pending_nulls(Some("Sales"));
        assert!(!pending.is_expired(pending.created_at + Duration::minutes(4)));
        assert!(pending.is_expired(pending.created_at + Duration::minutes(5) + Duration::seconds(1)));
    }

    #[test]
    fn test_null_method_answer_with_typo() {
        let outcome = resolve_pending(&pending_nulls(Some("Sales")), "use the meen", &schema());
        match outcome {
            ClarificationOutcome::Resolved(OperationRequest::HandleNulls {
                column, method, ..
            }) => {
                assert_eq!(column.as_deref(), Some("Sales"));
                assert_eq!(method, Some(NullMethod::Mean));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_null_method_bare_value_is_custom_fill() {
        let outcome = resolve_pending(&pending_nulls(Some("Sales")), "0", &schema());
        match outcome {
            ClarificationOutcome::Resolved(OperationRequest::HandleNulls {
                method,
                custom_value,
                ..
            }) => {
                assert_eq!(method, Some(NullMethod::Custom));
                assert_eq!(custom_value, Some(CellValue::Number(0.0)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_changed_subject_heuristic() {
        let pending = pending_nulls(None);
        assert!(looks_like_new_request(&pending, "remove the Cost column"));
        assert!(!looks_like_new_request(
            &pending,
            "remove the null rows in that column"
        ));
        assert!(!looks_like_new_request(&pending, "mean"));
    }

    #[test]
    fn test_column_answer_resolves_typo() {
        let pending = PendingOperation::new(
            OperationRequest::NormalizeColumn {
                column: None,
                clarification: Some(Clarification {
                    kind: ClarificationKind::Column,
                    prompt: "Which column should I normalize?".into(),
                }),
            },
            Utc::now(),
        )
        .unwrap();
        match resolve_pending(&pending, "Slaes", &schema()) {
            ClarificationOutcome::Resolved(OperationRequest::NormalizeColumn {
                column, ..
            }) => assert_eq!(column.as_deref(), Some("Sales")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_entire_dataset_answer_clears_column() {
        let pending = PendingOperation::new(
            OperationRequest::HandleNulls {
                column: None,
                method: Some(NullMethod::Delete),
                custom_value: None,
                clarification: Some(Clarification {
                    kind: ClarificationKind::Column,
                    prompt: "Which column has the nulls?".into(),
                }),
            },
            Utc::now(),
        )
        .unwrap();
        match resolve_pending(&pending, "the entire dataset", &schema()) {
            ClarificationOutcome::Resolved(OperationRequest::HandleNulls {
                column, method, ..
            }) => {
                assert_eq!(column, None);
                assert_eq!(method, Some(NullMethod::Delete));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unresolvable_answer_keeps_pending_and_ttl_origin() {
        let pending = PendingOperation::new(
            OperationRequest::RemoveColumn {
                column: None,
                clarification: Some(Clarification {
                    kind: ClarificationKind::Column,
                    prompt: "Which column should I remove?".into(),
                }),
            },
            Utc::now(),
        )
        .unwrap();
        match resolve_pending(&pending, "the green one", &schema()) {
            ClarificationOutcome::StillPending(again) => {
                assert_eq!(again.created_at, pending.created_at);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_failed_column_answer_lists_available_columns() {
        let pending = PendingOperation::new(
            OperationRequest::RemoveColumn {
                column: None,
                clarification: Some(Clarification {
                    kind: ClarificationKind::Column,
                    prompt: "Which column should I remove?".into(),
                }),
            },
            Utc::now(),
        )
        .unwrap();
        let first = match resolve_pending(&pending, "the green one", &schema()) {
            ClarificationOutcome::StillPending(again) => again,
            other => panic!("unexpected: {:?}", other),
        };
        assert!(first.prompt().contains("Region, Sales, Cost"));
        assert_eq!(first.created_at, pending.created_at);

        // A second miss re-asks without stacking the column list.
        match resolve_pending(&first, "still no idea", &schema()) {
            ClarificationOutcome::StillPending(second) => {
                assert_eq!(second.prompt(), first.prompt());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_outlier_action_answer() {
        let pending = PendingOperation::new(
            OperationRequest::TreatOutliers {
                column: Some("Sales".into()),
                method: OutlierMethod::Iqr,
                action: OutlierAction::Remove,
                clarification: Some(Clarification {
                    kind: ClarificationKind::OutlierAction,
                    prompt: "Remove, cap, or replace with the median?".into(),
                }),
            },
            Utc::now(),
        )
        .unwrap();
        match resolve_pending(&pending, "cap them", &schema()) {
            ClarificationOutcome::Resolved(OperationRequest::TreatOutliers {
                action, ..
            }) => assert_eq!(action, OutlierAction::Cap),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_expression_answer_validated() {
        let pending = PendingOperation::new(
            OperationRequest::CreateDerivedColumn {
                name: "Margin".into(),
                expression: String::new(),
                clarification: Some(Clarification {
                    kind: ClarificationKind::Expression,
                    prompt: "What formula should compute 'Margin'?".into(),
                }),
            },
            Utc::now(),
        )
        .unwrap();
        match resolve_pending(&pending, "Sales - Cost", &schema()) {
            ClarificationOutcome::Resolved(OperationRequest::CreateDerivedColumn {
                expression,
                ..
            }) => assert_eq!(expression, "Sales - Cost"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            resolve_pending(&pending, "Sales - Bogus", &schema()),
            ClarificationOutcome::StillPending(_)
        ));
    }

    #[test]
    fn test_model_target_answer_defaults_numeric_features() {
        let pending = PendingOperation::new(
            OperationRequest::TrainModel {
                model_kind: crate::intent::ModelKind::Linear,
                target: String::new(),
                features: Vec::new(),
                clarification: Some(Clarification {
                    kind: ClarificationKind::ModelTarget,
                    prompt: "Which column should the model predict?".into(),
                }),
            },
            Utc::now(),
        )
        .unwrap();
        match resolve_pending(&pending, "Sales", &schema()) {
            ClarificationOutcome::Resolved(OperationRequest::TrainModel {
                target,
                features,
                ..
            }) => {
                assert_eq!(target, "Sales");
                assert_eq!(features, vec!["Cost".to_string()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
