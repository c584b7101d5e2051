//! Layered intent classification: literal patterns, then the hosted model,
//! then the deterministic regex backstop. Each layer is pure and the
//! orchestrator is a first-success fold — no shared flags.
//!
//! Precedence is product policy, preserved deliberately: layer 1 results are
//! authoritative and bypass everything else; layer 2 is authoritative unless
//! it fails or reports `unknown`; layer 3 is the final deterministic word.

use crate::column_resolver::resolve_column;
use crate::dataset::{CellValue, ColumnType, Schema};
use crate::intent::{
    Clarification, ClarificationKind, ModelKind, ModifyOp, NullMethod, OperationRequest,
    OutlierAction, OutlierMethod, PreviewMode, RowSelector,
};
use crate::llm::{strip_code_fences, ChatTurn, LanguageModel};
use crate::patterns::{self, PatternContext};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// How many turns of history are restated to the model.
const HISTORY_WINDOW: usize = 6;
/// Bounded retry count for the external call.
const MAX_LLM_ATTEMPTS: usize = 2;

const OPERATION_KINDS: &[&str] = &[
    "handle-nulls",
    "preview",
    "summarize",
    "convert-type",
    "count-nulls",
    "describe",
    "create-derived-column",
    "create-static-column",
    "modify-column",
    "normalize-column",
    "remove-column",
    "rename-column",
    "remove-rows",
    "add-row",
    "aggregate",
    "pivot",
    "train-model",
    "replace-value",
    "detect-outliers",
    "treat-outliers",
    "revert",
    "unknown",
];

/// Structured output expected from the classification call. Everything but
/// `operation` is optional; missing fields are rescued from message cues or
/// turned into clarifications.
#[derive(Debug, Default, Deserialize)]
struct LlmIntent {
    operation: String,
    #[serde(default)]
    column: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    find: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    new_name: Option<String>,
    #[serde(default)]
    expression: Option<String>,
    #[serde(default)]
    group_by: Option<String>,
    #[serde(default)]
    sort_by: Option<String>,
    #[serde(default)]
    descending: Option<bool>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    features: Option<Vec<String>>,
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    operand: Option<f64>,
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    target_type: Option<String>,
    #[serde(default)]
    model_kind: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    selector: Option<String>,
}

pub struct IntentClassifier {
    model: Option<Arc<dyn LanguageModel>>,
}

impl IntentClassifier {
    pub fn new(model: Option<Arc<dyn LanguageModel>>) -> Self {
        Self { model }
    }

    /// Translate one free-text message into a typed operation request.
    pub async fn classify(
        &self,
        message: &str,
        history: &[ChatTurn],
        schema: &Schema,
    ) -> OperationRequest {
        let ctx = PatternContext::new(message, history, schema);

        // Layer 1: literal patterns must never be reinterpreted.
        if let Some(request) = patterns::match_literal(&ctx) {
            debug!("classified by literal pattern: {}", request.kind());
            return request;
        }

        // Layer 2: hosted classification service, bounded retries. Any
        // failure mode (transport, malformed JSON, `unknown`) falls through.
        if let Some(model) = &self.model {
            let prompt = self.build_prompt(message, history, schema);
            for attempt in 0..MAX_LLM_ATTEMPTS {
                match model.complete(&prompt).await {
                    Ok(raw) => {
                        match serde_json::from_str::<LlmIntent>(strip_code_fences(&raw)) {
                            Ok(intent) if intent.operation != "unknown" => {
                                if let Some(request) = self.request_from_llm(intent, &ctx) {
                                    let request = rescue(request, &ctx);
                                    debug!(
                                        "classified by language model: {}",
                                        request.kind()
                                    );
                                    return request;
                                }
                            }
                            Ok(_) => break,
                            Err(e) => {
                                warn!(
                                    "classification response unparseable (attempt {}): {}",
                                    attempt + 1,
                                    e
                                );
                            }
                        }
                    }
                    Err(e) => {
                        warn!("classification call failed (attempt {}): {}", attempt + 1, e);
                    }
                }
            }
        }

        // Layer 3: deterministic backstop.
        if let Some(request) = patterns::match_cascade(&ctx) {
            debug!("classified by backstop cascade: {}", request.kind());
            return request;
        }

        OperationRequest::Unknown
    }

    fn build_prompt(&self, message: &str, history: &[ChatTurn], schema: &Schema) -> String {
        let columns: Vec<String> = schema
            .columns
            .iter()
            .map(|c| format!("{} ({})", c.name, c.inferred_type))
            .collect();
        let recent: Vec<String> = history
            .iter()
            .rev()
            .take(HISTORY_WINDOW)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|t| format!("{}: {}", t.role, t.content.replace('\n', " ")))
            .collect();

        format!(
            r#"Classify a data-operation request. Return JSON only.
Operations (the only legal values): {}
Columns: {}
Recent conversation:
{}
Request: "{}"
Format: {{"operation":"<kind>","column":"<name>"|null,"method":"delete|mean|median|mode|custom"|null,"value":<scalar>|null,"find":"<text>"|null,"name":"<new column>"|null,"new_name":"<name>"|null,"expression":"<formula>"|null,"group_by":"<column>"|null,"sort_by":"<column>"|null,"descending":bool|null,"target":"<column>"|null,"features":["<column>"]|null,"count":<n>|null,"operand":<n>|null,"op":"add|subtract|multiply|divide"|null,"target_type":"number|text|date"|null,"model_kind":"linear|logistic"|null,"action":"remove|cap|replace_median"|null,"selector":"first|last|index|keep-first"|null}}"#,
            OPERATION_KINDS.join(", "),
            columns.join(", "),
            if recent.is_empty() {
                "(none)".to_string()
            } else {
                recent.join("\n")
            },
            message
        )
    }

    /// Convert the model's loose JSON into a typed request, coercing every
    /// column reference through the resolver. Returns None when the reported
    /// kind cannot be materialized, which counts as a layer-2 failure.
    fn request_from_llm(
        &self,
        intent: LlmIntent,
        ctx: &PatternContext,
    ) -> Option<OperationRequest> {
        let resolve = |name: &Option<String>| -> Option<String> {
            name.as_deref()
                .and_then(|n| resolve_column(n, &ctx.columns))
        };
        let column = resolve(&intent.column);

        let request = match intent.operation.as_str() {
            "handle-nulls" => {
                let method = intent.method.as_deref().and_then(parse_null_method);
                let custom_value = intent.value.as_ref().map(CellValue::from_json);
                let clarification = if method.is_none() && custom_value.is_none() {
                    Some(Clarification {
                        kind: ClarificationKind::NullMethod,
                        prompt: "How should I handle the nulls? I can delete those rows, or fill them with the mean, median, mode, or a custom value.".to_string(),
                    })
                } else {
                    None
                };
                OperationRequest::HandleNulls {
                    column,
                    method: if custom_value.is_some() && method.is_none() {
                        Some(NullMethod::Custom)
                    } else {
                        method
                    },
                    custom_value,
                    clarification,
                }
            }
            "preview" => {
                let n = intent.count.unwrap_or(5);
                let mode = match intent.selector.as_deref() {
                    Some("last") => PreviewMode::Last(n),
                    Some("index") => PreviewMode::Row(n),
                    _ => PreviewMode::First(n),
                };
                OperationRequest::Preview { mode }
            }
            "summarize" => OperationRequest::Summarize,
            "convert-type" => OperationRequest::ConvertType {
                column: column?,
                target: match intent.target_type.as_deref() {
                    Some("number") => ColumnType::Number,
                    Some("date") => ColumnType::Date,
                    _ => ColumnType::Text,
                },
            },
            "count-nulls" => OperationRequest::CountNulls { column },
            "describe" => OperationRequest::Describe { column },
            "create-derived-column" => {
                let name = intent.name.or(intent.new_name)?;
                match intent.expression {
                    Some(expression) if !expression.trim().is_empty() => {
                        OperationRequest::CreateDerivedColumn {
                            name,
                            expression,
                            clarification: None,
                        }
                    }
                    _ => OperationRequest::CreateDerivedColumn {
                        name: name.clone(),
                        expression: String::new(),
                        clarification: Some(Clarification {
                            kind: ClarificationKind::Expression,
                            prompt: format!("What formula should compute '{}'?", name),
                        }),
                    },
                }
            }
            "create-static-column" => {
                let name = intent.name.or(intent.new_name)?;
                match intent.value {
                    Some(ref v) => OperationRequest::CreateStaticColumn {
                        name,
                        value: CellValue::from_json(v),
                        clarification: None,
                    },
                    None => OperationRequest::CreateStaticColumn {
                        name: name.clone(),
                        value: CellValue::Null,
                        clarification: Some(Clarification {
                            kind: ClarificationKind::Value,
                            prompt: format!("What value should every row of '{}' hold?", name),
                        }),
                    },
                }
            }
            "modify-column" => OperationRequest::ModifyColumn {
                column: column?,
                op: match intent.op.as_deref() {
                    Some("add") => ModifyOp::Add,
                    Some("subtract") => ModifyOp::Subtract,
                    Some("divide") => ModifyOp::Divide,
                    Some("multiply") => ModifyOp::Multiply,
                    _ => return None,
                },
                operand: intent.operand?,
            },
            "normalize-column" => match column {
                Some(column) => OperationRequest::NormalizeColumn {
                    column: Some(column),
                    clarification: None,
                },
                None => OperationRequest::NormalizeColumn {
                    column: None,
                    clarification: Some(Clarification {
                        kind: ClarificationKind::Column,
                        prompt: "Which column should I normalize?".to_string(),
                    }),
                },
            },
            "remove-column" => match column {
                Some(column) => OperationRequest::RemoveColumn {
                    column: Some(column),
                    clarification: None,
                },
                None => OperationRequest::RemoveColumn {
                    column: None,
                    clarification: Some(Clarification {
                        kind: ClarificationKind::Column,
                        prompt: "Which column should I remove?".to_string(),
                    }),
                },
            },
            "rename-column" => OperationRequest::RenameColumn {
                column: column?,
                new_name: intent.new_name.or(intent.name)?,
            },
            "remove-rows" => {
                let n = intent.count?;
                let selector = match intent.selector.as_deref() {
                    Some("last") => RowSelector::LastN(n),
                    Some("index") => RowSelector::Index(n),
                    Some("keep-first") => RowSelector::KeepFirstN(n),
                    _ => RowSelector::FirstN(n),
                };
                OperationRequest::RemoveRows { selector }
            }
            "add-row" => OperationRequest::AddRow {
                values: HashMap::new(),
            },
            "aggregate" => OperationRequest::Aggregate {
                group_by: resolve(&intent.group_by)?,
                functions: HashMap::new(),
                value_columns: None,
                sort_by: resolve(&intent.sort_by),
                ascending: !intent.descending.unwrap_or(false),
            },
            "pivot" => OperationRequest::Pivot {
                index: resolve(&intent.group_by).or(column)?,
                value_columns: None,
                functions: HashMap::new(),
            },
            "train-model" => {
                let model_kind = match intent.model_kind.as_deref() {
                    Some("logistic") => ModelKind::Logistic,
                    _ => ModelKind::Linear,
                };
                match resolve(&intent.target) {
                    Some(target) => {
                        let features: Vec<String> = intent
                            .features
                            .unwrap_or_default()
                            .iter()
                            .filter_map(|f| resolve_column(f, &ctx.columns))
                            .filter(|f| *f != target)
                            .collect();
                        OperationRequest::TrainModel {
                            model_kind,
                            target,
                            features,
                            clarification: None,
                        }
                    }
                    None => OperationRequest::TrainModel {
                        model_kind,
                        target: String::new(),
                        features: Vec::new(),
                        clarification: Some(Clarification {
                            kind: ClarificationKind::ModelTarget,
                            prompt: "Which column should the model predict?".to_string(),
                        }),
                    },
                }
            }
            "replace-value" => OperationRequest::ReplaceValue {
                column,
                find: intent.find?,
                replace_with: intent
                    .value
                    .as_ref()
                    .map(CellValue::from_json)
                    .unwrap_or(CellValue::Null),
                clarification: None,
            },
            "detect-outliers" => OperationRequest::DetectOutliers {
                column,
                method: parse_outlier_method(intent.method.as_deref()),
                clarification: None,
            },
            "treat-outliers" => OperationRequest::TreatOutliers {
                column,
                method: parse_outlier_method(intent.method.as_deref()),
                action: match intent.action.as_deref() {
                    Some("cap") => OutlierAction::Cap,
                    Some("replace_median") => OutlierAction::ReplaceMedian,
                    _ => OutlierAction::Remove,
                },
                clarification: None,
            },
            "revert" => OperationRequest::Revert,
            _ => return None,
        };
        Some(request)
    }
}

fn parse_null_method(raw: &str) -> Option<NullMethod> {
    match raw {
        "delete" => Some(NullMethod::Delete),
        "mean" => Some(NullMethod::Mean),
        "median" => Some(NullMethod::Median),
        "mode" => Some(NullMethod::Mode),
        "custom" => Some(NullMethod::Custom),
        _ => None,
    }
}

fn parse_outlier_method(raw: Option<&str>) -> OutlierMethod {
    match raw {
        Some("zscore") | Some("z-score") | Some("z_score") => OutlierMethod::ZScore,
        _ => OutlierMethod::Iqr,
    }
}

/// Deterministic cross-check of layer-2 output against explicit keyword cues
/// in the raw message. The external service may omit fields the user stated
/// outright; this rescue pass is pure, never another model call.
fn rescue(request: OperationRequest, ctx: &PatternContext) -> OperationRequest {
    let lower = ctx.message.to_lowercase();
    match request {
        OperationRequest::HandleNulls {
            column,
            method,
            custom_value,
            clarification,
        } => {
            let cued = if lower.contains("mean") || lower.contains("average") {
                Some(NullMethod::Mean)
            } else if lower.contains("median") {
                Some(NullMethod::Median)
            } else if lower.contains("mode") || lower.contains("most common") {
                Some(NullMethod::Mode)
            } else if lower.contains("delete") || lower.contains("remove") || lower.contains("drop")
            {
                Some(NullMethod::Delete)
            } else {
                None
            };
            match cued {
                Some(cued) if method != Some(NullMethod::Custom) => {
                    OperationRequest::HandleNulls {
                        column,
                        method: Some(cued),
                        custom_value,
                        clarification: None,
                    }
                }
                _ => OperationRequest::HandleNulls {
                    column,
                    method,
                    custom_value,
                    clarification,
                },
            }
        }
        OperationRequest::Aggregate {
            group_by,
            mut functions,
            value_columns,
            sort_by,
            ascending,
        } => {
            // Explicit "Total X" / "Avg Y" phrasing wins over whatever the
            // service reported.
            for (col, func) in patterns::extract_functions(ctx) {
                functions.insert(col, func);
            }
            let value_columns = value_columns.or_else(|| {
                let cols: Vec<String> = functions
                    .keys()
                    .filter(|c| **c != group_by)
                    .cloned()
                    .collect();
                if cols.is_empty() {
                    None
                } else {
                    Some(cols)
                }
            });
            OperationRequest::Aggregate {
                group_by,
                functions,
                value_columns,
                sort_by,
                ascending,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnInfo;
    use crate::llm::ScriptedModel;

    fn sales_schema() -> Schema {
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
            ],
        }
    }

    fn classifier_with(responses: Vec<&str>) -> IntentClassifier {
        IntentClassifier::new(Some(Arc::new(ScriptedModel::new(responses))))
    }

    #[tokio::test]
    async fn test_literal_layer_bypasses_model() {
        let model = Arc::new(ScriptedModel::empty());
        let classifier = IntentClassifier::new(Some(model.clone()));
        let req = classifier
            .classify("keep only first 2 rows", &[], &sales_schema())
            .await;
        assert_eq!(
            req,
            OperationRequest::RemoveRows {
                selector: RowSelector::KeepFirstN(2)
            }
        );
        assert!(model.prompts().is_empty(), "literal layer must not call the model");
    }

    #[tokio::test]
    async fn test_model_result_is_authoritative_over_backstop() {
        // Intentional tie-break: the service's kind wins over what the regex
        // cascade would have said, unless it reports `unknown`.
        let classifier = classifier_with(vec![
            r#"{"operation":"describe","column":"Sales"}"#,
        ]);
        let req = classifier
            .classify("give me a sense of the sales numbers", &[], &sales_schema())
            .await;
        assert_eq!(
            req,
            OperationRequest::Describe {
                column: Some("Sales".into())
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_from_model_falls_to_backstop() {
        let classifier = classifier_with(vec![r#"{"operation":"unknown"}"#]);
        let req = classifier
            .classify("normalize Sales", &[], &sales_schema())
            .await;
        assert_eq!(
            req,
            OperationRequest::NormalizeColumn {
                column: Some("Sales".into()),
                clarification: None
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_model_output_retries_then_backstop() {
        let classifier = classifier_with(vec!["not json at all", "still not json"]);
        let req = classifier
            .classify("normalize Sales", &[], &sales_schema())
            .await;
        assert_eq!(
            req,
            OperationRequest::NormalizeColumn {
                column: Some("Sales".into()),
                clarification: None
            }
        );
    }

    #[tokio::test]
    async fn test_no_model_uses_backstop() {
        let classifier = IntentClassifier::new(None);
        let req = classifier
            .classify("remove nulls in Sales", &[], &sales_schema())
            .await;
        match req {
            OperationRequest::HandleNulls { method, .. } => {
                assert_eq!(method, Some(NullMethod::Delete))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rescue_forces_stated_method() {
        // The service omits the method even though the user said "mean".
        let classifier = classifier_with(vec![
            r#"{"operation":"handle-nulls","column":"Sales"}"#,
        ]);
        let req = classifier
            .classify("impute the nulls in Sales with mean", &[], &sales_schema())
            .await;
        match req {
            OperationRequest::HandleNulls {
                method,
                clarification,
                ..
            } => {
                assert_eq!(method, Some(NullMethod::Mean));
                assert!(clarification.is_none());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_model_column_coerced_through_resolver() {
        let classifier = classifier_with(vec![
            r#"{"operation":"remove-column","column":"sales numbers"}"#,
        ]);
        let req = classifier
            .classify("get rid of that sales info", &[], &sales_schema())
            .await;
        assert_eq!(
            req,
            OperationRequest::RemoveColumn {
                column: Some("Sales".into()),
                clarification: None
            }
        );
    }

    #[tokio::test]
    async fn test_nothing_matches_returns_unknown() {
        let classifier = IntentClassifier::new(None);
        let req = classifier
            .classify("tell me a joke", &[], &sales_schema())
            .await;
        assert_eq!(req, OperationRequest::Unknown);
    }
}
