//! Deterministic classification layers: high-confidence literal patterns
//! (checked before anything else, never reinterpreted by noisier layers) and
//! the ordered regex/keyword backstop cascade.
//!
//! Precedence is data, not nested conditionals: each layer is an ordered
//! table of `(name, rule)` pairs folded to first success, so individual
//! rules test in isolation.

use crate::column_resolver::resolve_column;
use crate::dataset::{CellValue, ColumnType, Schema};
use crate::intent::{
    AggFunc, Clarification, ClarificationKind, ModelKind, ModifyOp, NullMethod,
    OperationRequest, OutlierAction, OutlierMethod, PreviewMode, RowSelector,
};
use crate::llm::ChatTurn;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref NULL_VOCAB: Regex =
        Regex::new(r"(?i)\b(null|nulls|missing|blank|blanks|empty|n/?a|nan)\b").unwrap();
    static ref RE_REPLACE: Regex = Regex::new(
        r#"(?i)\breplace\s+"?'?(.+?)'?"?\s+with\s+"?'?(.+?)'?"?(?:\s+in\s+(?:the\s+)?(?:column\s+)?(.+?))?\s*$"#
    )
    .unwrap();
    static ref RE_PUT_INSTEAD: Regex = Regex::new(
        r"(?i)\bremove\s+(.+?)\s+and\s+put\s+(.+?)\s+instead\b(?:\s+in\s+(?:the\s+)?(?:column\s+)?(.+?))?\s*$"
    )
    .unwrap();
    static ref RE_REMOVE_COLUMN_A: Regex = Regex::new(
        r"(?i)\b(?:remove|delete|drop)\s+(?:the\s+)?column\s+(?:named\s+|called\s+)?(.+?)\s*$"
    )
    .unwrap();
    static ref RE_REMOVE_COLUMN_B: Regex =
        Regex::new(r"(?i)\b(?:remove|delete|drop)\s+(?:the\s+)?(.+?)\s+column\s*$").unwrap();
    static ref RE_KEEP_FIRST: Regex =
        Regex::new(r"(?i)\bkeep\s+(?:only\s+)?(?:the\s+)?first\s+(\d+)\s+rows?\b").unwrap();
    static ref RE_REMOVE_FIRST_N: Regex =
        Regex::new(r"(?i)\b(?:remove|delete|drop)\s+(?:the\s+)?first\s+(\d+)\s+rows?\b").unwrap();
    static ref RE_REMOVE_LAST_N: Regex =
        Regex::new(r"(?i)\b(?:remove|delete|drop)\s+(?:the\s+)?last\s+(\d+)\s+rows?\b").unwrap();
    static ref RE_REMOVE_FIRST_ONE: Regex =
        Regex::new(r"(?i)\b(?:remove|delete|drop)\s+(?:the\s+)?first\s+row\b").unwrap();
    static ref RE_REMOVE_LAST_ONE: Regex =
        Regex::new(r"(?i)\b(?:remove|delete|drop)\s+(?:the\s+)?last\s+row\b").unwrap();
    static ref RE_REMOVE_ROW_N: Regex =
        Regex::new(r"(?i)\b(?:remove|delete|drop)\s+(?:the\s+)?row\s+(?:number\s+)?(\d+)\b")
            .unwrap();
    static ref RE_REMOVE_NTH_ROW: Regex =
        Regex::new(r"(?i)\b(?:remove|delete|drop)\s+(?:the\s+)?(\d+)(?:st|nd|rd|th)\s+row\b")
            .unwrap();
    static ref RE_REVERT: Regex = Regex::new(
        r"(?i)\b(?:revert|undo all(?: changes)?|go back to (?:the )?original|restore (?:the )?original|reset (?:the )?(?:data|dataset))\b"
    )
    .unwrap();
    static ref RE_ADVICE: Regex = Regex::new(
        r"(?i)\b(?:how (?:can|do|should|would) (?:i|we)|why (?:is|does|did)|what (?:should|could|would))\b"
    )
    .unwrap();
    static ref RE_COUNT_NULLS: Regex = Regex::new(
        r"(?i)\b(?:how many|count(?: of)?|number of)\s+(?:nulls?|missing|blanks?|empty)"
    )
    .unwrap();
    static ref RE_FILL_VERB: Regex =
        Regex::new(r"(?i)\b(?:fill|impute|substitute)\b").unwrap();
    static ref RE_DELETE_VERB: Regex =
        Regex::new(r"(?i)\b(?:remove|delete|drop|get rid of|clean(?:\s+up)?)\b").unwrap();
    static ref RE_FILL_WITH: Regex =
        Regex::new(r"(?i)\b(?:with|using)\s+(.+?)(?:\s+in\s+(?:the\s+)?.+)?\s*$").unwrap();
    static ref RE_PREVIEW_VERB: Regex =
        Regex::new(r"(?i)\b(?:show|preview|display|view|print|head|tail)\b").unwrap();
    static ref RE_ROW_RANGE: Regex =
        Regex::new(r"(?i)\brows?\s+(\d+)\s*(?:-|to|through)\s*(\d+)\b").unwrap();
    static ref RE_ROW_ONE: Regex = Regex::new(r"(?i)\brow\s+(\d+)\b").unwrap();
    static ref RE_LAST_ROWS: Regex =
        Regex::new(r"(?i)\b(?:last|bottom)\s+(\d+)?\s*rows?\b|\btail\b").unwrap();
    static ref RE_FIRST_ROWS: Regex =
        Regex::new(r"(?i)\b(?:first|top)\s+(\d+)?\s*rows?\b|\bhead\b").unwrap();
    static ref RE_SUMMARY: Regex =
        Regex::new(r"(?i)\b(?:summar(?:y|ize|ise)|overview)\b").unwrap();
    static ref RE_DESCRIBE: Regex =
        Regex::new(r"(?i)\b(?:describe|statistics|stats|distribution)\b").unwrap();
    static ref RE_NORMALIZE: Regex =
        Regex::new(r"(?i)\b(?:normali[sz]e|min[- ]?max|rescale|scale)\b").unwrap();
    static ref RE_OUTLIER: Regex = Regex::new(r"(?i)\boutliers?\b").unwrap();
    static ref RE_ZSCORE: Regex = Regex::new(r"(?i)\bz[\s-]?scores?\b").unwrap();
    static ref RE_CONVERT: Regex = Regex::new(
        r"(?i)\b(?:convert|cast|change)\b.*?\bto\s+(?:a\s+)?(number|numeric|float|integer|int|text|string|date)s?\b"
    )
    .unwrap();
    static ref RE_RENAME: Regex = Regex::new(
        r#"(?i)\brename\s+(?:the\s+)?(?:column\s+)?(.+?)\s+(?:to|as)\s+"?([\w %()-]+?)"?\s*$"#
    )
    .unwrap();
    static ref RE_ADD_ROW: Regex =
        Regex::new(r"(?i)\badd\s+(?:a\s+|one\s+)?(?:new\s+)?row\b").unwrap();
    static ref RE_ROW_VALUES: Regex =
        Regex::new(r"(?i)\b(?:with|values?)[: ]\s*(.+)$").unwrap();
    static ref RE_CREATE_COLUMN: Regex =
        Regex::new(r"(?i)\b(?:create|add|make|insert|new)\b.*?\bcolumn\b").unwrap();
    static ref RE_COLUMN_NAME: Regex = Regex::new(
        r#"(?i)\bcolumn\s+(?:called\s+|named\s+)?"?([A-Za-z_][\w %]*?)"?(?:\s+(?:as|=|with|equal|set)\b|\s*$)"#
    )
    .unwrap();
    static ref RE_EXPRESSION_PART: Regex =
        Regex::new(r"(?i)\b(?:as|equal to|with formula|computed as|=)\s+(.+)\s*$").unwrap();
    static ref RE_STATIC_VALUE: Regex = Regex::new(
        r#"(?i)\b(?:with\s+(?:value|default)|set\s+to|value\s+of|defaulting\s+to)\s+"?(.+?)"?\s*$"#
    )
    .unwrap();
    static ref RE_ARITHMETIC_TOKEN: Regex = Regex::new(
        r"(?i)[+*/=]|\w\s*-\s*\w|\b(?:plus|minus|times|divided|product|difference|ratio|sum of)\b"
    )
    .unwrap();
    static ref RE_BY_NUMBER: Regex =
        Regex::new(r"(?i)\bby\s+(-?\d+(?:\.\d+)?)\b").unwrap();
    static ref RE_ADD_N_TO: Regex =
        Regex::new(r"(?i)\badd\s+(-?\d+(?:\.\d+)?)\s+to\b").unwrap();
    static ref RE_SUBTRACT_N_FROM: Regex =
        Regex::new(r"(?i)\bsubtract\s+(-?\d+(?:\.\d+)?)\s+from\b").unwrap();
    static ref RE_TIMES_N: Regex =
        Regex::new(r"(?i)\b(?:times|with)\s+(-?\d+(?:\.\d+)?)\b").unwrap();
    static ref RE_PIVOT: Regex = Regex::new(r"(?i)\bpivot\b").unwrap();
    static ref RE_PIVOT_INDEX: Regex =
        Regex::new(r"(?i)\b(?:on|by|around|index(?:ed)? (?:by|on))\s+(.+?)(?:\s+(?:with|using|showing)\b|\s*$)").unwrap();
    static ref RE_AGG_TRIGGER: Regex = Regex::new(
        r"(?i)\b(?:aggregate|group|total|sum|average|avg|breakdown|rollup|roll up)\b"
    )
    .unwrap();
    static ref RE_GROUP_BY: Regex = Regex::new(
        r"(?i)\b(?:group(?:ed)?\s+by|by|per|for each|across)\s+(.+?)(?:\s+and\s+sort|,?\s+sort(?:ed)?\b|\s+order(?:ed)?\s+by|\s*$)"
    )
    .unwrap();
    static ref RE_SORT_BY: Regex = Regex::new(
        r"(?i)\b(?:sort(?:ed)?|order(?:ed)?)\s+by\s+(.+?)(\s+desc(?:ending)?|\s+asc(?:ending)?)?\s*$"
    )
    .unwrap();
    static ref RE_DESCENDING: Regex =
        Regex::new(r"(?i)\b(?:desc(?:ending)?|highest first|largest first)\b").unwrap();
    static ref RE_TRAIN_TRIGGER: Regex = Regex::new(
        r"(?i)\b(?:train|build|fit|develop)\b.*\bmodel\b|\bregression\b|\bclassifier\b|\bpredict(?:ing)?\b"
    )
    .unwrap();
    static ref RE_CONTINUE_MODEL: Regex = Regex::new(
        r"(?i)\b(?:continue|same|previous|last)\b.*\bmodel\b|\bmodel\b.*\b(?:again|as before)\b"
    )
    .unwrap();
    static ref RE_PREDICT_TARGET: Regex = Regex::new(
        r"(?i)\bpredict(?:ing)?\s+(.+?)(?:\s+(?:using|based on|from|with)\b|\s*$)"
    )
    .unwrap();
    static ref RE_FEATURES: Regex =
        Regex::new(r"(?i)\b(?:using|based on|from)\s+(.+?)\s*$").unwrap();
    static ref RE_MODEL_REPORT: Regex = Regex::new(
        r"(?i)(linear regression|logistic classification) model predicting '([^']+)' from features: ([^.;]+)"
    )
    .unwrap();
    static ref RE_LOGISTIC: Regex =
        Regex::new(r"(?i)\b(?:logistic|classif\w*|categor\w*)\b").unwrap();
}

/// Everything a pattern rule may consult.
pub struct PatternContext<'a> {
    pub message: &'a str,
    pub history: &'a [ChatTurn],
    pub schema: &'a Schema,
    pub columns: Vec<String>,
}

impl<'a> PatternContext<'a> {
    pub fn new(message: &'a str, history: &'a [ChatTurn], schema: &'a Schema) -> Self {
        let columns = schema.column_names();
        Self {
            message,
            history,
            schema,
            columns,
        }
    }

    fn resolve(&self, fragment: &str) -> Option<String> {
        resolve_column(fragment, &self.columns)
    }

    /// Resolve a captured fragment, falling back to the whole message (which
    /// lets ordinal "column N" references through).
    fn resolve_or_message(&self, fragment: &str) -> Option<String> {
        self.resolve(fragment)
            .or_else(|| self.resolve(self.message))
    }

    fn numeric_columns(&self) -> Vec<String> {
        self.schema
            .columns
            .iter()
            .filter(|c| c.inferred_type == ColumnType::Number)
            .map(|c| c.name.clone())
            .collect()
    }
}

type Rule = fn(&PatternContext) -> Option<OperationRequest>;

fn clarify(kind: ClarificationKind, prompt: &str) -> Option<Clarification> {
    Some(Clarification {
        kind,
        prompt: prompt.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Layer 1: high-confidence literal patterns
// ---------------------------------------------------------------------------

fn rule_replace_value(ctx: &PatternContext) -> Option<OperationRequest> {
    let caps = RE_REPLACE
        .captures(ctx.message)
        .or_else(|| RE_PUT_INSTEAD.captures(ctx.message))?;
    let find = caps[1].trim().to_string();
    let replace_raw = caps[2].trim();
    let column = caps.get(3).and_then(|m| ctx.resolve(m.as_str()));

    // "replace nulls with 0" is null handling, not a value replacement.
    // A statistic named in the replacement text ("with the mean") is an
    // imputation method, not a literal fill.
    if NULL_VOCAB.is_match(&find) {
        let column = column.or_else(|| ctx.resolve(ctx.message));
        if let Some(method) = null_method_from_text(replace_raw) {
            return Some(OperationRequest::HandleNulls {
                column,
                method: Some(method),
                custom_value: None,
                clarification: None,
            });
        }
        return Some(OperationRequest::HandleNulls {
            column,
            method: Some(NullMethod::Custom),
            custom_value: Some(CellValue::parse(replace_raw)),
            clarification: None,
        });
    }

    Some(OperationRequest::ReplaceValue {
        column,
        find,
        replace_with: CellValue::parse(replace_raw),
        clarification: None,
    })
}

fn rule_remove_column(ctx: &PatternContext) -> Option<OperationRequest> {
    if NULL_VOCAB.is_match(ctx.message) {
        return None;
    }
    let caps = RE_REMOVE_COLUMN_A
        .captures(ctx.message)
        .or_else(|| RE_REMOVE_COLUMN_B.captures(ctx.message))?;
    let fragment = caps[1].trim();
    match ctx.resolve_or_message(fragment) {
        Some(column) => Some(OperationRequest::RemoveColumn {
            column: Some(column),
            clarification: None,
        }),
        None => Some(OperationRequest::RemoveColumn {
            column: None,
            clarification: clarify(
                ClarificationKind::Column,
                &format!(
                    "I couldn't find a column matching \"{}\". Which column should I remove?",
                    fragment
                ),
            ),
        }),
    }
}

fn rule_row_selection(ctx: &PatternContext) -> Option<OperationRequest> {
    let selector = if let Some(caps) = RE_KEEP_FIRST.captures(ctx.message) {
        RowSelector::KeepFirstN(caps[1].parse().ok()?)
    } else if let Some(caps) = RE_REMOVE_FIRST_N.captures(ctx.message) {
        RowSelector::FirstN(caps[1].parse().ok()?)
    } else if let Some(caps) = RE_REMOVE_LAST_N.captures(ctx.message) {
        RowSelector::LastN(caps[1].parse().ok()?)
    } else if RE_REMOVE_FIRST_ONE.is_match(ctx.message) {
        RowSelector::FirstN(1)
    } else if RE_REMOVE_LAST_ONE.is_match(ctx.message) {
        RowSelector::LastN(1)
    } else if let Some(caps) = RE_REMOVE_ROW_N
        .captures(ctx.message)
        .or_else(|| RE_REMOVE_NTH_ROW.captures(ctx.message))
    {
        RowSelector::Index(caps[1].parse().ok()?)
    } else {
        return None;
    };
    Some(OperationRequest::RemoveRows { selector })
}

fn rule_revert(ctx: &PatternContext) -> Option<OperationRequest> {
    if RE_REVERT.is_match(ctx.message) {
        Some(OperationRequest::Revert)
    } else {
        None
    }
}

pub const LITERAL_RULES: &[(&str, Rule)] = &[
    ("replace-value", rule_replace_value),
    ("remove-column", rule_remove_column),
    ("row-selection", rule_row_selection),
    ("revert", rule_revert),
];

/// Layer 1: first matching literal rule wins and bypasses the LLM and the
/// backstop entirely.
pub fn match_literal(ctx: &PatternContext) -> Option<OperationRequest> {
    LITERAL_RULES.iter().find_map(|(_, rule)| rule(ctx))
}

// ---------------------------------------------------------------------------
// Layer 3: deterministic regex/keyword backstop cascade
// ---------------------------------------------------------------------------

fn rule_advice_guard(ctx: &PatternContext) -> Option<OperationRequest> {
    // A question *about* improving a model is advice-seeking, not a request
    // to train one.
    let about_model = ctx.message.to_lowercase().contains("model")
        || ctx.message.to_lowercase().contains("accuracy");
    if RE_ADVICE.is_match(ctx.message) && about_model {
        return Some(OperationRequest::Unknown);
    }
    None
}

fn rule_count_nulls(ctx: &PatternContext) -> Option<OperationRequest> {
    if !RE_COUNT_NULLS.is_match(ctx.message) {
        return None;
    }
    Some(OperationRequest::CountNulls {
        column: ctx.resolve(ctx.message),
    })
}

fn null_method_from_text(text: &str) -> Option<NullMethod> {
    let lower = text.to_lowercase();
    if lower.contains("mean") || lower.contains("average") {
        Some(NullMethod::Mean)
    } else if lower.contains("median") {
        Some(NullMethod::Median)
    } else if lower.contains("mode")
        || lower.contains("most common")
        || lower.contains("most frequent")
    {
        Some(NullMethod::Mode)
    } else {
        None
    }
}

fn rule_handle_nulls(ctx: &PatternContext) -> Option<OperationRequest> {
    if !NULL_VOCAB.is_match(ctx.message) {
        return None;
    }
    let column = ctx.resolve(ctx.message);

    if RE_FILL_VERB.is_match(ctx.message) {
        if let Some(method) = null_method_from_text(ctx.message) {
            return Some(OperationRequest::HandleNulls {
                column,
                method: Some(method),
                custom_value: None,
                clarification: None,
            });
        }
        if let Some(caps) = RE_FILL_WITH.captures(ctx.message) {
            let raw = caps[1].trim();
            // "fill nulls with the mean" is handled above; a remainder that
            // is not itself a column mention is a literal fill value.
            if !raw.is_empty() && ctx.resolve(raw).is_none() {
                return Some(OperationRequest::HandleNulls {
                    column,
                    method: Some(NullMethod::Custom),
                    custom_value: Some(CellValue::parse(raw)),
                    clarification: None,
                });
            }
        }
        return Some(OperationRequest::HandleNulls {
            column,
            method: None,
            custom_value: None,
            clarification: clarify(
                ClarificationKind::NullMethod,
                "Fill nulls with what? I can use the mean, median, mode, or a custom value.",
            ),
        });
    }

    if RE_DELETE_VERB.is_match(ctx.message) {
        return Some(OperationRequest::HandleNulls {
            column,
            method: Some(NullMethod::Delete),
            custom_value: None,
            clarification: None,
        });
    }

    Some(OperationRequest::HandleNulls {
        column,
        method: None,
        custom_value: None,
        clarification: clarify(
            ClarificationKind::NullMethod,
            "How should I handle the nulls? I can delete those rows, or fill them with the mean, median, mode, or a custom value.",
        ),
    })
}

fn rule_preview(ctx: &PatternContext) -> Option<OperationRequest> {
    let has_verb = RE_PREVIEW_VERB.is_match(ctx.message);
    let mentions_rows = ctx.message.to_lowercase().contains("row")
        || ctx.message.to_lowercase().contains("data")
        || ctx.message.to_lowercase().contains("table");
    if !has_verb || !mentions_rows {
        return None;
    }
    let mode = if let Some(caps) = RE_ROW_RANGE.captures(ctx.message) {
        PreviewMode::Range(caps[1].parse().ok()?, caps[2].parse().ok()?)
    } else if let Some(caps) = RE_LAST_ROWS.captures(ctx.message) {
        PreviewMode::Last(
            caps.get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(5),
        )
    } else if let Some(caps) = RE_FIRST_ROWS.captures(ctx.message) {
        PreviewMode::First(
            caps.get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(5),
        )
    } else if let Some(caps) = RE_ROW_ONE.captures(ctx.message) {
        PreviewMode::Row(caps[1].parse().ok()?)
    } else {
        PreviewMode::First(5)
    };
    Some(OperationRequest::Preview { mode })
}

fn rule_describe(ctx: &PatternContext) -> Option<OperationRequest> {
    if RE_SUMMARY.is_match(ctx.message) {
        return Some(OperationRequest::Summarize);
    }
    if RE_DESCRIBE.is_match(ctx.message) {
        return Some(OperationRequest::Describe {
            column: ctx.resolve(ctx.message),
        });
    }
    None
}

fn rule_normalize(ctx: &PatternContext) -> Option<OperationRequest> {
    if !RE_NORMALIZE.is_match(ctx.message) {
        return None;
    }
    match ctx.resolve(ctx.message) {
        Some(column) => Some(OperationRequest::NormalizeColumn {
            column: Some(column),
            clarification: None,
        }),
        None => Some(OperationRequest::NormalizeColumn {
            column: None,
            clarification: clarify(
                ClarificationKind::Column,
                "Which column should I normalize?",
            ),
        }),
    }
}

fn outlier_method(message: &str) -> OutlierMethod {
    if RE_ZSCORE.is_match(message) {
        OutlierMethod::ZScore
    } else {
        OutlierMethod::Iqr
    }
}

fn rule_outliers(ctx: &PatternContext) -> Option<OperationRequest> {
    if !RE_OUTLIER.is_match(ctx.message) {
        return None;
    }
    let lower = ctx.message.to_lowercase();
    let method = outlier_method(ctx.message);
    let column = ctx.resolve(ctx.message);

    let treating = ["remove", "delete", "drop", "cap", "clip", "treat", "handle", "fix"]
        .iter()
        .any(|v| lower.contains(v));
    if treating {
        let action = if lower.contains("cap") || lower.contains("clip") {
            Some(OutlierAction::Cap)
        } else if lower.contains("median") {
            Some(OutlierAction::ReplaceMedian)
        } else if lower.contains("remove") || lower.contains("delete") || lower.contains("drop") {
            Some(OutlierAction::Remove)
        } else {
            None
        };
        return Some(match (column.clone(), action) {
            (Some(col), Some(action)) => OperationRequest::TreatOutliers {
                column: Some(col),
                method,
                action,
                clarification: None,
            },
            (None, _) => OperationRequest::TreatOutliers {
                column: None,
                method,
                action: action.unwrap_or(OutlierAction::Remove),
                clarification: clarify(
                    ClarificationKind::Column,
                    "Which column should I treat outliers in?",
                ),
            },
            (Some(col), None) => OperationRequest::TreatOutliers {
                column: Some(col),
                method,
                action: OutlierAction::Remove,
                clarification: clarify(
                    ClarificationKind::OutlierAction,
                    "Should I remove the outlier rows, cap them at the fence, or replace them with the median?",
                ),
            },
        });
    }

    // Detection reports across all numeric columns when none is named.
    Some(OperationRequest::DetectOutliers {
        column,
        method,
        clarification: None,
    })
}

fn rule_convert_type(ctx: &PatternContext) -> Option<OperationRequest> {
    let caps = RE_CONVERT.captures(ctx.message)?;
    let target = match caps[1].to_lowercase().as_str() {
        "number" | "numeric" | "float" | "integer" | "int" => ColumnType::Number,
        "date" => ColumnType::Date,
        _ => ColumnType::Text,
    };
    let column = ctx.resolve(ctx.message)?;
    Some(OperationRequest::ConvertType { column, target })
}

fn rule_rename(ctx: &PatternContext) -> Option<OperationRequest> {
    let caps = RE_RENAME.captures(ctx.message)?;
    let column = ctx.resolve(caps[1].trim())?;
    let new_name = caps[2].trim().to_string();
    if new_name.is_empty() {
        return None;
    }
    Some(OperationRequest::RenameColumn { column, new_name })
}

fn rule_add_row(ctx: &PatternContext) -> Option<OperationRequest> {
    if !RE_ADD_ROW.is_match(ctx.message) {
        return None;
    }
    let mut values = HashMap::new();
    if let Some(caps) = RE_ROW_VALUES.captures(ctx.message) {
        let parts: Vec<&str> = caps[1].split(',').map(|p| p.trim()).collect();
        let named = parts.iter().all(|p| p.contains('='));
        if named {
            for part in parts {
                let mut kv = part.splitn(2, '=');
                let key = kv.next().unwrap_or("").trim();
                let val = kv.next().unwrap_or("").trim();
                if let Some(col) = ctx.resolve(key) {
                    values.insert(col, CellValue::parse(val));
                }
            }
        } else {
            // Positional values map onto columns in order.
            for (col, part) in ctx.columns.iter().zip(parts) {
                values.insert(col.clone(), CellValue::parse(part));
            }
        }
    }
    Some(OperationRequest::AddRow { values })
}

fn rule_create_column(ctx: &PatternContext) -> Option<OperationRequest> {
    if !RE_CREATE_COLUMN.is_match(ctx.message) {
        return None;
    }
    let name = RE_COLUMN_NAME
        .captures(ctx.message)
        .map(|c| c[1].trim().to_string())
        .filter(|n| !n.is_empty());

    let derived = RE_ARITHMETIC_TOKEN.is_match(ctx.message);
    let name = match name {
        Some(n) => n,
        None => {
            return Some(OperationRequest::CreateStaticColumn {
                name: String::new(),
                value: CellValue::Null,
                clarification: clarify(
                    ClarificationKind::Value,
                    "What should the new column be called, and what should it contain?",
                ),
            })
        }
    };

    if derived {
        match RE_EXPRESSION_PART.captures(ctx.message) {
            Some(caps) => Some(OperationRequest::CreateDerivedColumn {
                name,
                expression: caps[1].trim().to_string(),
                clarification: None,
            }),
            None => Some(OperationRequest::CreateDerivedColumn {
                name: name.clone(),
                expression: String::new(),
                clarification: clarify(
                    ClarificationKind::Expression,
                    &format!("What formula should compute '{}'?", name),
                ),
            }),
        }
    } else {
        match RE_STATIC_VALUE.captures(ctx.message) {
            Some(caps) => Some(OperationRequest::CreateStaticColumn {
                name,
                value: CellValue::parse(caps[1].trim()),
                clarification: None,
            }),
            None => Some(OperationRequest::CreateStaticColumn {
                name: name.clone(),
                value: CellValue::Null,
                clarification: clarify(
                    ClarificationKind::Value,
                    &format!("What value should every row of '{}' hold?", name),
                ),
            }),
        }
    }
}

fn rule_modify_column(ctx: &PatternContext) -> Option<OperationRequest> {
    let lower = ctx.message.to_lowercase();
    let op = if lower.contains("multiply") || lower.contains("times") {
        ModifyOp::Multiply
    } else if lower.contains("divide") {
        ModifyOp::Divide
    } else if lower.contains("subtract") || lower.contains("decrease") || lower.contains("reduce")
    {
        ModifyOp::Subtract
    } else if lower.contains("increase") || lower.contains("add") {
        ModifyOp::Add
    } else {
        return None;
    };

    let operand = RE_BY_NUMBER
        .captures(ctx.message)
        .or_else(|| RE_ADD_N_TO.captures(ctx.message))
        .or_else(|| RE_SUBTRACT_N_FROM.captures(ctx.message))
        .or_else(|| {
            if op == ModifyOp::Multiply {
                RE_TIMES_N.captures(ctx.message)
            } else {
                None
            }
        })?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()?;

    let column = ctx.resolve(ctx.message)?;
    Some(OperationRequest::ModifyColumn {
        column,
        op,
        operand,
    })
}

/// Per-column aggregation functions mentioned in the message, e.g.
/// "Total Sales and average Profit by Region".
pub fn extract_functions(ctx: &PatternContext) -> HashMap<String, AggFunc> {
    let mut functions = HashMap::new();
    for col in &ctx.columns {
        let pattern = format!(
            r"(?i)\b(sum|total|avg|average|mean|min|minimum|max|maximum|count)\b(?:\s+of)?\s+(?:the\s+)?{}",
            regex::escape(col)
        );
        if let Ok(re) = Regex::new(&pattern) {
            if let Some(caps) = re.captures(ctx.message) {
                if let Some(func) = AggFunc::from_keyword(&caps[1]) {
                    functions.insert(col.clone(), func);
                }
            }
        }
    }
    functions
}

fn rule_pivot(ctx: &PatternContext) -> Option<OperationRequest> {
    if !RE_PIVOT.is_match(ctx.message) {
        return None;
    }
    let caps = RE_PIVOT_INDEX.captures(ctx.message)?;
    let index = ctx.resolve(caps[1].trim())?;
    let functions = extract_functions(ctx);
    let value_columns: Vec<String> = functions
        .keys()
        .filter(|c| **c != index)
        .cloned()
        .collect();
    Some(OperationRequest::Pivot {
        index,
        value_columns: if value_columns.is_empty() {
            None
        } else {
            Some(value_columns)
        },
        functions,
    })
}

fn rule_aggregate(ctx: &PatternContext) -> Option<OperationRequest> {
    if !RE_AGG_TRIGGER.is_match(ctx.message) {
        return None;
    }
    let caps = RE_GROUP_BY.captures(ctx.message)?;
    let group_by = ctx.resolve(caps[1].trim())?;

    let functions = extract_functions(ctx);
    let value_columns: Vec<String> = functions
        .keys()
        .filter(|c| **c != group_by)
        .cloned()
        .collect();

    let (sort_by, ascending) = match RE_SORT_BY.captures(ctx.message) {
        Some(caps) => {
            let col = ctx.resolve(caps[1].trim());
            let ascending = !caps
                .get(2)
                .map(|m| RE_DESCENDING.is_match(m.as_str()))
                .unwrap_or(false)
                && !RE_DESCENDING.is_match(ctx.message);
            (col, ascending)
        }
        None => (None, true),
    };

    Some(OperationRequest::Aggregate {
        group_by,
        functions,
        value_columns: if value_columns.is_empty() {
            None
        } else {
            Some(value_columns)
        },
        sort_by,
        ascending,
    })
}

fn rule_train_model(ctx: &PatternContext) -> Option<OperationRequest> {
    if !RE_TRAIN_TRIGGER.is_match(ctx.message) && !RE_CONTINUE_MODEL.is_match(ctx.message) {
        return None;
    }

    // "continue the previous model" reuses the last reported target/features
    // from chat history.
    if RE_CONTINUE_MODEL.is_match(ctx.message) {
        for turn in ctx.history.iter().rev() {
            if turn.role != "assistant" {
                continue;
            }
            if let Some(caps) = RE_MODEL_REPORT.captures(&turn.content) {
                let model_kind = if caps[1].to_lowercase().contains("logistic") {
                    ModelKind::Logistic
                } else {
                    ModelKind::Linear
                };
                let target = caps[2].to_string();
                let features: Vec<String> = caps[3]
                    .split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect();
                return Some(OperationRequest::TrainModel {
                    model_kind,
                    target,
                    features,
                    clarification: None,
                });
            }
        }
    }

    let model_kind = if RE_LOGISTIC.is_match(ctx.message) {
        ModelKind::Logistic
    } else {
        ModelKind::Linear
    };

    let target = RE_PREDICT_TARGET
        .captures(ctx.message)
        .and_then(|caps| ctx.resolve(caps[1].trim()));

    let target = match target {
        Some(t) => t,
        None => {
            return Some(OperationRequest::TrainModel {
                model_kind,
                target: String::new(),
                features: Vec::new(),
                clarification: clarify(
                    ClarificationKind::ModelTarget,
                    "Which column should the model predict?",
                ),
            })
        }
    };

    let features: Vec<String> = match RE_FEATURES.captures(ctx.message) {
        Some(caps) => caps[1]
            .split(|c| c == ',')
            .flat_map(|p| p.split(" and "))
            .filter_map(|f| ctx.resolve(f.trim()))
            .filter(|f| *f != target)
            .collect(),
        None => Vec::new(),
    };
    let features = if features.is_empty() {
        ctx.numeric_columns()
            .into_iter()
            .filter(|c| *c != target)
            .collect()
    } else {
        features
    };

    Some(OperationRequest::TrainModel {
        model_kind,
        target,
        features,
        clarification: None,
    })
}

pub const CASCADE_RULES: &[(&str, Rule)] = &[
    ("advice-guard", rule_advice_guard),
    ("count-nulls", rule_count_nulls),
    ("handle-nulls", rule_handle_nulls),
    ("preview", rule_preview),
    ("describe", rule_describe),
    ("normalize", rule_normalize),
    ("outliers", rule_outliers),
    ("convert-type", rule_convert_type),
    ("rename", rule_rename),
    ("add-row", rule_add_row),
    ("create-column", rule_create_column),
    ("pivot", rule_pivot),
    ("aggregate", rule_aggregate),
    ("train-model", rule_train_model),
    ("modify-column", rule_modify_column),
];

/// Layer 3: ordered keyword/regex backstop; first matching rule wins.
pub fn match_cascade(ctx: &PatternContext) -> Option<OperationRequest> {
    CASCADE_RULES.iter().find_map(|(_, rule)| rule(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnInfo;

    fn schema(names: &[(&str, ColumnType)]) -> Schema {
        Schema {
            columns: names
                .iter()
                .map(|(n, t)| ColumnInfo {
                    name: n.to_string(),
                    inferred_type: *t,
                    sample_values: Vec::new(),
                })
                .collect(),
        }
    }

    fn sales_schema() -> Schema {
        schema(&[
            ("Region", ColumnType::Text),
            ("Sales", ColumnType::Number),
            ("Profit", ColumnType::Number),
        ])
    }

    fn classify(message: &str, schema: &Schema) -> Option<OperationRequest> {
        let ctx = PatternContext::new(message, &[], schema);
        match_literal(&ctx).or_else(|| match_cascade(&ctx))
    }

    #[test]
    fn test_literal_replace_value() {
        let s = sales_schema();
        let req = classify("replace - with 0 in Sales", &s).unwrap();
        match req {
            OperationRequest::ReplaceValue {
                column,
                find,
                replace_with,
                ..
            } => {
                assert_eq!(column, Some("Sales".to_string()));
                assert_eq!(find, "-");
                assert_eq!(replace_with, CellValue::Number(0.0));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_replace_nulls_is_null_handling() {
        let s = sales_schema();
        let req = classify("replace nulls with 0 in Sales", &s).unwrap();
        match req {
            OperationRequest::HandleNulls {
                method,
                custom_value,
                ..
            } => {
                assert_eq!(method, Some(NullMethod::Custom));
                assert_eq!(custom_value, Some(CellValue::Number(0.0)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_replace_nulls_with_statistic_imputes() {
        let s = sales_schema();
        let req = classify("replace the nulls in Sales with the mean", &s).unwrap();
        match req {
            OperationRequest::HandleNulls {
                column,
                method,
                custom_value,
                ..
            } => {
                assert_eq!(column, Some("Sales".to_string()));
                assert_eq!(method, Some(NullMethod::Mean));
                assert_eq!(custom_value, None);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_literal_remove_column() {
        let s = sales_schema();
        let req = classify("delete the Profit column", &s).unwrap();
        assert_eq!(
            req,
            OperationRequest::RemoveColumn {
                column: Some("Profit".to_string()),
                clarification: None
            }
        );
    }

    #[test]
    fn test_keep_first_rows() {
        let s = sales_schema();
        let req = classify("keep only first 2 rows", &s).unwrap();
        assert_eq!(
            req,
            OperationRequest::RemoveRows {
                selector: RowSelector::KeepFirstN(2)
            }
        );
    }

    #[test]
    fn test_revert() {
        let s = sales_schema();
        assert_eq!(
            classify("please revert to the original data", &s),
            Some(OperationRequest::Revert)
        );
    }

    #[test]
    fn test_delete_nulls() {
        let s = sales_schema();
        let req = classify("remove nulls in Sales", &s).unwrap();
        match req {
            OperationRequest::HandleNulls { column, method, .. } => {
                assert_eq!(column, Some("Sales".to_string()));
                assert_eq!(method, Some(NullMethod::Delete));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_ambiguous_nulls_ask_method() {
        let s = sales_schema();
        let req = classify("there are nulls in Sales", &s).unwrap();
        assert!(req.requires_clarification());
        assert_eq!(
            req.clarification().unwrap().kind,
            ClarificationKind::NullMethod
        );
    }

    #[test]
    fn test_preview_modes() {
        let s = sales_schema();
        assert_eq!(
            classify("show me the first 10 rows", &s),
            Some(OperationRequest::Preview {
                mode: PreviewMode::First(10)
            })
        );
        assert_eq!(
            classify("show rows 3 to 7", &s),
            Some(OperationRequest::Preview {
                mode: PreviewMode::Range(3, 7)
            })
        );
        assert_eq!(
            classify("display the last 4 rows", &s),
            Some(OperationRequest::Preview {
                mode: PreviewMode::Last(4)
            })
        );
    }

    #[test]
    fn test_normalize_without_column_asks() {
        let s = sales_schema();
        let req = classify("normalize the values", &s).unwrap();
        assert!(req.requires_clarification());
    }

    #[test]
    fn test_aggregate_with_function_and_sort() {
        let s = sales_schema();
        let req = classify("total Sales by Region sorted by Sales desc", &s).unwrap();
        match req {
            OperationRequest::Aggregate {
                group_by,
                functions,
                sort_by,
                ascending,
                ..
            } => {
                assert_eq!(group_by, "Region");
                assert_eq!(functions.get("Sales"), Some(&AggFunc::Sum));
                assert_eq!(sort_by, Some("Sales".to_string()));
                assert!(!ascending);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rename() {
        let s = sales_schema();
        assert_eq!(
            classify("rename Sales to Revenue", &s),
            Some(OperationRequest::RenameColumn {
                column: "Sales".to_string(),
                new_name: "Revenue".to_string()
            })
        );
    }

    #[test]
    fn test_derived_vs_static_column() {
        let s = sales_schema();
        let req = classify("create a column Margin as Profit / Sales", &s).unwrap();
        match req {
            OperationRequest::CreateDerivedColumn {
                name, expression, ..
            } => {
                assert_eq!(name, "Margin");
                assert_eq!(expression, "Profit / Sales");
            }
            other => panic!("unexpected: {:?}", other),
        }

        let req = classify("add a column Country with value India", &s).unwrap();
        match req {
            OperationRequest::CreateStaticColumn { name, value, .. } => {
                assert_eq!(name, "Country");
                assert_eq!(value, CellValue::Text("India".to_string()));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_modify_column() {
        let s = sales_schema();
        let req = classify("increase Sales by 10", &s).unwrap();
        assert_eq!(
            req,
            OperationRequest::ModifyColumn {
                column: "Sales".to_string(),
                op: ModifyOp::Add,
                operand: 10.0
            }
        );
    }

    #[test]
    fn test_advice_question_not_training() {
        let s = sales_schema();
        let req = classify("how can I improve my model accuracy?", &s).unwrap();
        assert_eq!(req, OperationRequest::Unknown);
    }

    #[test]
    fn test_train_model_with_target_and_features() {
        let s = sales_schema();
        let req = classify("train a model to predict Sales using Profit", &s).unwrap();
        match req {
            OperationRequest::TrainModel {
                model_kind,
                target,
                features,
                ..
            } => {
                assert_eq!(model_kind, ModelKind::Linear);
                assert_eq!(target, "Sales");
                assert_eq!(features, vec!["Profit".to_string()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_continue_previous_model_reads_history() {
        let s = sales_schema();
        let history = vec![ChatTurn::assistant(
            "Trained a linear regression model predicting 'Sales' from features: Profit. R² = 0.82, a strong fit.",
        )];
        let ctx = PatternContext::new("continue with the previous model", &history, &s);
        let req = match_cascade(&ctx).unwrap();
        match req {
            OperationRequest::TrainModel {
                target, features, ..
            } => {
                assert_eq!(target, "Sales");
                assert_eq!(features, vec!["Profit".to_string()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_outlier_detection_and_treatment() {
        let s = sales_schema();
        match classify("detect outliers in Sales", &s).unwrap() {
            OperationRequest::DetectOutliers { column, method, .. } => {
                assert_eq!(column, Some("Sales".to_string()));
                assert_eq!(method, OutlierMethod::Iqr);
            }
            other => panic!("unexpected: {:?}", other),
        }
        match classify("cap outliers in Sales using z-score", &s).unwrap() {
            OperationRequest::TreatOutliers { action, method, .. } => {
                assert_eq!(action, OutlierAction::Cap);
                assert_eq!(method, OutlierMethod::ZScore);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_convert_type() {
        let s = sales_schema();
        assert_eq!(
            classify("convert Sales to text", &s),
            Some(OperationRequest::ConvertType {
                column: "Sales".to_string(),
                target: ColumnType::Text
            })
        );
    }

    #[test]
    fn test_count_nulls() {
        let s = sales_schema();
        assert_eq!(
            classify("how many nulls are in Sales?", &s),
            Some(OperationRequest::CountNulls {
                column: Some("Sales".to_string())
            })
        );
    }

    #[test]
    fn test_unmatched_falls_through() {
        let s = sales_schema();
        assert_eq!(classify("tell me a joke", &s), None);
    }
}
