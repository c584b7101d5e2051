//! Model training. Never mutates the dataset: validates coverage, extracts
//! clean matrices, delegates fitting to the injected trainer, and formats
//! the report. The report's opening sentence is also what the classifier
//! reads back when the user asks to continue the previous model, so its
//! shape is load-bearing.

use super::ExecutionOutcome;
use crate::dataset::{CellValue, ColumnType, Dataset, Schema};
use crate::error::{EngineError, Result};
use crate::intent::ModelKind;
use crate::trainer::{FitResult, ModelTrainer, TrainingData};

fn fit_comment(score: f64, label: &str) -> String {
    let quality = if score >= 0.75 {
        "a strong fit"
    } else if score >= 0.5 {
        "a moderate fit"
    } else if score >= 0.25 {
        "a weak fit"
    } else {
        "a poor fit"
    };
    format!("{} = {:.3} ({})", label, score, quality)
}

pub async fn train(
    dataset: &Dataset,
    schema: &Schema,
    trainer: &dyn ModelTrainer,
    model_kind: ModelKind,
    target: &str,
    features: &[String],
) -> Result<ExecutionOutcome> {
    if !dataset.has_column(target) {
        return Err(EngineError::Validation(format!(
            "There is no column named '{}'",
            target
        )));
    }
    let feature_names: Vec<String> = if features.is_empty() {
        schema
            .columns
            .iter()
            .filter(|c| c.inferred_type == ColumnType::Number && c.name != target)
            .map(|c| c.name.clone())
            .collect()
    } else {
        features.to_vec()
    };
    if feature_names.is_empty() {
        return Err(EngineError::Execution(format!(
            "No numeric feature columns are available to predict '{}'",
            target
        )));
    }
    for feature in &feature_names {
        if !dataset.has_column(feature) {
            return Err(EngineError::Validation(format!(
                "There is no column named '{}'",
                feature
            )));
        }
    }

    // Keep only rows with a usable target and fully numeric features.
    let mut matrix = Vec::new();
    let mut target_numeric = Vec::new();
    let mut target_labels = Vec::new();
    for row in &dataset.rows {
        let target_cell = row.get(target).cloned().unwrap_or(CellValue::Null);
        if target_cell.is_blank() {
            continue;
        }
        let obs: Option<Vec<f64>> = feature_names
            .iter()
            .map(|f| row.get(f).and_then(CellValue::as_number))
            .collect();
        let obs = match obs {
            Some(obs) => obs,
            None => continue,
        };
        match model_kind {
            ModelKind::Linear => match target_cell.as_number() {
                Some(y) => {
                    matrix.push(obs);
                    target_numeric.push(y);
                }
                None => continue,
            },
            ModelKind::Logistic => {
                matrix.push(obs);
                target_labels.push(target_cell.to_string());
            }
        }
    }

    if matrix.is_empty() {
        return Err(EngineError::Execution(format!(
            "'{}' has no rows with both a usable target and numeric features. Try 'count nulls in {}' to see the gaps",
            target, target
        )));
    }
    if matrix.len() < 2 {
        return Err(EngineError::Execution(format!(
            "Only {} usable row remains; training needs at least 2",
            matrix.len()
        )));
    }

    let data = TrainingData {
        feature_names: feature_names.clone(),
        matrix,
        target_numeric,
        target_labels,
    };
    let fit = trainer.fit(model_kind, &data).await?;

    let opening = format!(
        "Trained a {} model predicting '{}' from features: {}.",
        model_kind,
        target,
        feature_names.join(", ")
    );
    let body = match fit {
        FitResult::Linear {
            intercept,
            coefficients,
            r_squared,
        } => {
            let coefs: Vec<String> = feature_names
                .iter()
                .zip(&coefficients)
                .map(|(name, c)| format!("{} {:.4}", name, c))
                .collect();
            format!(
                "Intercept: {:.4}. Coefficients: {}. {}.",
                intercept,
                coefs.join(", "),
                fit_comment(r_squared, "R^2")
            )
        }
        FitResult::Logistic {
            classes,
            feature_importance,
            accuracy,
        } => {
            let importances: Vec<String> = feature_names
                .iter()
                .zip(&feature_importance)
                .map(|(name, w)| format!("{} {:.2}", name, w))
                .collect();
            format!(
                "Classes: {}. Feature importance: {}. {}.",
                classes.join(", "),
                importances.join(", "),
                fit_comment(accuracy, "Accuracy")
            )
        }
    };

    Ok(ExecutionOutcome::report(format!("{} {}", opening, body)))
}
