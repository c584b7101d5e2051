//! Numeric model fitting behind the `ModelTrainer` seam. The executor
//! validates coverage and extracts clean matrices; the trainer only fits.
//! `BuiltinTrainer` runs in-process so training works offline; a hosted
//! trainer can be injected in its place.

use crate::error::{EngineError, Result};
use crate::intent::ModelKind;
use async_trait::async_trait;

/// Observations with nulls already filtered out, feature-aligned.
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub feature_names: Vec<String>,
    /// One inner vec per observation, same length as `feature_names`.
    pub matrix: Vec<Vec<f64>>,
    /// Aligned numeric targets; used by the linear family.
    pub target_numeric: Vec<f64>,
    /// Aligned target labels; used by the logistic family.
    pub target_labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FitResult {
    Linear {
        intercept: f64,
        /// Same order as `feature_names`.
        coefficients: Vec<f64>,
        r_squared: f64,
    },
    Logistic {
        classes: Vec<String>,
        /// Normalized to sum 1, same order as `feature_names`.
        feature_importance: Vec<f64>,
        accuracy: f64,
    },
}

#[async_trait]
pub trait ModelTrainer: Send + Sync {
    async fn fit(&self, kind: ModelKind, data: &TrainingData) -> Result<FitResult>;
}

pub struct BuiltinTrainer;

#[async_trait]
impl ModelTrainer for BuiltinTrainer {
    async fn fit(&self, kind: ModelKind, data: &TrainingData) -> Result<FitResult> {
        match kind {
            ModelKind::Linear => fit_linear(data),
            ModelKind::Logistic => fit_nearest_centroid(data),
        }
    }
}

/// Gaussian elimination with partial pivoting. None when singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-10 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in (row + 1)..n {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}

/// Ordinary least squares via the normal equations, with an intercept term.
fn fit_linear(data: &TrainingData) -> Result<FitResult> {
    let n = data.matrix.len();
    let p = data.feature_names.len();
    if n <= p {
        return Err(EngineError::Execution(format!(
            "Not enough complete rows to fit {} features (have {})",
            p, n
        )));
    }

    // X^T X and X^T y with a leading intercept column.
    let dim = p + 1;
    let mut xtx = vec![vec![0.0; dim]; dim];
    let mut xty = vec![0.0; dim];
    for (obs, &y) in data.matrix.iter().zip(&data.target_numeric) {
        let mut x = Vec::with_capacity(dim);
        x.push(1.0);
        x.extend_from_slice(obs);
        for i in 0..dim {
            for j in 0..dim {
                xtx[i][j] += x[i] * x[j];
            }
            xty[i] += x[i] * y;
        }
    }

    let beta = solve(xtx, xty).ok_or_else(|| {
        EngineError::Execution(
            "The selected features are collinear or constant; drop one and try again"
                .to_string(),
        )
    })?;

    let mean_y: f64 = data.target_numeric.iter().sum::<f64>() / n as f64;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (obs, &y) in data.matrix.iter().zip(&data.target_numeric) {
        let mut pred = beta[0];
        for (j, v) in obs.iter().enumerate() {
            pred += beta[j + 1] * v;
        }
        ss_res += (y - pred).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }
    let r_squared = if ss_tot == 0.0 {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    Ok(FitResult::Linear {
        intercept: beta[0],
        coefficients: beta[1..].to_vec(),
        r_squared,
    })
}

/// Nearest-centroid classifier: one centroid per class, prediction by
/// Euclidean distance, importance from per-feature centroid spread.
fn fit_nearest_centroid(data: &TrainingData) -> Result<FitResult> {
    let p = data.feature_names.len();
    let mut classes: Vec<String> = Vec::new();
    let mut sums: Vec<Vec<f64>> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    for (obs, label) in data.matrix.iter().zip(&data.target_labels) {
        let idx = match classes.iter().position(|c| c == label) {
            Some(i) => i,
            None => {
                classes.push(label.clone());
                sums.push(vec![0.0; p]);
                counts.push(0);
                classes.len() - 1
            }
        };
        for (j, v) in obs.iter().enumerate() {
            sums[idx][j] += v;
        }
        counts[idx] += 1;
    }
    if classes.len() < 2 {
        return Err(EngineError::Execution(
            "The target has fewer than two distinct classes; classification needs at least two"
                .to_string(),
        ));
    }

    let centroids: Vec<Vec<f64>> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| s.iter().map(|v| v / c as f64).collect())
        .collect();

    let mut correct = 0usize;
    for (obs, label) in data.matrix.iter().zip(&data.target_labels) {
        let mut best = 0usize;
        let mut best_dist = f64::INFINITY;
        for (i, centroid) in centroids.iter().enumerate() {
            let dist: f64 = obs
                .iter()
                .zip(centroid)
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }
        if classes[best] == *label {
            correct += 1;
        }
    }
    let accuracy = correct as f64 / data.matrix.len() as f64;

    // Importance: how far apart the class means sit on each feature.
    let mut spread: Vec<f64> = (0..p)
        .map(|j| {
            let values: Vec<f64> = centroids.iter().map(|c| c[j]).collect();
            let max = values.iter().cloned().fold(f64::MIN, f64::max);
            let min = values.iter().cloned().fold(f64::MAX, f64::min);
            max - min
        })
        .collect();
    let total: f64 = spread.iter().sum();
    if total > 0.0 {
        for s in spread.iter_mut() {
            *s /= total;
        }
    }

    Ok(FitResult::Logistic {
        classes,
        feature_importance: spread,
        accuracy,
    })
}
