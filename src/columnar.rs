//! Columnar acceleration for grouped aggregation over very large datasets.
//! The row-oriented executor stays the source of truth; this path must
//! produce the same result, only faster, and any failure here falls back to
//! the in-memory implementation.

use crate::dataset::{round2, CellValue, Dataset, Row};
use crate::error::{EngineError, Result};
use crate::intent::AggFunc;
use crate::ops::aggregate::GroupPlan;
use polars::prelude::*;

fn engine_err(e: PolarsError) -> EngineError {
    EngineError::Execution(format!("Columnar engine error: {}", e))
}

/// Key column as string labels, matching the row-oriented grouping key.
fn key_series(dataset: &Dataset, key: &str) -> Series {
    let labels: Vec<String> = dataset
        .column_values(key)
        .iter()
        .map(|v| v.to_string())
        .collect();
    Series::new(key, labels)
}

/// Value column as nullable floats. For Count the series only marks
/// presence, so a count of non-null entries equals the non-blank count.
fn value_series(dataset: &Dataset, column: &str, func: AggFunc) -> Series {
    let values: Vec<Option<f64>> = dataset
        .column_values(column)
        .iter()
        .map(|v| {
            if func == AggFunc::Count {
                if v.is_blank() {
                    None
                } else {
                    Some(1.0)
                }
            } else {
                v.as_number()
            }
        })
        .collect();
    Series::new(column, values)
}

pub fn aggregate(dataset: &Dataset, plan: &GroupPlan) -> Result<Dataset> {
    let mut series = vec![key_series(dataset, &plan.key)];
    for column in &plan.value_columns {
        series.push(value_series(dataset, column, plan.function_for(column)));
    }
    let df = DataFrame::new(series).map_err(engine_err)?;

    let agg_exprs: Vec<Expr> = plan
        .value_columns
        .iter()
        .map(|column| {
            let alias = plan.output_name(column);
            let base = col(column.as_str());
            let expr = match plan.function_for(column) {
                AggFunc::Sum => base.sum(),
                AggFunc::Avg => base.mean(),
                AggFunc::Min => base.min(),
                AggFunc::Max => base.max(),
                AggFunc::Count => base.count(),
            };
            expr.cast(DataType::Float64).alias(&alias)
        })
        .collect();

    let collected = df
        .lazy()
        .group_by_stable([col(plan.key.as_str())])
        .agg(agg_exprs)
        .collect()
        .map_err(engine_err)?;

    let keys = collected
        .column(&plan.key)
        .map_err(engine_err)?
        .str()
        .map_err(engine_err)?;
    let mut value_chunks = Vec::new();
    for column in &plan.value_columns {
        let name = plan.output_name(column);
        let chunk = collected
            .column(&name)
            .map_err(engine_err)?
            .f64()
            .map_err(engine_err)?
            .clone();
        value_chunks.push((name, chunk));
    }

    let mut columns = vec![plan.key.clone()];
    for column in &plan.value_columns {
        columns.push(plan.output_name(column));
    }
    let mut rows = Vec::with_capacity(collected.height());
    for i in 0..collected.height() {
        let mut row = Row::new();
        row.insert(
            plan.key.clone(),
            CellValue::parse(keys.get(i).unwrap_or("")),
        );
        for (name, chunk) in &value_chunks {
            let cell = match chunk.get(i) {
                Some(v) => CellValue::Number(round2(v)),
                None => CellValue::Null,
            };
            row.insert(name.clone(), cell);
        }
        rows.push(row);
    }
    Ok(Dataset::new(columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn dataset() -> Dataset {
        let data = [("N", Some(10.0)), ("N", Some(20.0)), ("S", Some(30.0)), ("S", None)];
        let rows = data
            .iter()
            .map(|(region, sales)| {
                let mut row = Row::new();
                row.insert("Region".to_string(), CellValue::Text(region.to_string()));
                row.insert(
                    "Sales".to_string(),
                    sales.map(CellValue::Number).unwrap_or(CellValue::Null),
                );
                row
            })
            .collect();
        Dataset::new(vec!["Region".into(), "Sales".into()], rows)
    }

    #[test]
    fn test_matches_row_oriented_sums() {
        let plan = GroupPlan {
            key: "Region".into(),
            value_columns: vec!["Sales".into()],
            functions: HashMap::new(),
        };
        let result = aggregate(&dataset(), &plan).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.cell(0, "Region"), &CellValue::Text("N".into()));
        assert_eq!(result.cell(0, "Sales (Sum)"), &CellValue::Number(30.0));
        assert_eq!(result.cell(1, "Sales (Sum)"), &CellValue::Number(30.0));
    }

    #[test]
    fn test_count_ignores_blanks() {
        let mut functions = HashMap::new();
        functions.insert("Sales".to_string(), AggFunc::Count);
        let plan = GroupPlan {
            key: "Region".into(),
            value_columns: vec!["Sales".into()],
            functions,
        };
        let result = aggregate(&dataset(), &plan).unwrap();
        assert_eq!(result.cell(1, "Sales (Count)"), &CellValue::Number(1.0));
    }
}
