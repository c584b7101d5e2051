//! Chunked row processing for large datasets. Work proceeds synchronously
//! inside each chunk and yields to the scheduler between chunks, so one
//! heavy operation cannot starve other sessions.
//!
//! Whole-column statistics (imputation means, outlier fences) must be
//! computed over the full dataset before calling into this module; chunking
//! only ever applies to the per-row mutation itself.

use crate::dataset::Row;

/// Row count above which an operation is processed in chunks.
pub const LARGE_DATASET_THRESHOLD: usize = 50_000;
/// Rows per chunk.
pub const CHUNK_SIZE: usize = 10_000;

async fn maybe_yield(chunked: bool, index: usize) {
    if chunked && index > 0 && index % CHUNK_SIZE == 0 {
        tokio::task::yield_now().await;
    }
}

/// Transform every row, preserving order.
pub async fn map_rows<F>(rows: Vec<Row>, mut f: F) -> Vec<Row>
where
    F: FnMut(Row) -> Row,
{
    let chunked = rows.len() > LARGE_DATASET_THRESHOLD;
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        maybe_yield(chunked, i).await;
        out.push(f(row));
    }
    out
}

/// Keep the rows the predicate accepts, preserving order.
pub async fn retain_rows<F>(rows: Vec<Row>, mut keep: F) -> Vec<Row>
where
    F: FnMut(&Row) -> bool,
{
    let chunked = rows.len() > LARGE_DATASET_THRESHOLD;
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        maybe_yield(chunked, i).await;
        if keep(&row) {
            out.push(row);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CellValue;

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let mut r = Row::new();
                r.insert("i".to_string(), CellValue::Number(i as f64));
                r
            })
            .collect()
    }

    #[tokio::test]
    async fn test_map_preserves_order() {
        let out = map_rows(rows(25), |mut r| {
            let v = r.get("i").and_then(CellValue::as_number).unwrap();
            r.insert("i".to_string(), CellValue::Number(v * 2.0));
            r
        })
        .await;
        assert_eq!(out.len(), 25);
        assert_eq!(out[3].get("i"), Some(&CellValue::Number(6.0)));
        assert_eq!(out[24].get("i"), Some(&CellValue::Number(48.0)));
    }

    #[tokio::test]
    async fn test_retain_filters_in_order() {
        let out = retain_rows(rows(10), |r| {
            r.get("i").and_then(CellValue::as_number).unwrap() % 2.0 == 0.0
        })
        .await;
        assert_eq!(out.len(), 5);
        assert_eq!(out[1].get("i"), Some(&CellValue::Number(2.0)));
    }

    #[tokio::test]
    async fn test_large_dataset_still_complete() {
        let out = map_rows(rows(LARGE_DATASET_THRESHOLD + CHUNK_SIZE + 1), |r| r).await;
        assert_eq!(out.len(), LARGE_DATASET_THRESHOLD + CHUNK_SIZE + 1);
    }
}
