//! Upload parsing and schema inference. Revert re-runs exactly this path
//! over the retained original bytes, so parsing plus normalization must be
//! deterministic.

use crate::dataset::{CellValue, ColumnInfo, ColumnType, Dataset, Row, Schema};
use crate::error::{EngineError, Result};

const SCHEMA_SAMPLE_SIZE: usize = 5;

pub trait FileParser: Send + Sync {
    fn parse(&self, bytes: &[u8], filename: &str) -> Result<Dataset>;
}

pub struct CsvFileParser;

impl FileParser for CsvFileParser {
    fn parse(&self, bytes: &[u8], filename: &str) -> Result<Dataset> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            return Err(EngineError::Parse(
                "Excel files are not supported yet; export the sheet as CSV and upload that"
                    .to_string(),
            ));
        }
        if !lower.ends_with(".csv") {
            return Err(EngineError::Parse(format!(
                "Unsupported file type '{}'; only CSV uploads are accepted",
                filename
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);
        let headers = reader
            .headers()
            .map_err(|e| EngineError::Parse(format!("Could not read the CSV header: {}", e)))?
            .clone();
        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if h.trim().is_empty() {
                    format!("Column {}", i + 1)
                } else {
                    h.trim().to_string()
                }
            })
            .collect();
        if columns.is_empty() {
            return Err(EngineError::Parse(
                "The CSV has no header row".to_string(),
            ));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record
                .map_err(|e| EngineError::Parse(format!("Malformed CSV row: {}", e)))?;
            let mut row = Row::new();
            for (i, col) in columns.iter().enumerate() {
                let raw = record.get(i).unwrap_or("");
                row.insert(col.clone(), CellValue::parse(raw));
            }
            rows.push(row);
        }
        Ok(Dataset::new(columns, rows))
    }
}

/// Majority vote over non-blank values: mostly numeric wins Number, then
/// date-shaped text wins Date, otherwise Text.
pub fn infer_schema(dataset: &Dataset) -> Schema {
    let columns = dataset
        .columns
        .iter()
        .map(|name| {
            let values = dataset.column_values(name);
            let filled: Vec<&&CellValue> = values.iter().filter(|v| !v.is_blank()).collect();
            let numeric = filled.iter().filter(|v| v.as_number().is_some()).count();
            let dateish = filled
                .iter()
                .filter(|v| matches!(***v, CellValue::Text(ref s) if looks_like_date(s)))
                .count();
            let inferred_type = if filled.is_empty() {
                ColumnType::Text
            } else if numeric * 2 > filled.len() {
                ColumnType::Number
            } else if dateish * 2 > filled.len() {
                ColumnType::Date
            } else {
                ColumnType::Text
            };
            let sample_values = filled
                .iter()
                .take(SCHEMA_SAMPLE_SIZE)
                .map(|v| v.to_string())
                .collect();
            ColumnInfo {
                name: name.clone(),
                inferred_type,
                sample_values,
            }
        })
        .collect();
    Schema { columns }
}

fn looks_like_date(text: &str) -> bool {
    const FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d"];
    FORMATS
        .iter()
        .any(|fmt| chrono::NaiveDate::parse_from_str(text.trim(), fmt).is_ok())
}

fn is_placeholder(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "-" | "\u{2014}" | "\u{2013}" | "n/a" | "na" | "nan" | "none" | "null"
    )
}

/// Upload-time normalization: placeholder text in numeric columns becomes 0.
/// Genuine blanks stay null so null handling still has something to find.
pub fn normalize_upload(dataset: &mut Dataset, schema: &Schema) -> usize {
    let numeric_columns: Vec<String> = schema
        .columns
        .iter()
        .filter(|c| c.inferred_type == ColumnType::Number)
        .map(|c| c.name.clone())
        .collect();
    let mut converted = 0usize;
    for row in dataset.rows.iter_mut() {
        for col in &numeric_columns {
            let placeholder = matches!(row.get(col), Some(CellValue::Text(s)) if is_placeholder(s));
            if placeholder {
                row.insert(col.clone(), CellValue::Number(0.0));
                converted += 1;
            }
        }
    }
    converted
}

/// Parse, infer, and normalize in one step; this is both the upload path
/// and the revert path.
pub fn prepare_upload(
    parser: &dyn FileParser,
    bytes: &[u8],
    filename: &str,
) -> Result<(Dataset, Schema)> {
    let mut dataset = parser.parse(bytes, filename)?;
    let schema = infer_schema(&dataset);
    normalize_upload(&mut dataset, &schema);
    Ok((dataset, schema))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &[u8] = b"Region,Sales,When\nN,10,2024-01-02\nS,-,2024-01-03\nS,30,\n";

    #[test]
    fn test_parse_csv_types_cells() {
        let d = CsvFileParser.parse(CSV, "data.csv").unwrap();
        assert_eq!(d.columns, vec!["Region", "Sales", "When"]);
        assert_eq!(d.row_count(), 3);
        assert_eq!(d.cell(0, "Sales"), &CellValue::Number(10.0));
        assert_eq!(d.cell(1, "Sales"), &CellValue::Text("-".into()));
        assert_eq!(d.cell(2, "When"), &CellValue::Null);
    }

    #[test]
    fn test_excel_gets_specific_error() {
        let err = CsvFileParser.parse(b"", "report.xlsx").unwrap_err();
        assert!(err.to_string().contains("CSV"));
    }

    #[test]
    fn test_infer_schema_majority_vote() {
        let d = CsvFileParser.parse(CSV, "data.csv").unwrap();
        let schema = infer_schema(&d);
        assert_eq!(schema.column_type("Region"), Some(ColumnType::Text));
        assert_eq!(schema.column_type("Sales"), Some(ColumnType::Number));
        assert_eq!(schema.column_type("When"), Some(ColumnType::Date));
    }

    #[test]
    fn test_placeholder_to_zero_only_in_numeric_columns() {
        let (d, _) = prepare_upload(&CsvFileParser, CSV, "data.csv").unwrap();
        assert_eq!(d.cell(1, "Sales"), &CellValue::Number(0.0));
        // Text column placeholders and genuine blanks are untouched.
        assert_eq!(d.cell(2, "When"), &CellValue::Null);
    }

    #[test]
    fn test_revert_path_is_deterministic() {
        let (a, _) = prepare_upload(&CsvFileParser, CSV, "data.csv").unwrap();
        let (b, _) = prepare_upload(&CsvFileParser, CSV, "data.csv").unwrap();
        assert_eq!(a, b);
    }
}
