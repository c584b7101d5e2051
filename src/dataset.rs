//! Core tabular data model: cell values, datasets, and the advisory schema
//! inferred at upload time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single scalar cell. Serializes to the matching JSON scalar (`Null` to
/// JSON null) so datasets round-trip through the session store unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl CellValue {
    /// Numeric view of the cell. Numeric-looking text (including values with
    /// thousands separators) coerces; everything else is None.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => {
                let cleaned = s.trim().replace(',', "");
                if cleaned.is_empty() {
                    None
                } else {
                    cleaned.parse::<f64>().ok()
                }
            }
            _ => None,
        }
    }

    /// Null, undefined-equivalent, or a whitespace-only string.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn from_json(value: &serde_json::Value) -> CellValue {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(*b),
            serde_json::Value::Number(n) => {
                CellValue::Number(n.as_f64().unwrap_or(f64::NAN))
            }
            serde_json::Value::String(s) => CellValue::Text(s.clone()),
            other => CellValue::Text(other.to_string()),
        }
    }

    /// Parse free text into the most specific cell value.
    pub fn parse(raw: &str) -> CellValue {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CellValue::Null;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return CellValue::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return CellValue::Bool(false);
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return CellValue::Number(n);
        }
        CellValue::Text(trimmed.to_string())
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, ""),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
        }
    }
}

/// Round to 2 decimal places. All numeric outputs of mutation operations go
/// through this so results are reproducible regardless of request phrasing.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub type Row = HashMap<String, CellValue>;

/// An ordered sequence of rows. Executors never mutate a dataset in place;
/// every operation builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Column order. Rows may omit a column, which reads as Null.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Cell at (row, column); missing entries read as Null.
    pub fn cell(&self, row: usize, column: &str) -> &CellValue {
        static NULL: CellValue = CellValue::Null;
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&NULL)
    }

    /// All values of one column, in row order.
    pub fn column_values<'a>(&'a self, column: &str) -> Vec<&'a CellValue> {
        static NULL: CellValue = CellValue::Null;
        self.rows
            .iter()
            .map(|r| r.get(column).unwrap_or(&NULL))
            .collect()
    }

    /// Non-null numeric values of one column, in row order.
    pub fn numeric_values(&self, column: &str) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|r| r.get(column).and_then(|v| v.as_number()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    Text,
    Date,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Number => write!(f, "number"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Date => write!(f, "date"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub inferred_type: ColumnType,
    pub sample_values: Vec<String>,
}

/// Upload-time schema. Advisory after upload: actual row values are the
/// source of truth for executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnInfo>,
}

impl Schema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.inferred_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_number_coerces_text() {
        assert_eq!(CellValue::Text("42".into()).as_number(), Some(42.0));
        assert_eq!(CellValue::Text("1,200.5".into()).as_number(), Some(1200.5));
        assert_eq!(CellValue::Text("abc".into()).as_number(), None);
        assert_eq!(CellValue::Null.as_number(), None);
    }

    #[test]
    fn test_is_blank() {
        assert!(CellValue::Null.is_blank());
        assert!(CellValue::Text("   ".into()).is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
        assert!(!CellValue::Text("x".into()).is_blank());
    }

    #[test]
    fn test_display_integers_without_fraction() {
        assert_eq!(CellValue::Number(3.0).to_string(), "3");
        assert_eq!(CellValue::Number(3.25).to_string(), "3.25");
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(2.346), 2.35);
        assert_eq!(round2(2.344), 2.34);
    }

    #[test]
    fn test_cell_serde_round_trip() {
        let json = serde_json::to_string(&CellValue::Null).unwrap();
        assert_eq!(json, "null");
        let back: CellValue = serde_json::from_str("null").unwrap();
        assert_eq!(back, CellValue::Null);
        let back: CellValue = serde_json::from_str("2.5").unwrap();
        assert_eq!(back, CellValue::Number(2.5));
    }
}
