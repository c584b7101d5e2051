//! Append-only version history. The first entry is always the upload, every
//! committed operation adds a snapshot, and revert commits a new version
//! like any other operation rather than rewinding the log.

use crate::dataset::Dataset;
use crate::intent::OperationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub id: Uuid,
    /// None for the upload itself.
    pub operation: Option<OperationKind>,
    pub summary: String,
    pub rows_before: usize,
    pub rows_after: usize,
    /// Columns the operation touched, when it touched specific ones.
    pub affected_columns: Option<Vec<String>>,
    pub snapshot: Dataset,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionLog {
    versions: Vec<DatasetVersion>,
}

impl VersionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        &mut self,
        operation: Option<OperationKind>,
        summary: String,
        rows_before: usize,
        affected_columns: Option<Vec<String>>,
        snapshot: Dataset,
    ) {
        self.versions.push(DatasetVersion {
            id: Uuid::new_v4(),
            operation,
            summary,
            rows_before,
            rows_after: snapshot.row_count(),
            affected_columns,
            snapshot,
            created_at: Utc::now(),
        });
    }

    /// The upload itself, always the first entry. Nothing precedes it, so
    /// the row delta is zero.
    pub fn commit_upload(&mut self, summary: impl Into<String>, snapshot: Dataset) {
        let rows = snapshot.row_count();
        self.push(None, summary.into(), rows, None, snapshot);
    }

    /// Append a committed operation snapshot. Prior versions never change.
    pub fn commit(
        &mut self,
        operation: OperationKind,
        summary: impl Into<String>,
        rows_before: usize,
        affected_columns: Option<Vec<String>>,
        snapshot: Dataset,
    ) {
        self.push(
            Some(operation),
            summary.into(),
            rows_before,
            affected_columns,
            snapshot,
        );
    }

    pub fn latest(&self) -> Option<&DatasetVersion> {
        self.versions.last()
    }

    pub fn first(&self) -> Option<&DatasetVersion> {
        self.versions.first()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetVersion> {
        self.versions.iter()
    }
}
