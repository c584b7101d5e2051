//! End-to-end scenarios through the assistant: upload, conversation,
//! execution, versioning, and revert.

use std::sync::Arc;
use tabletalk::assistant::DataAssistant;
use tabletalk::clarify::{clarification_ttl, PendingOperation};
use tabletalk::dataset::CellValue;
use tabletalk::ingest::CsvFileParser;
use tabletalk::llm::ScriptedModel;
use tabletalk::session::{MemorySessionStore, SessionStore};
use tabletalk::trainer::BuiltinTrainer;

const SALES_CSV: &[u8] = b"Region,Sales\nN,10\nN,20\nS,30\nS,40\n";
const NULLS_CSV: &[u8] = b"A,B\n1,2\n,3\n5,4\n";
const DASH_CSV: &[u8] = b"X\n-\n3\n-\n";

fn assistant_with_store() -> (DataAssistant, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new());
    let assistant = DataAssistant::new(
        None,
        store.clone(),
        Arc::new(CsvFileParser),
        Arc::new(BuiltinTrainer),
    );
    (assistant, store)
}

fn assistant() -> DataAssistant {
    assistant_with_store().0
}

#[tokio::test]
async fn null_delete_scenario() {
    let a = assistant();
    a.open_session("s", NULLS_CSV.to_vec(), "data.csv").await.unwrap();
    let reply = a.handle("s", "remove nulls in A").await.unwrap();
    assert!(reply.committed);
    let d = reply.new_dataset.unwrap();
    assert_eq!(d.row_count(), 2);
    assert_eq!(d.cell(0, "A"), &CellValue::Number(1.0));
    assert_eq!(d.cell(0, "B"), &CellValue::Number(2.0));
    assert_eq!(d.cell(1, "A"), &CellValue::Number(5.0));
    assert_eq!(d.cell(1, "B"), &CellValue::Number(4.0));
}

#[tokio::test]
async fn region_sales_aggregation_scenario() {
    let a = assistant();
    a.open_session("s", SALES_CSV.to_vec(), "sales.csv").await.unwrap();
    let reply = a.handle("s", "aggregate Sales by Region").await.unwrap();
    let d = reply.new_dataset.unwrap();
    assert_eq!(d.row_count(), 2);
    assert_eq!(d.cell(0, "Region"), &CellValue::Text("N".into()));
    assert_eq!(d.cell(0, "Sales (Sum)"), &CellValue::Number(30.0));
    assert_eq!(d.cell(1, "Region"), &CellValue::Text("S".into()));
    assert_eq!(d.cell(1, "Sales (Sum)"), &CellValue::Number(70.0));
}

#[tokio::test]
async fn dash_replacement_scenario() {
    let a = assistant();
    a.open_session("s", DASH_CSV.to_vec(), "x.csv").await.unwrap();
    // A mostly-dash column infers as Text, so the dashes survive upload
    // normalization and are still there to replace.
    let reply = a.handle("s", "replace - with 0 in X").await.unwrap();
    let d = reply.new_dataset.unwrap();
    assert_eq!(d.cell(0, "X"), &CellValue::Number(0.0));
    assert_eq!(d.cell(1, "X"), &CellValue::Number(3.0));
    assert_eq!(d.cell(2, "X"), &CellValue::Number(0.0));
}

#[tokio::test]
async fn keep_first_two_scenario() {
    let a = assistant();
    a.open_session(
        "s",
        b"A\n1\n2\n3\n4\n5\n".to_vec(),
        "rows.csv",
    )
    .await
    .unwrap();
    let reply = a.handle("s", "keep only first 2 rows").await.unwrap();
    let d = reply.new_dataset.unwrap();
    assert_eq!(d.row_count(), 2);
    assert_eq!(d.cell(0, "A"), &CellValue::Number(1.0));
    assert_eq!(d.cell(1, "A"), &CellValue::Number(2.0));
    assert!(reply.answer.contains("3 rows removed"));
}

#[tokio::test]
async fn revert_is_idempotent() {
    let a = assistant();
    a.open_session("s", SALES_CSV.to_vec(), "sales.csv").await.unwrap();
    a.handle("s", "remove the Sales column").await.unwrap();

    let first = a.handle("s", "revert to the original data").await.unwrap();
    let second = a.handle("s", "revert to the original data").await.unwrap();
    let d1 = first.new_dataset.unwrap();
    let d2 = second.new_dataset.unwrap();
    assert_eq!(d1, d2);
    assert_eq!(d1.columns, vec!["Region".to_string(), "Sales".to_string()]);
    assert_eq!(d1.row_count(), 4);
}

#[tokio::test]
async fn normalize_outputs_stay_in_unit_range() {
    let a = assistant();
    a.open_session("s", SALES_CSV.to_vec(), "sales.csv").await.unwrap();
    let reply = a.handle("s", "normalize Sales").await.unwrap();
    let d = reply.new_dataset.unwrap();
    for i in 0..d.row_count() {
        let v = d.cell(i, "Sales").as_number().unwrap();
        assert!((0.0..=1.0).contains(&v), "value {} out of range", v);
    }
    assert_eq!(d.cell(0, "Sales"), &CellValue::Number(0.0));
    assert_eq!(d.cell(3, "Sales"), &CellValue::Number(1.0));
}

#[tokio::test]
async fn single_purpose_operations_change_rows_or_columns_never_both() {
    let a = assistant();
    a.open_session("s", NULLS_CSV.to_vec(), "data.csv").await.unwrap();

    let row_op = a.handle("s", "remove nulls in A").await.unwrap();
    let d = row_op.new_dataset.unwrap();
    assert_eq!(d.column_count(), 2);
    assert!(d.row_count() < 3);

    let col_op = a.handle("s", "remove the B column").await.unwrap();
    let d2 = col_op.new_dataset.unwrap();
    assert_eq!(d2.row_count(), d.row_count());
    assert_eq!(d2.column_count(), 1);
}

#[tokio::test]
async fn expired_clarification_classifies_fresh() {
    let (a, store) = assistant_with_store();
    a.open_session("s", NULLS_CSV.to_vec(), "data.csv").await.unwrap();

    let ask = a.handle("s", "fill the missing values in A").await.unwrap();
    assert!(!ask.committed);

    // Age the pending state past the TTL.
    let mut session = store.load("s").await.unwrap();
    let pending = session.pending.take().unwrap();
    session.pending = Some(PendingOperation {
        created_at: pending.created_at - clarification_ttl() - chrono::Duration::seconds(5),
        ..pending
    });
    store.save(&session).await.unwrap();

    // "mean" alone no longer answers anything; it classifies fresh and
    // lands on the capabilities summary.
    let reply = a.handle("s", "mean").await.unwrap();
    assert!(!reply.committed);
    let session = store.load("s").await.unwrap();
    assert!(session.pending.is_none());
}

#[tokio::test]
async fn clarification_answer_completes_null_fill() {
    let a = assistant();
    a.open_session("s", NULLS_CSV.to_vec(), "data.csv").await.unwrap();

    a.handle("s", "fill the missing values in A").await.unwrap();
    let reply = a.handle("s", "use the median").await.unwrap();
    assert!(reply.committed);
    let d = reply.new_dataset.unwrap();
    assert_eq!(d.cell(1, "A"), &CellValue::Number(3.0));
}

#[tokio::test]
async fn changed_subject_abandons_pending_clarification() {
    let (a, store) = assistant_with_store();
    a.open_session("s", NULLS_CSV.to_vec(), "data.csv").await.unwrap();

    a.handle("s", "fill the missing values in A").await.unwrap();
    let reply = a.handle("s", "remove the B column").await.unwrap();
    assert!(reply.committed);
    assert_eq!(reply.new_dataset.unwrap().columns, vec!["A".to_string()]);
    let session = store.load("s").await.unwrap();
    assert!(session.pending.is_none());
}

#[tokio::test]
async fn version_history_tracks_every_commit() {
    let (a, store) = assistant_with_store();
    a.open_session("s", SALES_CSV.to_vec(), "sales.csv").await.unwrap();
    a.handle("s", "keep only first 2 rows").await.unwrap();
    a.handle("s", "revert to the original data").await.unwrap();

    let session = store.load("s").await.unwrap();
    assert_eq!(session.versions.len(), 3);
    assert_eq!(session.versions.first().unwrap().operation, None);
    assert_eq!(
        session.versions.first().unwrap().snapshot.row_count(),
        4
    );

    let versions: Vec<_> = session.versions.iter().collect();
    assert_eq!(versions[1].rows_before, 4);
    assert_eq!(versions[1].rows_after, 2);
    assert_eq!(versions[2].rows_before, 2);
    assert_eq!(versions[2].rows_after, 4);
}

#[tokio::test]
async fn version_records_affected_column() {
    let (a, store) = assistant_with_store();
    a.open_session("s", SALES_CSV.to_vec(), "sales.csv").await.unwrap();
    a.handle("s", "remove the Sales column").await.unwrap();

    let session = store.load("s").await.unwrap();
    let version = session.versions.latest().unwrap();
    assert_eq!(
        version.affected_columns,
        Some(vec!["Sales".to_string()])
    );
    assert_eq!(version.rows_before, version.rows_after);
}

#[tokio::test]
async fn failed_operation_commits_nothing() {
    let (a, store) = assistant_with_store();
    a.open_session("s", SALES_CSV.to_vec(), "sales.csv").await.unwrap();

    // Removing more rows than exist must fail closed.
    let reply = a.handle("s", "remove first 10 rows").await.unwrap();
    assert!(!reply.committed);
    let session = store.load("s").await.unwrap();
    assert_eq!(session.versions.len(), 1);
    assert_eq!(session.dataset.row_count(), 4);
}

#[tokio::test]
async fn scripted_model_drives_classification() {
    let store = Arc::new(MemorySessionStore::new());
    let model = Arc::new(ScriptedModel::new(vec![
        r#"{"operation":"describe","column":"Sales"}"#,
    ]));
    let a = DataAssistant::new(
        Some(model),
        store,
        Arc::new(CsvFileParser),
        Arc::new(BuiltinTrainer),
    );
    a.open_session("s", SALES_CSV.to_vec(), "sales.csv").await.unwrap();
    let reply = a.handle("s", "how do the sales figures look?").await.unwrap();
    assert!(reply.answer.contains("'Sales'"));
    assert!(!reply.committed);
}

#[tokio::test]
async fn train_model_then_continue_previous() {
    let a = assistant();
    a.open_session(
        "s",
        b"x,y\n1,3\n2,5\n3,7\n4,9\n".to_vec(),
        "line.csv",
    )
    .await
    .unwrap();

    let first = a.handle("s", "train a model predicting y").await.unwrap();
    assert!(first
        .answer
        .starts_with("Trained a linear regression model predicting 'y' from features: x."));
    assert!(!first.committed);

    // The report in history carries the target and features forward.
    let again = a.handle("s", "continue with the previous model").await.unwrap();
    assert!(again.answer.contains("predicting 'y' from features: x."));
}
