//! Conversation orchestration: pending-clarification check, classification,
//! execution, version commit, and session save. One message in, one reply
//! out; either a full snapshot commits or the dataset is untouched.

use crate::clarify::{self, ClarificationOutcome, PendingOperation};
use crate::classifier::IntentClassifier;
use crate::dataset::{Dataset, Row, Schema};
use crate::error::{EngineError, Result};
use crate::ingest::{self, FileParser};
use crate::intent::{OperationKind, OperationRequest};
use crate::llm::{ChatTurn, LanguageModel};
use crate::ops;
use crate::session::{SessionState, SessionStore};
use crate::trainer::ModelTrainer;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

const CAPABILITIES: &str = "I didn't catch a data operation in that. I can handle nulls \
(delete or fill), preview and describe the data, create, modify, rename, normalize or \
remove columns, replace values, add or remove rows, aggregate and pivot, detect and \
treat outliers, train a simple prediction model, and revert to the original upload.";

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub answer: String,
    pub new_dataset: Option<Dataset>,
    pub preview_rows: Option<Vec<Row>>,
    pub committed: bool,
}

impl AssistantReply {
    fn text(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            new_dataset: None,
            preview_rows: None,
            committed: false,
        }
    }
}

/// Columns an operation touched: the column-set difference when columns
/// were added or removed, otherwise the column the request named.
fn affected_columns(
    request: &OperationRequest,
    before: &Dataset,
    after: &Dataset,
) -> Option<Vec<String>> {
    let mut changed: Vec<String> = before
        .columns
        .iter()
        .filter(|c| !after.columns.contains(c))
        .cloned()
        .collect();
    changed.extend(
        after
            .columns
            .iter()
            .filter(|c| !before.columns.contains(c))
            .cloned(),
    );
    if changed.is_empty() {
        request.column_hint().map(|c| vec![c])
    } else {
        Some(changed)
    }
}

pub struct DataAssistant {
    classifier: IntentClassifier,
    store: Arc<dyn SessionStore>,
    parser: Arc<dyn FileParser>,
    trainer: Arc<dyn ModelTrainer>,
}

impl DataAssistant {
    pub fn new(
        model: Option<Arc<dyn LanguageModel>>,
        store: Arc<dyn SessionStore>,
        parser: Arc<dyn FileParser>,
        trainer: Arc<dyn ModelTrainer>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(model),
            store,
            parser,
            trainer,
        }
    }

    /// Upload entry point: parse, infer, normalize, and open the session
    /// with the upload as version one.
    pub async fn open_session(
        &self,
        id: &str,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<Schema> {
        let (dataset, schema) = ingest::prepare_upload(self.parser.as_ref(), &bytes, filename)?;
        let session = SessionState::new(id, dataset, schema.clone(), bytes, filename);
        self.store.save(&session).await?;
        info!("session {} opened from {}", id, filename);
        Ok(schema)
    }

    /// One conversational turn. Store failures propagate; everything else
    /// becomes a user-facing answer.
    pub async fn handle(&self, session_id: &str, message: &str) -> Result<AssistantReply> {
        let mut session = self.store.load(session_id).await?;
        let history = session.history.clone();
        session.history.push(ChatTurn::user(message));
        let now = Utc::now();

        let request = match session.pending.take() {
            Some(pending) if pending.is_expired(now) => {
                info!("pending clarification expired; classifying fresh");
                self.classifier
                    .classify(message, &history, &session.schema)
                    .await
            }
            Some(pending) if clarify::looks_like_new_request(&pending, message) => {
                info!("message changed the subject; classifying fresh");
                self.classifier
                    .classify(message, &history, &session.schema)
                    .await
            }
            Some(pending) => {
                match clarify::resolve_pending(&pending, message, &session.schema) {
                    ClarificationOutcome::Resolved(request) => request,
                    ClarificationOutcome::StillPending(again) => {
                        let answer = again.prompt().to_string();
                        session.pending = Some(again);
                        return self.finish(session, AssistantReply::text(answer)).await;
                    }
                }
            }
            None => {
                self.classifier
                    .classify(message, &history, &session.schema)
                    .await
            }
        };

        if let Some(clarification) = request.clarification().cloned() {
            session.pending = PendingOperation::new(request, now);
            return self
                .finish(session, AssistantReply::text(clarification.prompt))
                .await;
        }

        let reply = match request {
            OperationRequest::Unknown => AssistantReply::text(CAPABILITIES),
            OperationRequest::Revert => self.revert(&mut session)?,
            request => self.run(&mut session, &request).await?,
        };
        self.finish(session, reply).await
    }

    async fn run(
        &self,
        session: &mut SessionState,
        request: &OperationRequest,
    ) -> Result<AssistantReply> {
        let outcome = match ops::execute(
            &session.dataset,
            request,
            &session.schema,
            self.trainer.as_ref(),
        )
        .await
        {
            Ok(outcome) => outcome,
            // Validation and execution problems are answers, not failures.
            Err(EngineError::Validation(message)) | Err(EngineError::Execution(message)) => {
                return Ok(AssistantReply::text(message));
            }
            Err(other) => return Err(other),
        };

        let committed = outcome.dataset.is_some();
        if let Some(new_dataset) = &outcome.dataset {
            let rows_before = session.dataset.row_count();
            let affected = affected_columns(request, &session.dataset, new_dataset);
            session.schema = ingest::infer_schema(new_dataset);
            session.versions.commit(
                request.kind(),
                outcome.summary.clone(),
                rows_before,
                affected,
                new_dataset.clone(),
            );
            session.dataset = new_dataset.clone();
        }
        Ok(AssistantReply {
            answer: outcome.summary,
            new_dataset: outcome.dataset,
            preview_rows: outcome.preview,
            committed,
        })
    }

    /// Re-derive the dataset from the retained upload bytes and commit the
    /// result as a normal version.
    fn revert(&self, session: &mut SessionState) -> Result<AssistantReply> {
        let (dataset, schema) = ingest::prepare_upload(
            self.parser.as_ref(),
            &session.original_bytes,
            &session.original_filename,
        )?;
        let summary = format!(
            "Reverted to the original upload ({} rows, {} columns).",
            dataset.row_count(),
            dataset.column_count()
        );
        let rows_before = session.dataset.row_count();
        session.versions.commit(
            OperationKind::Revert,
            summary.clone(),
            rows_before,
            None,
            dataset.clone(),
        );
        session.dataset = dataset.clone();
        session.schema = schema;
        Ok(AssistantReply {
            answer: summary,
            new_dataset: Some(dataset),
            preview_rows: None,
            committed: true,
        })
    }

    async fn finish(
        &self,
        mut session: SessionState,
        reply: AssistantReply,
    ) -> Result<AssistantReply> {
        session.history.push(ChatTurn::assistant(&reply.answer));
        self.store.save(&session).await?;
        Ok(reply)
    }
}
