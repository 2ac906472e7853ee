//! Fire-and-forget side-channel for audit records and detached work.
//!
//! Version-history entries, per-invocation function logs, and SYNC-mode
//! custom-event invocations all go through one bounded in-process queue
//! drained by a single worker task. Enqueueing never blocks the response:
//! on saturation the task is dropped and counted, not queued.

use crate::backend::BuilderClient;
use crate::metrics_defs::AUDIT_DROPPED;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use shared::counter;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

/// One record per schema or data mutation subject to audit.
#[derive(Clone, Debug, Serialize)]
pub struct VersionHistoryEntry {
    /// Acting principal, when the credential carries one.
    pub actor_id: Option<String>,
    /// Logical component that performed the action, e.g. "items".
    pub source: String,
    /// Verb plus entity kind, e.g. "CREATE item".
    pub action: String,
    pub collection: String,
    /// Empty for CREATE; the pre-mutation object for UPDATE/DELETE.
    pub previous: Value,
    pub current: Value,
    pub request: Value,
    /// Response body on success, error text on failure.
    pub response: Value,
    pub project_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// One record per awaited custom-event function invocation.
#[derive(Clone, Debug, Serialize)]
pub struct FunctionLog {
    pub function_id: String,
    pub collection: String,
    pub method: String,
    pub moment: String,
    pub sent_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// "success" or "error".
    pub status: String,
    pub response_size: usize,
}

type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum AuditTask {
    VersionHistory {
        client: BuilderClient,
        entry: VersionHistoryEntry,
    },
    FunctionLog {
        client: BuilderClient,
        entry: FunctionLog,
    },
    Detached {
        label: String,
        task: BoxTask,
    },
}

/// Handle to the audit queue. Cloning shares the queue.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<AuditTask>,
}

impl AuditRecorder {
    pub fn new(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditTask>(capacity);

        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                match task {
                    AuditTask::VersionHistory { client, entry } => {
                        let body = match serde_json::to_value(&entry) {
                            Ok(body) => body,
                            Err(e) => {
                                tracing::error!(error = %e, "unserializable audit entry");
                                continue;
                            }
                        };
                        if let Err(e) = client.write_version_history(&body).await {
                            tracing::warn!(
                                collection = %entry.collection,
                                action = %entry.action,
                                error = %e,
                                "version history write failed"
                            );
                        }
                    }
                    AuditTask::FunctionLog { client, entry } => {
                        let body = match serde_json::to_value(&entry) {
                            Ok(body) => body,
                            Err(e) => {
                                tracing::error!(error = %e, "unserializable function log");
                                continue;
                            }
                        };
                        if let Err(e) = client.write_function_log(&body).await {
                            tracing::warn!(
                                function_id = %entry.function_id,
                                error = %e,
                                "function log write failed"
                            );
                        }
                    }
                    AuditTask::Detached { label, task } => {
                        // Detached work runs on its own task so a slow
                        // invocation cannot stall audit writes behind it.
                        tokio::spawn(async move {
                            task.await;
                            tracing::debug!(label = %label, "detached task finished");
                        });
                    }
                }
            }
        });

        AuditRecorder { tx }
    }

    pub fn record_version_history(&self, client: BuilderClient, entry: VersionHistoryEntry) {
        self.enqueue(AuditTask::VersionHistory { client, entry });
    }

    pub fn record_function_log(&self, client: BuilderClient, entry: FunctionLog) {
        self.enqueue(AuditTask::FunctionLog { client, entry });
    }

    /// Runs a future detached from any request. Used for SYNC-mode
    /// custom-event invocations; results are discarded.
    pub fn spawn_detached<F>(&self, label: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.enqueue(AuditTask::Detached {
            label: label.to_string(),
            task: Box::pin(task),
        });
    }

    fn enqueue(&self, task: AuditTask) {
        if self.tx.try_send(task).is_err() {
            counter!(AUDIT_DROPPED).increment(1);
            tracing::warn!("audit queue full, dropping task");
        }
    }
}
