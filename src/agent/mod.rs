//! The agent orchestrator.
//!
//! One [`AgentSession`] owns a conversation with a completion backend and
//! a workspace filesystem. `process_prompt` turns a user prompt into an
//! ordered stream of [`AgentEvent`]s: context is assembled, the provider
//! is asked for a plan, and the plan's file operations are applied one by
//! one with failures reported inline rather than aborting the run.
//! Terminal commands are announced for the host to execute, never run
//! here.
//!
//! A session accepts at most one prompt at a time and can be cancelled
//! between steps with [`AgentSession::cancel`].

pub mod context;
mod events;

pub use events::AgentEvent;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::Stream;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::fs::WorkspaceFs;
use crate::llm::{ChatMessage, CompletionClient, Role};
use crate::paths;
use crate::plan::{parse_plan, FileOperation, OperationKind, Plan};

pub struct AgentSession {
    fs: Arc<WorkspaceFs>,
    client: Arc<dyn CompletionClient>,
    history: RwLock<Vec<ChatMessage>>,
    processing: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
}

pub type SharedAgentSession = Arc<AgentSession>;

/// Clears the in-flight flag however the run ends.
struct ProcessingGuard(Arc<AtomicBool>);

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AgentSession {
    pub fn new(fs: Arc<WorkspaceFs>, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            fs,
            client,
            history: RwLock::new(Vec::new()),
            processing: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn fs(&self) -> &Arc<WorkspaceFs> {
        &self.fs
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Request cancellation of the run in flight, if any. The run stops at
    /// its next step boundary and ends with an error event.
    pub fn cancel(&self) {
        self.current_token().cancel();
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.history.read().await.clone()
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn arm_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    /// Process one prompt, yielding events as the run advances.
    ///
    /// The stream always terminates: with [`AgentEvent::Complete`] on a
    /// full run, or with an [`AgentEvent::Error`] when the session is busy
    /// or the run was cancelled.
    pub fn process_prompt(
        self: &Arc<Self>,
        prompt: impl Into<String>,
    ) -> impl Stream<Item = AgentEvent> {
        let session = Arc::clone(self);
        let prompt = prompt.into();

        async_stream::stream! {
            if session.processing.swap(true, Ordering::SeqCst) {
                yield AgentEvent::Error {
                    content: Error::AlreadyProcessing.to_string(),
                };
                return;
            }
            let _guard = ProcessingGuard(Arc::clone(&session.processing));
            let cancel = session.arm_token();

            session
                .history
                .write()
                .await
                .push(ChatMessage::new(Role::User, prompt.clone()));

            yield AgentEvent::Thinking {
                content: "Analyzing your request...".to_string(),
            };
            let context = context::build_context(&session.fs, &prompt).await;
            yield AgentEvent::Thinking {
                content: "Understanding project structure...".to_string(),
            };
            yield AgentEvent::Planning {
                content: "Planning changes...".to_string(),
            };

            let system_prompt = context::build_system_prompt(&context);
            let history = session.history.read().await.clone();
            let plan = match session.client.complete(&system_prompt, &history).await {
                Ok(response) => parse_plan(&response),
                Err(err) => {
                    tracing::warn!("completion failed, falling back to a plain reply: {err}");
                    Plan::fallback()
                }
            };
            tracing::debug!(
                operations = plan.file_operations.len(),
                commands = plan.commands.len(),
                "plan parsed"
            );

            for op in &plan.file_operations {
                if cancel.is_cancelled() {
                    yield AgentEvent::Error {
                        content: Error::Cancelled.to_string(),
                    };
                    return;
                }
                yield operation_event(op);
                if let Err(err) = session.apply_operation(op).await {
                    yield AgentEvent::Error {
                        content: format!("Failed to {} {}: {}", op.kind, op.path, err),
                    };
                }
            }

            for command in &plan.commands {
                if cancel.is_cancelled() {
                    yield AgentEvent::Error {
                        content: Error::Cancelled.to_string(),
                    };
                    return;
                }
                yield AgentEvent::TerminalCommand {
                    command: command.clone(),
                };
            }

            session
                .history
                .write()
                .await
                .push(ChatMessage::new(Role::Assistant, plan.message.clone()));
            yield AgentEvent::Message {
                content: plan.message.clone(),
            };
            yield AgentEvent::Complete;
        }
    }

    async fn apply_operation(&self, op: &FileOperation) -> Result<()> {
        validate_operation(op)?;
        match op.kind {
            OperationKind::Create => {
                if let Some(parent) = paths::parent(&op.path) {
                    self.fs.mkdir(parent).await?;
                }
                let content = op.content.as_deref().unwrap_or_default();
                self.fs.write_file(&op.path, content).await
            }
            OperationKind::Modify => {
                let content = op.content.as_deref().unwrap_or_default();
                self.fs.write_file(&op.path, content).await
            }
            OperationKind::Delete => self.fs.rm(&op.path, true).await,
        }
    }
}

fn validate_operation(op: &FileOperation) -> Result<()> {
    if op.path.is_empty() || !op.path.starts_with('/') {
        return Err(Error::InvalidOperation(format!(
            "path must be absolute, got {:?}",
            op.path
        )));
    }
    match op.kind {
        OperationKind::Create | OperationKind::Modify => {
            if op.content.as_deref().map_or(true, str::is_empty) {
                return Err(Error::InvalidOperation(format!(
                    "{} {} without content",
                    op.kind, op.path
                )));
            }
        }
        OperationKind::Delete => {}
    }
    Ok(())
}

/// The announcement emitted just before an operation is applied.
fn operation_event(op: &FileOperation) -> AgentEvent {
    match op.kind {
        OperationKind::Create => AgentEvent::FileCreate {
            path: op.path.clone(),
            content: op.content.clone(),
        },
        OperationKind::Modify => AgentEvent::FileModify {
            path: op.path.clone(),
            content: op.content.clone(),
        },
        OperationKind::Delete => AgentEvent::FileDelete {
            path: op.path.clone(),
        },
    }
}
