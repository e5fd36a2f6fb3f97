//! Chat session projection.
//!
//! Folds the event stream of an agent run into displayable chat turns.
//! Each prompt opens a user turn plus a streaming assistant turn; agent
//! events then mutate that assistant turn in place until the run closes
//! it. Terminal commands are additionally collected into a pending queue
//! so the host can offer them for execution and tick them off.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::agent::{AgentEvent, AgentSession};
use crate::llm::Role;
use crate::plan::{FileOperation, OperationKind};

/// One rendered message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_operations: Vec<FileOperation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(default)]
    pub streaming: bool,
}

impl ChatTurn {
    fn new(role: Role, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            file_operations: Vec::new(),
            commands: Vec::new(),
            streaming: false,
        }
    }
}

/// The conversation as the UI sees it.
#[derive(Debug, Default)]
pub struct ChatLog {
    turns: Vec<ChatTurn>,
    pending_commands: Vec<String>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Commands announced by the agent but not yet executed by the host.
    pub fn pending_commands(&self) -> &[String] {
        &self.pending_commands
    }

    /// Record the user's prompt and open the assistant turn that the
    /// upcoming events will fill in.
    pub fn begin_prompt(&mut self, prompt: &str) {
        self.turns.push(ChatTurn::new(Role::User, prompt));
        let mut assistant = ChatTurn::new(Role::Assistant, "");
        assistant.streaming = true;
        self.turns.push(assistant);
    }

    /// Fold one agent event into the open assistant turn.
    ///
    /// Silently ignored when no assistant turn is open, so stray events
    /// cannot corrupt the log.
    pub fn apply(&mut self, event: &AgentEvent) {
        let Some(turn) = self
            .turns
            .last_mut()
            .filter(|turn| turn.role == Role::Assistant)
        else {
            return;
        };

        match event {
            AgentEvent::Thinking { content } | AgentEvent::Planning { content } => {
                turn.content = content.clone();
            }
            AgentEvent::FileCreate { path, content } => {
                turn.file_operations.push(FileOperation {
                    kind: OperationKind::Create,
                    path: path.clone(),
                    content: content.clone(),
                });
            }
            AgentEvent::FileModify { path, content } => {
                turn.file_operations.push(FileOperation {
                    kind: OperationKind::Modify,
                    path: path.clone(),
                    content: content.clone(),
                });
            }
            AgentEvent::FileDelete { path } => {
                turn.file_operations.push(FileOperation {
                    kind: OperationKind::Delete,
                    path: path.clone(),
                    content: None,
                });
            }
            AgentEvent::TerminalCommand { command } => {
                turn.commands.push(command.clone());
                self.pending_commands.push(command.clone());
            }
            AgentEvent::Message { content } => {
                turn.content = content.clone();
            }
            AgentEvent::Complete => {
                turn.streaming = false;
            }
            AgentEvent::Error { content } => {
                turn.content = format!("Error: {content}");
                turn.streaming = false;
            }
        }
    }

    /// Drop every pending occurrence of a command once the host ran it.
    pub fn mark_executed(&mut self, command: &str) {
        self.pending_commands.retain(|c| c != command);
    }

    /// Drive a whole prompt through the session, folding events as they
    /// arrive.
    pub async fn run_prompt(&mut self, session: &Arc<AgentSession>, prompt: &str) {
        self.begin_prompt(prompt);
        let stream = session.process_prompt(prompt);
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            self.apply(&event);
        }
    }
}
