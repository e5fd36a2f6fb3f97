use serde::{Deserialize, Serialize};

/// A step in an agent run, emitted in order while a prompt is processed.
///
/// A run always opens with [`AgentEvent::Thinking`] and closes with
/// [`AgentEvent::Complete`], unless it is cut short, in which case the
/// final event is [`AgentEvent::Error`]. File and terminal events are
/// announcements: the file events are emitted just before the operation
/// is applied, and terminal commands are surfaced for the UI to run, not
/// executed by the agent itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentEvent {
    Thinking {
        content: String,
    },
    Planning {
        content: String,
    },
    FileCreate {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    FileModify {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    FileDelete {
        path: String,
    },
    TerminalCommand {
        command: String,
    },
    Message {
        content: String,
    },
    Complete,
    Error {
        content: String,
    },
}
