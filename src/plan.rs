//! Structured plans decoded from raw model output.
//!
//! Providers are asked to answer with a fenced ```json block describing the
//! file operations and commands they want. Models do not always comply, so
//! [`parse_plan`] is total: any input, including garbage, yields a usable
//! plan. Degraded input degrades to a prose-only plan, never to an error.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// What the model decided to do with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Modify,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Modify => "modify",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned file change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileOperation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub path: String,
    /// Complete new file body; absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A structured plan decoded from one completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Reasoning the model chose to expose, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub file_operations: Vec<FileOperation>,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl Plan {
    /// Plan used when the provider call itself failed. The conversation
    /// still gets an assistant turn and the run still completes.
    pub fn fallback() -> Self {
        Self::prose("I understand your request. Let me help you with that.")
    }

    fn prose(message: &str) -> Self {
        Self {
            thinking: None,
            message: message.to_string(),
            file_operations: Vec::new(),
            commands: Vec::new(),
        }
    }
}

fn fenced_json(response: &str) -> Option<&str> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let pattern = FENCE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").unwrap());
    pattern
        .captures(response)
        .and_then(|captures| captures.get(1))
        .map(|block| block.as_str())
}

/// Decode raw model output into a [`Plan`].
///
/// Decoding tries, in order:
/// 1. the first ```json fenced block,
/// 2. the whole response as a bare JSON object carrying a string `message`,
/// 3. the whole response verbatim as the plan's message.
pub fn parse_plan(response: &str) -> Plan {
    if let Some(block) = fenced_json(response) {
        match serde_json::from_str::<Plan>(block) {
            Ok(plan) => return plan,
            Err(err) => tracing::debug!("fenced block is not a valid plan: {err}"),
        }
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(response) {
        // A bare JSON object only counts as a plan when it carries a string
        // message; anything else is treated as prose the model produced.
        if value.get("message").map_or(false, serde_json::Value::is_string) {
            if let Ok(plan) = serde_json::from_value::<Plan>(value) {
                return plan;
            }
        }
    }

    Plan::prose(response)
}
