//! # Sandcastle
//!
//! Agent orchestration and sandboxed filesystem core for an in-browser
//! AI coding studio.
//!
//! This library provides:
//! - A completion gateway over OpenAI, Anthropic, Gemini and local backends
//! - A plan parser that turns free-form model replies into file operations
//! - A unified workspace filesystem over a pluggable sandbox runtime
//! - An agent session that streams ordered events while applying a plan
//!
//! ## Architecture
//!
//! ```text
//!        ┌─────────────────────────────────┐
//!        │          AgentSession           │
//!        │  (context, plan, apply, events) │
//!        └────────┬───────────────┬────────┘
//!                 │               │
//!                 ▼               ▼
//!     ┌───────────────────┐ ┌───────────────────┐
//!     │ CompletionGateway │ │    WorkspaceFs    │
//!     │  (llm providers)  │ │  (tree + cache)   │
//!     └───────────────────┘ └─────────┬─────────┘
//!                                     │
//!                                     ▼
//!                           ┌───────────────────┐
//!                           │  SandboxRuntime   │
//!                           └───────────────────┘
//! ```
//!
//! ## Prompt Flow
//! 1. Receive a prompt on an [`agent::AgentSession`]
//! 2. Assemble workspace context and ask the configured provider for a plan
//! 3. Apply file operations through [`fs::WorkspaceFs`], reporting failures inline
//! 4. Surface terminal commands for the host to run and close the turn
//!
//! ## Modules
//! - `agent`: prompt orchestration and the event stream
//! - `fs`: the workspace filesystem and its change events
//! - `llm`: provider clients behind one completion trait
//! - `plan`: model reply parsing
//! - `runtime`: the sandbox runtime trait and test double

pub mod agent;
pub mod chat;
pub mod editor;
pub mod error;
pub mod fs;
pub mod llm;
pub mod paths;
pub mod plan;
pub mod project;
pub mod runtime;
pub mod settings;
pub mod terminal;

pub use agent::{AgentEvent, AgentSession};
pub use error::{Error, Result};
pub use fs::{FsEvent, WorkspaceFs};
pub use llm::{CompletionClient, CompletionGateway, LlmConfig, Provider};
pub use plan::{parse_plan, FileOperation, OperationKind, Plan};
pub use runtime::{EntryKind, MemorySandbox, MountFile, SandboxRuntime};
