//! Terminal command plumbing.
//!
//! The sandbox exposes a Node.js toolchain and ordinary shell commands,
//! nothing else. This module tokenizes command lines, rewrites the
//! aliases and traps users reach for out of habit, classifies commands
//! the sandbox can never satisfy, and runs the rest through the runtime
//! while streaming sanitized output.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::runtime::SandboxRuntime;

/// Commands the sandbox can never run, with what to do instead.
const UNSUPPORTED_COMMANDS: &[(&str, &str)] = &[
    (
        "python",
        "Use Node.js instead: node script.js",
    ),
    (
        "python3",
        "Use Node.js instead: node script.js",
    ),
    (
        "pip",
        "Install packages with npm instead: npm install <package>",
    ),
    (
        "pip3",
        "Install packages with npm instead: npm install <package>",
    ),
    (
        "go",
        "Go is not supported here, consider a Node.js implementation",
    ),
    (
        "cargo",
        "Rust is not supported here, consider a Node.js implementation",
    ),
    (
        "rustc",
        "Rust is not supported here, consider a Node.js implementation",
    ),
    (
        "java",
        "Java is not supported here, consider a Node.js implementation",
    ),
    (
        "javac",
        "Java is not supported here, consider a Node.js implementation",
    ),
    (
        "ruby",
        "Ruby is not supported here, consider a Node.js implementation",
    ),
    (
        "php",
        "PHP is not supported here, consider a Node.js implementation",
    ),
    (
        "dotnet",
        ".NET is not supported here, consider a Node.js implementation",
    ),
    (
        "gcc",
        "Native compilers are unavailable, consider a Node.js implementation",
    ),
    (
        "g++",
        "Native compilers are unavailable, consider a Node.js implementation",
    ),
];

/// Outcome of one finished command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub output: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Advisory verdict on whether the sandbox can run a command at all.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandSupport {
    Supported,
    Unsupported {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        suggestion: Option<String>,
    },
}

/// Split a command line into tokens, honoring single and double quotes.
/// Quote characters delimit, they are not part of the token. No escape
/// sequences.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                } else if c.is_whitespace() {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                } else {
                    current.push(c);
                }
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Rewrite commands the sandbox handles specially before spawning.
///
/// Python and pip turn into an explanatory echo rather than a hard
/// failure, clear variants become a terminal reset sequence, and pwd
/// drops its arguments.
pub fn preprocess(program: &str, args: &[String]) -> (String, Vec<String>) {
    match program {
        "python" | "python3" => (
            "echo".to_string(),
            vec!["Python is not available in this sandbox. Use Node.js instead.".to_string()],
        ),
        "pip" | "pip3" => (
            "echo".to_string(),
            vec!["pip is not available in this sandbox. This is a Node.js environment.".to_string()],
        ),
        "clear" | "cls" => ("echo".to_string(), vec!["\x1bc".to_string()]),
        "pwd" => ("pwd".to_string(), Vec::new()),
        _ => (program.to_string(), args.to_vec()),
    }
}

/// Classify a command line before anyone tries to run it.
pub fn command_support(line: &str) -> CommandSupport {
    let tokens = tokenize(line);
    let Some(program) = tokens.first() else {
        return CommandSupport::Supported;
    };

    for (command, suggestion) in UNSUPPORTED_COMMANDS {
        if program == command {
            return CommandSupport::Unsupported {
                message: format!(
                    "'{program}' is not available in this sandbox. This is a Node.js/JavaScript \
                     environment. Supported: node, npm, npx, yarn, pnpm, and shell commands."
                ),
                suggestion: Some((*suggestion).to_string()),
            };
        }
    }
    CommandSupport::Supported
}

/// Strip binary garbage from process output while preserving valid text.
pub fn sanitize_output(text: &str) -> String {
    let bytes = text.as_bytes();
    let non_printable = bytes
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();

    // More than 10% non-printable (excluding newlines/tabs) is likely binary.
    if bytes.len() > 100 && non_printable > bytes.len() / 10 {
        return format!(
            "[Binary output detected - {} bytes, {}% non-printable. \
            Use appropriate tools to process binary data.]",
            bytes.len(),
            non_printable * 100 / bytes.len()
        );
    }

    text.chars()
        .filter(|&c| c == '\n' || c == '\r' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .collect()
}

/// Runs one command at a time against the sandbox runtime.
pub struct CommandRunner {
    runtime: Arc<dyn SandboxRuntime>,
    current: Mutex<Option<CancellationToken>>,
}

impl CommandRunner {
    pub fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            runtime,
            current: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Run a command line to completion, invoking `on_output` with each
    /// sanitized chunk as it arrives.
    pub async fn run(
        &self,
        line: &str,
        mut on_output: impl FnMut(&str) + Send,
    ) -> Result<CommandResult> {
        let started = Instant::now();
        self.runtime.boot().await?;

        let tokens = tokenize(line);
        let Some((program, args)) = tokens.split_first() else {
            return Err(Error::InvalidOperation("empty command".to_string()));
        };
        let (program, args) = preprocess(program, args);

        let mut handle = self.runtime.spawn(&program, &args).await?;
        *self.current.lock().await = Some(handle.kill_token());

        let mut output = String::new();
        while let Some(chunk) = handle.output.recv().await {
            let clean = sanitize_output(&chunk);
            on_output(&clean);
            output.push_str(&clean);
        }
        let exit_code = handle.wait().await?;
        *self.current.lock().await = None;

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(command = %line, exit_code, duration_ms, "command finished");
        Ok(CommandResult {
            output,
            exit_code,
            duration_ms,
        })
    }

    /// Cancel the command in flight, if any.
    pub async fn kill_current(&self) {
        if let Some(token) = self.current.lock().await.take() {
            token.cancel();
        }
    }
}
