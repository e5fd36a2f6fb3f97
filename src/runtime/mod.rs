//! The sandbox runtime seam.
//!
//! The workspace filesystem and the terminal both talk to a runtime that
//! hosts the project: something that can read and write files, list
//! directories and spawn processes. In production that is the in-browser
//! container supplied by the embedding application; [`MemorySandbox`]
//! covers tests and offline development.

mod memory;

pub use memory::MemorySandbox;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Classification of a runtime path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One file of an initial workspace image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountFile {
    pub path: String,
    pub contents: String,
}

impl MountFile {
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// Handle to a process spawned inside the runtime.
pub struct ProcessHandle {
    /// Interleaved stdout and stderr chunks, closed when the process ends.
    pub output: mpsc::Receiver<String>,
    exit: oneshot::Receiver<i32>,
    kill: CancellationToken,
}

impl ProcessHandle {
    pub fn new(
        output: mpsc::Receiver<String>,
        exit: oneshot::Receiver<i32>,
        kill: CancellationToken,
    ) -> Self {
        Self { output, exit, kill }
    }

    /// Token that terminates the process when cancelled.
    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Wait for the process to finish and return its exit code.
    pub async fn wait(self) -> anyhow::Result<i32> {
        self.exit
            .await
            .map_err(|_| anyhow::anyhow!("process ended without reporting an exit code"))
    }
}

/// A sandboxed project runtime.
///
/// Implementations surface missing paths as `io::ErrorKind::NotFound`
/// somewhere in the error chain so callers can tell "absent" apart from
/// "failed"; [`is_not_found`] does the probing.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Start the runtime. Idempotent: booting twice is harmless.
    async fn boot(&self) -> anyhow::Result<()>;

    async fn read_file(&self, path: &str) -> anyhow::Result<String>;

    async fn write_file(&self, path: &str, contents: &str) -> anyhow::Result<()>;

    /// Entry names (not full paths) of a directory.
    async fn read_dir(&self, path: &str) -> anyhow::Result<Vec<String>>;

    /// Create a directory and any missing parents.
    async fn mkdir(&self, path: &str) -> anyhow::Result<()>;

    async fn rm(&self, path: &str, recursive: bool) -> anyhow::Result<()>;

    /// Classify a path as file or directory.
    ///
    /// The default implementation probes with `read_dir` and falls back to
    /// `read_file`. A missing path propagates its not-found error; any other
    /// listing failure only classifies as a file once the contents were
    /// actually readable.
    async fn stat(&self, path: &str) -> anyhow::Result<EntryKind> {
        match self.read_dir(path).await {
            Ok(_) => Ok(EntryKind::Directory),
            Err(err) if is_not_found(&err) => Err(err),
            Err(_) => self.read_file(path).await.map(|_| EntryKind::File),
        }
    }

    /// Spawn a process. `command` is the program name, already tokenized.
    async fn spawn(&self, command: &str, args: &[String]) -> anyhow::Result<ProcessHandle>;

    /// Write an initial set of files, creating parent directories.
    async fn mount(&self, files: &[MountFile]) -> anyhow::Result<()>;
}

/// True when an error chain bottoms out in `io::ErrorKind::NotFound`.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .map_or(false, |io| io.kind() == std::io::ErrorKind::NotFound)
    })
}

/// Not-found error carrying the offending path.
pub(crate) fn not_found(path: &str) -> anyhow::Error {
    anyhow::Error::from(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no such path: {path}"),
    ))
}
