//! Open-file state for the code editor.
//!
//! Tracks which files are open, their buffered contents and dirty flags,
//! and which one has focus. Buffers are decoupled from the filesystem
//! until saved; filesystem events close or refresh them when files change
//! underneath the editor.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fs::{FsEvent, WorkspaceFs};
use crate::paths;

/// One open editor buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenFile {
    pub path: String,
    pub name: String,
    pub content: String,
    pub language: String,
    pub dirty: bool,
}

/// Syntax highlighting language for a path, by extension.
pub fn language_for_path(path: &str) -> &'static str {
    let name = paths::file_name(path);
    let extension = name.rsplit('.').next().unwrap_or(name);
    match extension.to_lowercase().as_str() {
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "py" => "python",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "json" => "json",
        "md" => "markdown",
        "sql" => "sql",
        "java" => "java",
        "cpp" => "cpp",
        "c" => "c",
        "cs" => "csharp",
        "php" => "php",
        "rs" => "rust",
        "go" => "go",
        "yaml" | "yml" => "yaml",
        "xml" => "xml",
        "sh" => "shell",
        _ => "plaintext",
    }
}

/// The editor's open files and focus.
#[derive(Debug, Default)]
pub struct EditorState {
    open_files: Vec<OpenFile>,
    active: Option<String>,
}

impl EditorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_files(&self) -> &[OpenFile] {
        &self.open_files
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_file(&self) -> Option<&OpenFile> {
        let active = self.active.as_deref()?;
        self.open_files.iter().find(|f| f.path == active)
    }

    /// Open a file, or refocus it if it is already open.
    pub async fn open(&mut self, fs: &WorkspaceFs, path: &str) -> Result<()> {
        let path = paths::normalize(path);

        if self.open_files.iter().any(|f| f.path == path) {
            self.active = Some(path);
            return Ok(());
        }

        let content = fs.read_file(&path).await?;
        self.open_files.push(OpenFile {
            name: paths::file_name(&path).to_string(),
            language: language_for_path(&path).to_string(),
            content,
            dirty: false,
            path: path.clone(),
        });
        self.active = Some(path);
        Ok(())
    }

    /// Focus an already-open file. Unknown paths are ignored.
    pub fn set_active(&mut self, path: &str) {
        let path = paths::normalize(path);
        if self.open_files.iter().any(|f| f.path == path) {
            self.active = Some(path);
        }
    }

    /// Close a buffer. Focus falls back to the most recently opened of the
    /// remaining files.
    pub fn close(&mut self, path: &str) {
        let path = paths::normalize(path);
        self.open_files.retain(|f| f.path != path);
        if self.active.as_deref() == Some(path.as_str()) {
            self.active = self.open_files.last().map(|f| f.path.clone());
        }
    }

    /// Replace a buffer's content, marking it dirty.
    pub fn update_content(&mut self, path: &str, content: &str) {
        let path = paths::normalize(path);
        if let Some(file) = self.open_files.iter_mut().find(|f| f.path == path) {
            file.content = content.to_string();
            file.dirty = true;
        }
    }

    /// Write a buffer back to the filesystem and clear its dirty flag.
    /// A path that is not open is a no-op.
    pub async fn save(&mut self, fs: &WorkspaceFs, path: &str) -> Result<()> {
        let path = paths::normalize(path);
        let Some(index) = self.open_files.iter().position(|f| f.path == path) else {
            return Ok(());
        };

        let content = self.open_files[index].content.clone();
        fs.write_file(&path, &content).await?;
        self.open_files[index].dirty = false;
        Ok(())
    }

    /// React to a filesystem change.
    ///
    /// External modifications refresh the buffer and discard unsaved
    /// edits; deletions close affected buffers.
    pub fn apply_fs_event(&mut self, event: &FsEvent) {
        match event {
            FsEvent::FileModified { path, content } => {
                if let Some(file) = self.open_files.iter_mut().find(|f| &f.path == path) {
                    file.content = content.clone();
                    file.dirty = false;
                }
            }
            FsEvent::FileDeleted { path } => {
                self.close(path);
            }
            FsEvent::DirectoryDeleted { path } => {
                let prefix = format!("{path}/");
                self.open_files.retain(|f| !f.path.starts_with(&prefix));
                if self
                    .active
                    .as_deref()
                    .map_or(false, |active| active.starts_with(&prefix))
                {
                    self.active = self.open_files.last().map(|f| f.path.clone());
                }
            }
            FsEvent::FileCreated { .. }
            | FsEvent::DirectoryCreated { .. }
            | FsEvent::SyncComplete { .. } => {}
        }
    }
}
