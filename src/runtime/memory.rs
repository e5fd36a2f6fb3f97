//! In-memory [`SandboxRuntime`] for tests and offline development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use super::{not_found, EntryKind, MountFile, ProcessHandle, SandboxRuntime};
use crate::paths;

/// Scripted behavior for one program name.
#[derive(Debug, Clone)]
struct ScriptedCommand {
    output: Vec<String>,
    exit_code: i32,
    wait_for_kill: bool,
}

/// Deterministic in-memory sandbox.
///
/// Files and directories live in maps, processes are scripted per program
/// name, and a couple of hooks (rejected writes, read counters) let tests
/// observe cache behavior from the outside. Writes require the parent
/// directory to exist, matching the container runtimes this stands in for.
pub struct MemorySandbox {
    booted: AtomicBool,
    boots: AtomicUsize,
    files: RwLock<HashMap<String, String>>,
    dirs: RwLock<HashSet<String>>,
    scripted: RwLock<HashMap<String, ScriptedCommand>>,
    rejected_writes: RwLock<HashSet<String>>,
    read_counts: RwLock<HashMap<String, usize>>,
}

impl MemorySandbox {
    pub fn new() -> Self {
        let mut dirs = HashSet::new();
        dirs.insert("/".to_string());
        Self {
            booted: AtomicBool::new(false),
            boots: AtomicUsize::new(0),
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(dirs),
            scripted: RwLock::new(HashMap::new()),
            rejected_writes: RwLock::new(HashSet::new()),
            read_counts: RwLock::new(HashMap::new()),
        }
    }

    /// Sandbox pre-seeded with files; parent directories are implied.
    pub async fn with_files(files: &[(&str, &str)]) -> Self {
        let sandbox = Self::new();
        for (path, contents) in files {
            sandbox.seed_file(path, contents).await;
        }
        sandbox
    }

    /// Seed a file, creating parent directories as needed.
    pub async fn seed_file(&self, path: &str, contents: &str) {
        let path = paths::normalize(path);
        {
            let mut dirs = self.dirs.write().await;
            add_parents(&mut dirs, &path);
        }
        self.files.write().await.insert(path, contents.to_string());
    }

    /// Script the output and exit code of a program name.
    pub async fn script_command(&self, program: &str, output: &[&str], exit_code: i32) {
        self.scripted.write().await.insert(
            program.to_string(),
            ScriptedCommand {
                output: output.iter().map(|line| line.to_string()).collect(),
                exit_code,
                wait_for_kill: false,
            },
        );
    }

    /// Script a program that runs until its kill token fires (exit 130).
    pub async fn script_blocking_command(&self, program: &str) {
        self.scripted.write().await.insert(
            program.to_string(),
            ScriptedCommand {
                output: Vec::new(),
                exit_code: 130,
                wait_for_kill: true,
            },
        );
    }

    /// Make every write to `path` fail, for failure-injection tests.
    pub async fn reject_writes_to(&self, path: &str) {
        self.rejected_writes
            .write()
            .await
            .insert(paths::normalize(path));
    }

    /// How many times `read_file` was asked for this path.
    pub async fn read_count(&self, path: &str) -> usize {
        self.read_counts
            .read()
            .await
            .get(&paths::normalize(path))
            .copied()
            .unwrap_or(0)
    }

    /// How many times `boot` was called.
    pub fn boot_count(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }
}

impl Default for MemorySandbox {
    fn default() -> Self {
        Self::new()
    }
}

fn add_parents(dirs: &mut HashSet<String>, path: &str) {
    let mut ancestor = paths::parent(path);
    while let Some(dir) = ancestor {
        dirs.insert(dir.to_string());
        ancestor = paths::parent(dir);
    }
}

#[async_trait]
impl SandboxRuntime for MemorySandbox {
    async fn boot(&self) -> anyhow::Result<()> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        self.booted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn read_file(&self, path: &str) -> anyhow::Result<String> {
        let path = paths::normalize(path);
        *self
            .read_counts
            .write()
            .await
            .entry(path.clone())
            .or_insert(0) += 1;
        self.files
            .read()
            .await
            .get(&path)
            .cloned()
            .ok_or_else(|| not_found(&path))
    }

    async fn write_file(&self, path: &str, contents: &str) -> anyhow::Result<()> {
        let path = paths::normalize(path);
        if self.rejected_writes.read().await.contains(&path) {
            anyhow::bail!("write rejected: {path}");
        }
        if let Some(parent) = paths::parent(&path) {
            if !self.dirs.read().await.contains(parent) {
                return Err(not_found(parent).context(format!("writing {path}")));
            }
        }
        self.files.write().await.insert(path, contents.to_string());
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> anyhow::Result<Vec<String>> {
        let path = paths::normalize(path);
        let dirs = self.dirs.read().await;
        if !dirs.contains(&path) {
            if self.files.read().await.contains_key(&path) {
                anyhow::bail!("not a directory: {path}");
            }
            return Err(not_found(&path));
        }

        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let mut names = HashSet::new();
        for dir in dirs.iter() {
            if let Some(rest) = dir.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    names.insert(rest.to_string());
                }
            }
        }
        for file in self.files.read().await.keys() {
            if let Some(rest) = file.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    names.insert(rest.to_string());
                }
            }
        }
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        Ok(names)
    }

    async fn mkdir(&self, path: &str) -> anyhow::Result<()> {
        let path = paths::normalize(path);
        if self.files.read().await.contains_key(&path) {
            anyhow::bail!("not a directory: {path}");
        }
        let mut dirs = self.dirs.write().await;
        add_parents(&mut dirs, &path);
        dirs.insert(path);
        Ok(())
    }

    async fn rm(&self, path: &str, recursive: bool) -> anyhow::Result<()> {
        let path = paths::normalize(path);
        if path == "/" {
            anyhow::bail!("refusing to remove the root");
        }
        if self.files.write().await.remove(&path).is_some() {
            return Ok(());
        }

        let mut dirs = self.dirs.write().await;
        if !dirs.contains(&path) {
            return Err(not_found(&path));
        }
        let prefix = format!("{path}/");
        let mut files = self.files.write().await;
        if !recursive {
            let has_children = dirs.iter().any(|dir| dir.starts_with(&prefix))
                || files.keys().any(|file| file.starts_with(&prefix));
            if has_children {
                anyhow::bail!("directory not empty: {path}");
            }
        }
        dirs.remove(&path);
        dirs.retain(|dir| !dir.starts_with(&prefix));
        files.retain(|file, _| !file.starts_with(&prefix));
        Ok(())
    }

    async fn stat(&self, path: &str) -> anyhow::Result<EntryKind> {
        let path = paths::normalize(path);
        if self.dirs.read().await.contains(&path) {
            return Ok(EntryKind::Directory);
        }
        if self.files.read().await.contains_key(&path) {
            return Ok(EntryKind::File);
        }
        Err(not_found(&path))
    }

    async fn spawn(&self, command: &str, args: &[String]) -> anyhow::Result<ProcessHandle> {
        let behavior = match self.scripted.read().await.get(command) {
            Some(scripted) => scripted.clone(),
            None if command == "echo" => ScriptedCommand {
                output: vec![format!("{}\n", args.join(" "))],
                exit_code: 0,
                wait_for_kill: false,
            },
            None => ScriptedCommand {
                output: vec![format!("command not found: {command}\n")],
                exit_code: 127,
                wait_for_kill: false,
            },
        };

        let (out_tx, out_rx) = mpsc::channel(64);
        let (exit_tx, exit_rx) = oneshot::channel();
        let kill = CancellationToken::new();
        let token = kill.clone();

        tokio::spawn(async move {
            if behavior.wait_for_kill {
                token.cancelled().await;
                let _ = exit_tx.send(behavior.exit_code);
                return;
            }
            for line in behavior.output {
                if token.is_cancelled() {
                    let _ = exit_tx.send(130);
                    return;
                }
                if out_tx.send(line).await.is_err() {
                    break;
                }
            }
            let _ = exit_tx.send(behavior.exit_code);
        });

        Ok(ProcessHandle::new(out_rx, exit_rx, kill))
    }

    async fn mount(&self, files: &[MountFile]) -> anyhow::Result<()> {
        for file in files {
            self.seed_file(&file.path, &file.contents).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::is_not_found;
    use super::*;

    #[tokio::test]
    async fn writes_need_an_existing_parent_directory() {
        let sandbox = MemorySandbox::new();
        let err = sandbox.write_file("/src/App.jsx", "x").await.unwrap_err();
        assert!(is_not_found(&err));

        sandbox.mkdir("/src").await.unwrap();
        sandbox.write_file("/src/App.jsx", "x").await.unwrap();
        assert_eq!(sandbox.read_file("/src/App.jsx").await.unwrap(), "x");
    }

    #[tokio::test]
    async fn mkdir_creates_missing_ancestors() {
        let sandbox = MemorySandbox::new();
        sandbox.mkdir("/src/components/forms").await.unwrap();
        assert_eq!(
            sandbox.read_dir("/src").await.unwrap(),
            vec!["components".to_string()]
        );
        assert_eq!(
            sandbox.read_dir("/src/components").await.unwrap(),
            vec!["forms".to_string()]
        );
    }

    #[tokio::test]
    async fn read_dir_lists_immediate_children_sorted() {
        let sandbox = MemorySandbox::with_files(&[
            ("/src/main.jsx", ""),
            ("/src/App.jsx", ""),
            ("/src/components/Button.jsx", ""),
            ("/package.json", "{}"),
        ])
        .await;

        assert_eq!(
            sandbox.read_dir("/").await.unwrap(),
            vec!["package.json".to_string(), "src".to_string()]
        );
        assert_eq!(
            sandbox.read_dir("/src").await.unwrap(),
            vec![
                "App.jsx".to_string(),
                "components".to_string(),
                "main.jsx".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn read_dir_on_a_file_is_not_a_not_found_error() {
        let sandbox = MemorySandbox::with_files(&[("/a.txt", "x")]).await;
        let err = sandbox.read_dir("/a.txt").await.unwrap_err();
        assert!(!is_not_found(&err));
    }

    #[tokio::test]
    async fn non_recursive_rm_refuses_a_populated_directory() {
        let sandbox = MemorySandbox::with_files(&[("/src/App.jsx", "")]).await;
        assert!(sandbox.rm("/src", false).await.is_err());
        sandbox.rm("/src", true).await.unwrap();

        let err = sandbox.read_file("/src/App.jsx").await.unwrap_err();
        assert!(is_not_found(&err));
        let err = sandbox.read_dir("/src").await.unwrap_err();
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn rejected_writes_fail_without_touching_state() {
        let sandbox = MemorySandbox::new();
        sandbox.reject_writes_to("/a.txt").await;
        assert!(sandbox.write_file("/a.txt", "x").await.is_err());
        let err = sandbox.read_file("/a.txt").await.unwrap_err();
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn read_counts_observe_every_runtime_read() {
        let sandbox = MemorySandbox::with_files(&[("/a.txt", "x")]).await;
        assert_eq!(sandbox.read_count("/a.txt").await, 0);
        sandbox.read_file("/a.txt").await.unwrap();
        sandbox.read_file("/a.txt").await.unwrap();
        assert_eq!(sandbox.read_count("/a.txt").await, 2);
    }

    #[tokio::test]
    async fn unknown_commands_exit_127() {
        let sandbox = MemorySandbox::new();
        let mut handle = sandbox.spawn("cargo", &[]).await.unwrap();
        let mut output = String::new();
        while let Some(chunk) = handle.output.recv().await {
            output.push_str(&chunk);
        }
        assert_eq!(output, "command not found: cargo\n");
        assert_eq!(handle.wait().await.unwrap(), 127);
    }

    #[tokio::test]
    async fn mounting_seeds_files_and_their_parents() {
        let sandbox = MemorySandbox::new();
        sandbox
            .mount(&[
                MountFile::new("/src/main.jsx", "render()"),
                MountFile::new("/index.html", "<html>"),
            ])
            .await
            .unwrap();
        assert_eq!(sandbox.read_file("/src/main.jsx").await.unwrap(), "render()");
        assert_eq!(sandbox.stat("/src").await.unwrap(), EntryKind::Directory);
    }
}
