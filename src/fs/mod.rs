//! The unified workspace filesystem.
//!
//! An in-memory mirror of the sandbox runtime: a file tree for structure
//! and a write-through content cache for file bodies. All mutations go
//! through here so that the tree, the cache and the runtime can never
//! disagree for longer than one resync. Structural changes (create, mkdir,
//! delete, mount) trigger a wholesale tree rebuild; content-only writes do
//! not.
//!
//! Every mutation broadcasts an [`FsEvent`] so editors and file explorers
//! can follow along without polling.

pub mod tree;

use std::collections::HashMap;
use std::sync::Arc;

use async_recursion::async_recursion;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, OnceCell, RwLock};

use crate::error::{Error, Result};
use crate::paths;
use crate::runtime::{is_not_found, EntryKind, MountFile, SandboxRuntime};

pub use tree::FileNode;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Filesystem change notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FsEvent {
    FileCreated { path: String, content: String },
    FileModified { path: String, content: String },
    FileDeleted { path: String },
    DirectoryCreated { path: String },
    DirectoryDeleted { path: String },
    /// The tree was rebuilt from the runtime. Carries the sync root.
    SyncComplete { path: String },
}

impl FsEvent {
    pub fn path(&self) -> &str {
        match self {
            FsEvent::FileCreated { path, .. }
            | FsEvent::FileModified { path, .. }
            | FsEvent::FileDeleted { path }
            | FsEvent::DirectoryCreated { path }
            | FsEvent::DirectoryDeleted { path }
            | FsEvent::SyncComplete { path } => path,
        }
    }
}

/// The workspace filesystem over a sandbox runtime.
pub struct WorkspaceFs {
    runtime: Arc<dyn SandboxRuntime>,
    tree: RwLock<Vec<FileNode>>,
    contents: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<FsEvent>,
    init: OnceCell<()>,
}

pub type SharedWorkspaceFs = Arc<WorkspaceFs>;

impl WorkspaceFs {
    pub fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            runtime,
            tree: RwLock::new(Vec::new()),
            contents: RwLock::new(HashMap::new()),
            events,
            init: OnceCell::new(),
        }
    }

    /// Boot the runtime and perform the first tree sync.
    ///
    /// Idempotent: concurrent callers share one in-flight initialization,
    /// and a failed attempt can be retried.
    pub async fn initialize(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async {
                self.runtime.boot().await?;
                self.sync_from_runtime().await?;
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.init.initialized()
    }

    /// Subscribe to filesystem change events.
    pub fn subscribe(&self) -> broadcast::Receiver<FsEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: FsEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Read a file, serving repeat reads from the content cache.
    pub async fn read_file(&self, path: &str) -> Result<String> {
        self.initialize().await?;
        let path = paths::normalize(path);

        if let Some(content) = self.contents.read().await.get(&path) {
            return Ok(content.clone());
        }

        match self.runtime.read_file(&path).await {
            Ok(content) => {
                self.contents
                    .write()
                    .await
                    .insert(path, content.clone());
                Ok(content)
            }
            Err(err) => Err(map_runtime_err(&path, err)),
        }
    }

    /// Write a file through to the runtime and the cache.
    ///
    /// A path absent from both the cache and the tree counts as a creation,
    /// which rebuilds the tree; overwrites leave the tree untouched.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.initialize().await?;
        let path = paths::normalize(path);

        let is_new = !self.contents.read().await.contains_key(&path)
            && tree::find(&self.tree.read().await, &path).is_none();

        self.runtime.write_file(&path, content).await?;
        self.contents
            .write()
            .await
            .insert(path.clone(), content.to_string());

        if is_new {
            self.sync_from_runtime().await?;
            self.emit(FsEvent::FileCreated {
                path,
                content: content.to_string(),
            });
        } else {
            self.emit(FsEvent::FileModified {
                path,
                content: content.to_string(),
            });
        }
        Ok(())
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.initialize().await?;
        let path = paths::normalize(path);

        self.runtime.mkdir(&path).await?;
        self.sync_from_runtime().await?;
        self.emit(FsEvent::DirectoryCreated { path });
        Ok(())
    }

    /// Remove a file or directory and purge every cached descendant.
    pub async fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        self.initialize().await?;
        let path = paths::normalize(path);

        let was_dir = tree::find(&self.tree.read().await, &path)
            .map_or(false, FileNode::is_dir);

        if let Err(err) = self.runtime.rm(&path, recursive).await {
            return Err(map_runtime_err(&path, err));
        }

        {
            let mut contents = self.contents.write().await;
            contents.remove(&path);
            let prefix = format!("{path}/");
            contents.retain(|cached, _| !cached.starts_with(&prefix));
        }

        self.sync_from_runtime().await?;
        self.emit(if was_dir {
            FsEvent::DirectoryDeleted { path }
        } else {
            FsEvent::FileDeleted { path }
        });
        Ok(())
    }

    /// Whether a path currently exists.
    ///
    /// The tree can lag behind the runtime between resyncs, so a miss is
    /// double-checked against the runtime before answering no.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.initialize().await?;
        let path = paths::normalize(path);

        if path == "/" || self.contents.read().await.contains_key(&path) {
            return Ok(true);
        }
        if tree::find(&self.tree.read().await, &path).is_some() {
            return Ok(true);
        }
        if self.runtime.read_dir(&path).await.is_ok() {
            return Ok(true);
        }
        Ok(self.runtime.read_file(&path).await.is_ok())
    }

    /// Move a file by reading, writing and deleting.
    ///
    /// Not atomic in the runtime. The read comes first so a missing or
    /// unreadable source aborts before the destination is touched.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let content = self.read_file(old_path).await?;
        self.write_file(new_path, &content).await?;
        self.rm(old_path, false).await
    }

    /// List entry names of a directory straight from the runtime.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        self.initialize().await?;
        let path = paths::normalize(path);
        self.runtime
            .read_dir(&path)
            .await
            .map_err(|err| map_runtime_err(&path, err))
    }

    /// Snapshot of the current file tree.
    pub async fn file_tree(&self) -> Vec<FileNode> {
        self.tree.read().await.clone()
    }

    /// Look a node up by path.
    pub async fn find_node(&self, path: &str) -> Option<FileNode> {
        let path = paths::normalize(path);
        tree::find(&self.tree.read().await, &path).cloned()
    }

    /// Rebuild the whole tree from the runtime and swap it in.
    ///
    /// Entries that vanish between listing and classification are skipped;
    /// any other runtime failure aborts the rebuild and leaves the previous
    /// tree in place.
    pub async fn sync_from_runtime(&self) -> Result<()> {
        let nodes = build_tree(self.runtime.as_ref(), "/").await?;
        *self.tree.write().await = nodes;
        self.emit(FsEvent::SyncComplete {
            path: "/".to_string(),
        });
        Ok(())
    }

    /// Mount an initial set of files and resync.
    pub async fn mount(&self, files: &[MountFile]) -> Result<()> {
        self.initialize().await?;
        self.runtime.mount(files).await?;
        {
            let mut contents = self.contents.write().await;
            for file in files {
                contents.insert(paths::normalize(&file.path), file.contents.clone());
            }
        }
        self.sync_from_runtime().await
    }

    /// Delete every top-level entry and drop all cached state.
    ///
    /// Entries that refuse to go are logged and survive the resync.
    pub async fn clear_workspace(&self) -> Result<()> {
        self.initialize().await?;

        let entries = self.runtime.read_dir("/").await.map_err(Error::from)?;
        for name in entries {
            let path = format!("/{name}");
            if let Err(err) = self.runtime.rm(&path, true).await {
                tracing::warn!(path = %path, "failed to remove workspace entry: {err:#}");
            }
        }

        self.contents.write().await.clear();
        self.sync_from_runtime().await
    }
}

fn map_runtime_err(path: &str, err: anyhow::Error) -> Error {
    if is_not_found(&err) {
        Error::NotFound(path.to_string())
    } else {
        err.into()
    }
}

#[async_recursion]
async fn build_tree(runtime: &dyn SandboxRuntime, dir: &str) -> Result<Vec<FileNode>> {
    let names = runtime.read_dir(dir).await.map_err(Error::from)?;

    let mut nodes = Vec::with_capacity(names.len());
    for name in names {
        let path = if dir == "/" {
            format!("/{name}")
        } else {
            format!("{dir}/{name}")
        };
        let kind = match runtime.stat(&path).await {
            Ok(kind) => kind,
            Err(err) if is_not_found(&err) => {
                // Deleted while we were walking.
                tracing::debug!(path = %path, "entry vanished during sync");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        let node = match kind {
            EntryKind::Directory => {
                let children = build_tree(runtime, &path).await?;
                FileNode::directory(&path, children)
            }
            EntryKind::File => FileNode::file(&path),
        };
        nodes.push(node);
    }
    tree::sort_level(&mut nodes);
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::broadcast::Receiver;

    use super::*;
    use crate::runtime::{not_found, MemorySandbox, ProcessHandle};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    async fn seeded_fs(files: &[(&str, &str)]) -> (Arc<MemorySandbox>, WorkspaceFs) {
        let runtime = Arc::new(MemorySandbox::with_files(files).await);
        let fs = WorkspaceFs::new(runtime.clone() as Arc<dyn SandboxRuntime>);
        fs.initialize().await.unwrap();
        (runtime, fs)
    }

    fn drain(rx: &mut Receiver<FsEvent>) -> Vec<FsEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn initialization_boots_the_runtime_exactly_once() {
        let runtime = Arc::new(MemorySandbox::new());
        let fs = WorkspaceFs::new(runtime.clone() as Arc<dyn SandboxRuntime>);
        assert!(!fs.is_ready());

        fs.initialize().await.unwrap();
        fs.initialize().await.unwrap();
        assert!(fs.is_ready());
        assert_eq!(runtime.boot_count(), 1);
    }

    #[tokio::test]
    async fn the_first_sync_builds_a_sorted_tree() {
        init_tracing();
        let (_, fs) = seeded_fs(&[
            ("/src/main.jsx", ""),
            ("/src/App.jsx", ""),
            ("/index.html", "<html>"),
            ("/package.json", "{}"),
        ])
        .await;

        let tree = fs.file_tree().await;
        let top: Vec<&str> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(top, vec!["src", "index.html", "package.json"]);

        let src = fs.find_node("/src").await.unwrap();
        assert!(src.is_dir());
        let children: Vec<String> = src
            .children
            .unwrap()
            .iter()
            .map(|n| n.name.clone())
            .collect();
        assert_eq!(children, vec!["App.jsx", "main.jsx"]);
    }

    #[tokio::test]
    async fn reads_after_a_write_never_touch_the_runtime() {
        let (runtime, fs) = seeded_fs(&[]).await;

        fs.write_file("/notes.txt", "first").await.unwrap();
        assert_eq!(fs.read_file("/notes.txt").await.unwrap(), "first");
        assert_eq!(fs.read_file("/notes.txt").await.unwrap(), "first");
        assert_eq!(runtime.read_count("/notes.txt").await, 0);
    }

    #[tokio::test]
    async fn uncached_reads_fall_through_once_and_then_stick() {
        let (runtime, fs) = seeded_fs(&[("/seed.txt", "seeded")]).await;

        assert_eq!(fs.read_file("/seed.txt").await.unwrap(), "seeded");
        assert_eq!(fs.read_file("/seed.txt").await.unwrap(), "seeded");
        assert_eq!(runtime.read_count("/seed.txt").await, 1);
    }

    #[tokio::test]
    async fn creating_a_file_resyncs_and_announces_the_creation() {
        let (_, fs) = seeded_fs(&[]).await;
        let mut rx = fs.subscribe();

        fs.write_file("src/App.jsx", "export {}").await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                FsEvent::SyncComplete { path: "/".into() },
                FsEvent::FileCreated {
                    path: "/src/App.jsx".into(),
                    content: "export {}".into()
                },
            ]
        );
        assert!(fs.find_node("/src/App.jsx").await.is_some());
    }

    #[tokio::test]
    async fn overwriting_a_file_skips_the_resync() {
        let (_, fs) = seeded_fs(&[("/a.txt", "v1")]).await;
        let mut rx = fs.subscribe();

        fs.write_file("/a.txt", "v2").await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![FsEvent::FileModified {
                path: "/a.txt".into(),
                content: "v2".into()
            }]
        );
        assert_eq!(fs.read_file("/a.txt").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn creating_a_directory_announces_it() {
        let (_, fs) = seeded_fs(&[]).await;
        let mut rx = fs.subscribe();

        fs.mkdir("/src/components").await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&FsEvent::DirectoryCreated {
                path: "/src/components".into()
            })
        );
        assert!(fs.find_node("/src/components").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn deleting_a_directory_purges_every_cached_descendant() {
        let (runtime, fs) = seeded_fs(&[
            ("/src/App.jsx", "app"),
            ("/src/components/Button.jsx", "button"),
            ("/keep.txt", "keep"),
        ])
        .await;

        // Warm the cache.
        fs.read_file("/src/App.jsx").await.unwrap();
        fs.read_file("/src/components/Button.jsx").await.unwrap();
        fs.read_file("/keep.txt").await.unwrap();

        let mut rx = fs.subscribe();
        fs.rm("/src", true).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&FsEvent::DirectoryDeleted { path: "/src".into() })
        );

        // A fresh read cannot be served from cache; it reaches the runtime
        // and comes back not-found.
        let reads_before = runtime.read_count("/src/App.jsx").await;
        let err = fs.read_file("/src/App.jsx").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(path) if path == "/src/App.jsx"));
        assert_eq!(runtime.read_count("/src/App.jsx").await, reads_before + 1);

        assert_eq!(fs.read_file("/keep.txt").await.unwrap(), "keep");
        assert!(fs.find_node("/src").await.is_none());
    }

    #[tokio::test]
    async fn deleting_a_file_announces_a_file_deletion() {
        let (_, fs) = seeded_fs(&[("/old.js", "x")]).await;
        let mut rx = fs.subscribe();

        fs.rm("/old.js", false).await.unwrap();
        let events = drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&FsEvent::FileDeleted { path: "/old.js".into() })
        );
    }

    #[tokio::test]
    async fn removing_a_missing_path_is_not_found() {
        let (_, fs) = seeded_fs(&[]).await;
        let err = fs.rm("/ghost.txt", false).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(path) if path == "/ghost.txt"));
    }

    #[tokio::test]
    async fn exists_probes_the_runtime_when_the_tree_lags() {
        let (runtime, fs) = seeded_fs(&[("/a.txt", "x")]).await;

        assert!(fs.exists("/a.txt").await.unwrap());
        assert!(fs.exists("/").await.unwrap());
        assert!(!fs.exists("/missing.txt").await.unwrap());

        // Seed behind the cache's back: the tree does not know this file
        // yet, so only the runtime probe can find it.
        runtime.seed_file("/late.txt", "y").await;
        assert!(fs.find_node("/late.txt").await.is_none());
        assert!(fs.exists("/late.txt").await.unwrap());
    }

    #[tokio::test]
    async fn rename_moves_content_and_removes_the_source() {
        let (_, fs) = seeded_fs(&[("/old-name.js", "body")]).await;

        fs.rename("/old-name.js", "/new-name.js").await.unwrap();

        assert_eq!(fs.read_file("/new-name.js").await.unwrap(), "body");
        assert!(matches!(
            fs.read_file("/old-name.js").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn rename_aborts_before_writing_when_the_source_is_unreadable() {
        let (_, fs) = seeded_fs(&[]).await;

        let err = fs.rename("/ghost.js", "/target.js").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(path) if path == "/ghost.js"));
        assert!(!fs.exists("/target.js").await.unwrap());
    }

    #[tokio::test]
    async fn paths_are_normalized_at_the_boundary() {
        let (_, fs) = seeded_fs(&[]).await;

        fs.write_file("./src/index.css", "body {}").await.unwrap();
        assert_eq!(fs.read_file("/src/index.css").await.unwrap(), "body {}");
        assert_eq!(fs.read_file("src/index.css").await.unwrap(), "body {}");
    }

    #[tokio::test]
    async fn mounting_files_lands_them_in_cache_and_tree() {
        let (_, fs) = seeded_fs(&[]).await;
        let mut rx = fs.subscribe();

        fs.mount(&[
            MountFile::new("/package.json", "{}"),
            MountFile::new("/src/main.jsx", "render()"),
        ])
        .await
        .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![FsEvent::SyncComplete { path: "/".into() }]
        );
        assert_eq!(fs.read_file("/src/main.jsx").await.unwrap(), "render()");
        assert!(fs.find_node("/package.json").await.is_some());
    }

    #[tokio::test]
    async fn clearing_the_workspace_drops_all_state() {
        let (_, fs) = seeded_fs(&[("/a.txt", "x"), ("/src/b.txt", "y")]).await;
        fs.read_file("/a.txt").await.unwrap();

        let mut rx = fs.subscribe();
        fs.clear_workspace().await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![FsEvent::SyncComplete { path: "/".into() }]
        );
        assert!(fs.file_tree().await.is_empty());
        assert!(!fs.exists("/a.txt").await.unwrap());
    }

    /// Delegates to a [`MemorySandbox`] but lets `stat` misbehave for one
    /// path, to exercise the mid-walk tolerance rules.
    struct FlakyStatRuntime {
        inner: MemorySandbox,
        vanished: Option<String>,
        broken: Option<String>,
    }

    #[async_trait]
    impl SandboxRuntime for FlakyStatRuntime {
        async fn boot(&self) -> anyhow::Result<()> {
            self.inner.boot().await
        }

        async fn read_file(&self, path: &str) -> anyhow::Result<String> {
            self.inner.read_file(path).await
        }

        async fn write_file(&self, path: &str, contents: &str) -> anyhow::Result<()> {
            self.inner.write_file(path, contents).await
        }

        async fn read_dir(&self, path: &str) -> anyhow::Result<Vec<String>> {
            self.inner.read_dir(path).await
        }

        async fn mkdir(&self, path: &str) -> anyhow::Result<()> {
            self.inner.mkdir(path).await
        }

        async fn rm(&self, path: &str, recursive: bool) -> anyhow::Result<()> {
            self.inner.rm(path, recursive).await
        }

        async fn stat(&self, path: &str) -> anyhow::Result<EntryKind> {
            if self.vanished.as_deref() == Some(path) {
                return Err(not_found(path));
            }
            if self.broken.as_deref() == Some(path) {
                anyhow::bail!("stat backend offline");
            }
            self.inner.stat(path).await
        }

        async fn spawn(&self, command: &str, args: &[String]) -> anyhow::Result<ProcessHandle> {
            self.inner.spawn(command, args).await
        }

        async fn mount(&self, files: &[MountFile]) -> anyhow::Result<()> {
            self.inner.mount(files).await
        }
    }

    #[tokio::test]
    async fn entries_vanishing_mid_sync_are_skipped() {
        let runtime = Arc::new(FlakyStatRuntime {
            inner: MemorySandbox::with_files(&[("/ghost.txt", ""), ("/real.txt", "")]).await,
            vanished: Some("/ghost.txt".into()),
            broken: None,
        });
        let fs = WorkspaceFs::new(runtime as Arc<dyn SandboxRuntime>);
        fs.initialize().await.unwrap();

        let tree = fs.file_tree().await;
        let names: Vec<&str> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["real.txt"]);
    }

    #[tokio::test]
    async fn other_sync_failures_abort_the_rebuild() {
        let runtime = Arc::new(FlakyStatRuntime {
            inner: MemorySandbox::with_files(&[("/real.txt", "")]).await,
            vanished: None,
            broken: Some("/real.txt".into()),
        });
        let fs = WorkspaceFs::new(runtime as Arc<dyn SandboxRuntime>);

        let err = fs.initialize().await.unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        assert!(!fs.is_ready());
    }
}
