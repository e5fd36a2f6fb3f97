//! Projects and tech stack detection.
//!
//! A project is metadata around one workspace: a name, timestamps and the
//! detected tech stack. Detection inspects `/package.json` plus a few
//! well-known files and never fails, falling back to defaults when the
//! workspace is empty or the manifest is broken.
//!
//! The store persists projects to `{base_dir}/.sandcastle/projects.json`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::fs::WorkspaceFs;
use crate::runtime::MountFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    React,
    Vue,
    Svelte,
    Vanilla,
    Next,
    Unknown,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::React => "react",
            Framework::Vue => "vue",
            Framework::Svelte => "svelte",
            Framework::Vanilla => "vanilla",
            Framework::Next => "next",
            Framework::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Typescript,
    Javascript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Typescript => "typescript",
            Language::Javascript => "javascript",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Styling {
    Css,
    Tailwind,
    Scss,
    #[serde(rename = "styled-components")]
    StyledComponents,
    Unknown,
}

impl Styling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Styling::Css => "css",
            Styling::Tailwind => "tailwind",
            Styling::Scss => "scss",
            Styling::StyledComponents => "styled-components",
            Styling::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
        }
    }
}

/// What the workspace is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechStack {
    pub framework: Framework,
    pub language: Language,
    pub styling: Styling,
    pub package_manager: PackageManager,
}

impl Default for TechStack {
    fn default() -> Self {
        Self {
            framework: Framework::Unknown,
            language: Language::Javascript,
            styling: Styling::Css,
            package_manager: PackageManager::Npm,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tech_stack: TechStack,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inspect the workspace and report its tech stack. Never fails.
pub async fn detect_tech_stack(fs: &WorkspaceFs) -> TechStack {
    match try_detect(fs).await {
        Ok(stack) => stack,
        Err(err) => {
            tracing::warn!("tech stack detection failed, using defaults: {err}");
            TechStack::default()
        }
    }
}

async fn try_detect(fs: &WorkspaceFs) -> crate::error::Result<TechStack> {
    let manifest = fs.read_file("/package.json").await?;
    let parsed: Value = serde_json::from_str(&manifest)?;
    let deps = collect_dependencies(&parsed);

    let framework = if deps.contains("next") {
        Framework::Next
    } else if deps.contains("react") {
        Framework::React
    } else if deps.contains("vue") {
        Framework::Vue
    } else if deps.contains("svelte") {
        Framework::Svelte
    } else {
        Framework::Vanilla
    };

    let language = if deps.contains("typescript") || fs.exists("/tsconfig.json").await? {
        Language::Typescript
    } else {
        Language::Javascript
    };

    let styling = if deps.contains("tailwindcss") {
        Styling::Tailwind
    } else if deps.contains("styled-components") {
        Styling::StyledComponents
    } else if fs.exists("/src/index.scss").await? {
        Styling::Scss
    } else {
        Styling::Css
    };

    let package_manager = if fs.exists("/pnpm-lock.yaml").await? {
        PackageManager::Pnpm
    } else if fs.exists("/yarn.lock").await? {
        PackageManager::Yarn
    } else {
        PackageManager::Npm
    };

    Ok(TechStack {
        framework,
        language,
        styling,
        package_manager,
    })
}

fn collect_dependencies(manifest: &Value) -> HashSet<String> {
    let mut deps = HashSet::new();
    for table in ["dependencies", "devDependencies"] {
        if let Some(map) = manifest.get(table).and_then(Value::as_object) {
            deps.extend(map.keys().cloned());
        }
    }
    deps
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProjectState {
    projects: Vec<Project>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active: Option<Uuid>,
}

/// In-memory store for projects with disk persistence.
#[derive(Debug)]
pub struct ProjectStore {
    state: RwLock<ProjectState>,
    storage_path: PathBuf,
}

impl ProjectStore {
    /// Create a new project store, loading from disk if available.
    pub async fn new(base_dir: &Path) -> Self {
        let storage_path = base_dir.join(".sandcastle/projects.json");

        let state = if storage_path.exists() {
            match Self::load_from_path(&storage_path) {
                Ok(state) => {
                    tracing::info!("Loaded projects from {}", storage_path.display());
                    state
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load projects from {}: {}, starting empty",
                        storage_path.display(),
                        e
                    );
                    ProjectState::default()
                }
            }
        } else {
            ProjectState::default()
        };

        Self {
            state: RwLock::new(state),
            storage_path,
        }
    }

    fn load_from_path(path: &Path) -> Result<ProjectState, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    async fn save_to_disk(&self) -> Result<(), std::io::Error> {
        let state = self.state.read().await;

        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&*state)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        std::fs::write(&self.storage_path, contents)?;
        tracing::debug!("Saved projects to {}", self.storage_path.display());
        Ok(())
    }

    /// Create a project and make it active.
    pub async fn create_project(
        &self,
        name: &str,
        description: Option<String>,
        tech_stack: TechStack,
    ) -> Result<Project, std::io::Error> {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description,
            tech_stack,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write().await;
        state.active = Some(project.id);
        state.projects.push(project.clone());
        drop(state);
        self.save_to_disk().await?;
        Ok(project)
    }

    /// Rename a project. Returns false when the id is unknown.
    pub async fn rename_project(&self, id: Uuid, name: &str) -> Result<bool, std::io::Error> {
        let mut state = self.state.write().await;
        let Some(project) = state.projects.iter_mut().find(|p| p.id == id) else {
            return Ok(false);
        };
        project.name = name.to_string();
        project.updated_at = Utc::now();
        drop(state);
        self.save_to_disk().await?;
        Ok(true)
    }

    /// Delete a project, clearing the active marker if it pointed there.
    pub async fn delete_project(&self, id: Uuid) -> Result<bool, std::io::Error> {
        let mut state = self.state.write().await;
        let before = state.projects.len();
        state.projects.retain(|p| p.id != id);
        if state.projects.len() == before {
            return Ok(false);
        }
        if state.active == Some(id) {
            state.active = None;
        }
        drop(state);
        self.save_to_disk().await?;
        Ok(true)
    }

    /// Mark a project active. Returns false when the id is unknown.
    pub async fn set_active(&self, id: Uuid) -> Result<bool, std::io::Error> {
        let mut state = self.state.write().await;
        if !state.projects.iter().any(|p| p.id == id) {
            return Ok(false);
        }
        state.active = Some(id);
        drop(state);
        self.save_to_disk().await?;
        Ok(true)
    }

    /// Bump a project's `updated_at`, marking recent activity.
    pub async fn touch_project(&self, id: Uuid) -> Result<bool, std::io::Error> {
        let mut state = self.state.write().await;
        let Some(project) = state.projects.iter_mut().find(|p| p.id == id) else {
            return Ok(false);
        };
        project.updated_at = Utc::now();
        drop(state);
        self.save_to_disk().await?;
        Ok(true)
    }

    /// Record a freshly detected stack on a project.
    pub async fn update_tech_stack(
        &self,
        id: Uuid,
        tech_stack: TechStack,
    ) -> Result<bool, std::io::Error> {
        let mut state = self.state.write().await;
        let Some(project) = state.projects.iter_mut().find(|p| p.id == id) else {
            return Ok(false);
        };
        project.tech_stack = tech_stack;
        project.updated_at = Utc::now();
        drop(state);
        self.save_to_disk().await?;
        Ok(true)
    }

    pub async fn projects(&self) -> Vec<Project> {
        self.state.read().await.projects.clone()
    }

    pub async fn active_project(&self) -> Option<Project> {
        let state = self.state.read().await;
        let id = state.active?;
        state.projects.iter().find(|p| p.id == id).cloned()
    }
}

/// Shared project store wrapped in Arc for concurrent access.
pub type SharedProjectStore = Arc<ProjectStore>;

/// The files a brand-new project starts with: a minimal Vite + React app.
pub fn starter_files() -> Vec<MountFile> {
    vec![
        MountFile::new(
            "/package.json",
            r#"{
  "name": "sandcastle-app",
  "private": true,
  "version": "0.1.0",
  "type": "module",
  "scripts": {
    "dev": "vite",
    "build": "vite build",
    "preview": "vite preview"
  },
  "dependencies": {
    "react": "^18.2.0",
    "react-dom": "^18.2.0"
  },
  "devDependencies": {
    "@vitejs/plugin-react": "^4.0.0",
    "vite": "^5.0.0"
  }
}
"#,
        ),
        MountFile::new(
            "/index.html",
            r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Sandcastle App</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>
"#,
        ),
        MountFile::new(
            "/vite.config.js",
            r#"import { defineConfig } from 'vite'
import react from '@vitejs/plugin-react'

export default defineConfig({
  plugins: [react()],
})
"#,
        ),
        MountFile::new(
            "/src/main.jsx",
            r#"import React from 'react'
import ReactDOM from 'react-dom/client'
import App from './App.jsx'
import './index.css'

ReactDOM.createRoot(document.getElementById('root')).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
)
"#,
        ),
        MountFile::new(
            "/src/App.jsx",
            r#"function App() {
  return (
    <div className="app">
      <h1>Welcome to your new project</h1>
      <p>Ask the assistant to start building.</p>
    </div>
  )
}

export default App
"#,
        ),
        MountFile::new(
            "/src/index.css",
            r#":root {
  font-family: system-ui, sans-serif;
  color: #213547;
}

.app {
  max-width: 640px;
  margin: 4rem auto;
  text-align: center;
}
"#,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MemorySandbox, SandboxRuntime};

    async fn workspace(files: &[(&str, &str)]) -> WorkspaceFs {
        let runtime = Arc::new(MemorySandbox::with_files(files).await);
        let fs = WorkspaceFs::new(runtime as Arc<dyn SandboxRuntime>);
        fs.initialize().await.unwrap();
        fs
    }

    #[tokio::test]
    async fn react_tailwind_typescript_is_detected() {
        let fs = workspace(&[
            (
                "/package.json",
                r#"{"dependencies": {"react": "^18.0.0"}, "devDependencies": {"tailwindcss": "^3.0.0"}}"#,
            ),
            ("/tsconfig.json", "{}"),
        ])
        .await;

        let stack = detect_tech_stack(&fs).await;
        assert_eq!(stack.framework, Framework::React);
        assert_eq!(stack.language, Language::Typescript);
        assert_eq!(stack.styling, Styling::Tailwind);
        assert_eq!(stack.package_manager, PackageManager::Npm);
    }

    #[tokio::test]
    async fn next_wins_over_react_and_lockfiles_pick_the_package_manager() {
        let fs = workspace(&[
            (
                "/package.json",
                r#"{"dependencies": {"next": "^14.0.0", "react": "^18.0.0"}}"#,
            ),
            ("/yarn.lock", ""),
        ])
        .await;

        let stack = detect_tech_stack(&fs).await;
        assert_eq!(stack.framework, Framework::Next);
        assert_eq!(stack.package_manager, PackageManager::Yarn);
    }

    #[tokio::test]
    async fn pnpm_beats_yarn_when_both_lockfiles_exist() {
        let fs = workspace(&[
            ("/package.json", r#"{"dependencies": {"vue": "^3.0.0"}}"#),
            ("/pnpm-lock.yaml", ""),
            ("/yarn.lock", ""),
        ])
        .await;

        let stack = detect_tech_stack(&fs).await;
        assert_eq!(stack.framework, Framework::Vue);
        assert_eq!(stack.package_manager, PackageManager::Pnpm);
    }

    #[tokio::test]
    async fn a_manifest_without_frameworks_is_vanilla() {
        let fs = workspace(&[
            ("/package.json", r#"{"dependencies": {"lodash": "^4.0.0"}}"#),
            ("/src/index.scss", "$x: 1;"),
        ])
        .await;

        let stack = detect_tech_stack(&fs).await;
        assert_eq!(stack.framework, Framework::Vanilla);
        assert_eq!(stack.styling, Styling::Scss);
    }

    #[tokio::test]
    async fn missing_or_broken_manifests_fall_back_to_defaults() {
        let empty = workspace(&[]).await;
        assert_eq!(detect_tech_stack(&empty).await, TechStack::default());

        let broken = workspace(&[("/package.json", "{oops")]).await;
        assert_eq!(detect_tech_stack(&broken).await, TechStack::default());
    }

    #[tokio::test]
    async fn starter_files_detect_as_a_react_app() {
        let runtime = Arc::new(MemorySandbox::new());
        let fs = WorkspaceFs::new(runtime as Arc<dyn SandboxRuntime>);
        fs.initialize().await.unwrap();
        fs.mount(&starter_files()).await.unwrap();

        let stack = detect_tech_stack(&fs).await;
        assert_eq!(stack.framework, Framework::React);
        assert_eq!(stack.language, Language::Javascript);
        assert_eq!(stack.styling, Styling::Css);
    }

    #[test]
    fn tech_stack_serializes_with_camel_case_and_lowercase_values() {
        let stack = TechStack {
            framework: Framework::React,
            language: Language::Typescript,
            styling: Styling::StyledComponents,
            package_manager: PackageManager::Pnpm,
        };
        let json = serde_json::to_value(stack).unwrap();
        assert_eq!(json["framework"], "react");
        assert_eq!(json["styling"], "styled-components");
        assert_eq!(json["packageManager"], "pnpm");
    }

    #[tokio::test]
    async fn the_store_round_trips_projects_and_the_active_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path()).await;

        let project = store
            .create_project("demo", Some("A demo".to_string()), TechStack::default())
            .await
            .unwrap();
        assert_eq!(store.active_project().await.unwrap().id, project.id);

        let reopened = ProjectStore::new(dir.path()).await;
        assert_eq!(reopened.projects().await.len(), 1);
        assert_eq!(reopened.active_project().await.unwrap().name, "demo");
    }

    #[tokio::test]
    async fn mutations_touch_timestamps_and_unknown_ids_return_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path()).await;
        let project = store
            .create_project("demo", None, TechStack::default())
            .await
            .unwrap();

        assert!(store.rename_project(project.id, "renamed").await.unwrap());
        let renamed = &store.projects().await[0];
        assert_eq!(renamed.name, "renamed");
        assert!(renamed.updated_at >= project.updated_at);

        let stack = TechStack {
            framework: Framework::React,
            ..TechStack::default()
        };
        assert!(store.update_tech_stack(project.id, stack).await.unwrap());
        assert_eq!(
            store.projects().await[0].tech_stack.framework,
            Framework::React
        );

        assert!(store.touch_project(project.id).await.unwrap());

        assert!(!store.rename_project(Uuid::new_v4(), "nope").await.unwrap());
        assert!(!store.set_active(Uuid::new_v4()).await.unwrap());
        assert!(!store.delete_project(Uuid::new_v4()).await.unwrap());
        assert!(!store.touch_project(Uuid::new_v4()).await.unwrap());
        assert!(!store
            .update_tech_stack(Uuid::new_v4(), TechStack::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn deleting_the_active_project_clears_the_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path()).await;
        let first = store
            .create_project("first", None, TechStack::default())
            .await
            .unwrap();
        let second = store
            .create_project("second", None, TechStack::default())
            .await
            .unwrap();

        // Creating the second project made it active; switch back.
        assert!(store.set_active(first.id).await.unwrap());
        assert!(store.delete_project(first.id).await.unwrap());
        assert!(store.active_project().await.is_none());

        assert!(store.set_active(second.id).await.unwrap());
        assert_eq!(store.active_project().await.unwrap().id, second.id);
    }
}
