//! Prompt context assembly.
//!
//! Builds the system prompt for a run from what the workspace currently
//! looks like: detected tech stack, the serialized file tree and a small
//! selection of relevant file bodies. Selection is deliberately cheap, a
//! keyword heuristic rather than anything semantic, because the whole
//! context is rebuilt on every prompt.

use serde::Serialize;

use crate::fs::tree::{self, FileNode};
use crate::fs::WorkspaceFs;
use crate::project::{self, TechStack};

/// Prompts containing one of these suggest the user wants existing code
/// touched, which makes current source files worth embedding.
const EDIT_INTENT_KEYWORDS: &[&str] = &[
    "modify", "update", "change", "edit", "fix", "add to", "improve",
];

/// Always embedded when present.
const CONFIG_MANIFESTS: &[&str] = &[
    "/package.json",
    "/tsconfig.json",
    "/vite.config.js",
    "/vite.config.ts",
];

const SOURCE_EXTENSIONS: &[&str] = &[".jsx", ".tsx", ".js", ".ts", ".css"];

const MAX_RELEVANT_SOURCES: usize = 5;
const MAX_EMBEDDED_CONTENT: usize = 2000;

const RESPONSE_CONTRACT: &str = r#"Respond with a single JSON object inside a ```json code fence:

```json
{
  "message": "summary of what you did",
  "fileOperations": [
    { "type": "create", "path": "/src/NewFile.jsx", "content": "..." },
    { "type": "modify", "path": "/src/App.jsx", "content": "..." },
    { "type": "delete", "path": "/src/Old.jsx" }
  ],
  "commands": ["npm install some-package"]
}
```

Rules:
- Paths are absolute, starting with /.
- create and modify operations carry the complete file content, never a diff.
- Use commands only for terminal work such as installing packages.
- Empty fileOperations and commands arrays are fine for question-only replies."#;

/// Everything the system prompt is built from.
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub tech_stack: TechStack,
    pub file_tree: Vec<FileNode>,
    pub relevant_files: Vec<RelevantFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelevantFile {
    pub path: String,
    pub content: String,
}

/// Assemble the context for one prompt. Never fails: detection falls back
/// to defaults and unreadable files are skipped.
pub async fn build_context(fs: &WorkspaceFs, prompt: &str) -> PromptContext {
    let tech_stack = project::detect_tech_stack(fs).await;
    let file_tree = fs.file_tree().await;
    let relevant_files = collect_relevant_files(fs, &file_tree, prompt).await;
    PromptContext {
        tech_stack,
        file_tree,
        relevant_files,
    }
}

async fn collect_relevant_files(
    fs: &WorkspaceFs,
    file_tree: &[FileNode],
    prompt: &str,
) -> Vec<RelevantFile> {
    let mut selected: Vec<String> = Vec::new();

    for manifest in CONFIG_MANIFESTS {
        if fs.exists(manifest).await.unwrap_or(false) {
            selected.push((*manifest).to_string());
        }
    }

    let prompt = prompt.to_lowercase();
    if EDIT_INTENT_KEYWORDS.iter().any(|k| prompt.contains(k)) {
        let mut sources = 0;
        for node in tree::flatten(file_tree) {
            if sources == MAX_RELEVANT_SOURCES {
                break;
            }
            if node.is_dir() {
                continue;
            }
            if !SOURCE_EXTENSIONS.iter().any(|ext| node.path.ends_with(ext)) {
                continue;
            }
            if selected.contains(&node.path) {
                continue;
            }
            selected.push(node.path.clone());
            sources += 1;
        }
    }

    let mut files = Vec::with_capacity(selected.len());
    for path in selected {
        match fs.read_file(&path).await {
            Ok(content) => files.push(RelevantFile {
                content: truncate_content(&content),
                path,
            }),
            Err(err) => {
                tracing::debug!(path = %path, "skipping unreadable context file: {err}");
            }
        }
    }
    files
}

fn truncate_content(content: &str) -> String {
    if content.len() <= MAX_EMBEDDED_CONTENT {
        return content.to_string();
    }
    let mut cut = MAX_EMBEDDED_CONTENT;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... (truncated)", &content[..cut])
}

/// Render the full system prompt for one run.
pub fn build_system_prompt(context: &PromptContext) -> String {
    let stack = &context.tech_stack;
    let tree = if context.file_tree.is_empty() {
        "(empty project)\n".to_string()
    } else {
        serialize_tree(&context.file_tree)
    };

    let mut prompt = format!(
        "You are Sandcastle, an expert coding assistant working inside a sandboxed web project.\n\n\
         Project stack: {} / {}, styling: {}, package manager: {}.\n\n\
         Current file tree:\n{tree}",
        stack.framework.as_str(),
        stack.language.as_str(),
        stack.styling.as_str(),
        stack.package_manager.as_str(),
    );

    if !context.relevant_files.is_empty() {
        prompt.push_str("\nRelevant files:\n");
        for file in &context.relevant_files {
            prompt.push_str(&format!("\n--- {} ---\n{}\n", file.path, file.content));
        }
    }

    prompt.push('\n');
    prompt.push_str(RESPONSE_CONTRACT);
    prompt
}

fn serialize_tree(nodes: &[FileNode]) -> String {
    let mut out = String::new();
    write_level(&mut out, nodes, 0);
    out
}

fn write_level(out: &mut String, nodes: &[FileNode], depth: usize) {
    for node in nodes {
        for _ in 0..depth {
            out.push_str("  ");
        }
        if node.is_dir() {
            out.push_str(&node.name);
            out.push_str("/\n");
            if let Some(children) = &node.children {
                write_level(out, children, depth + 1);
            }
        } else {
            out.push_str(&node.name);
            out.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::runtime::{MemorySandbox, SandboxRuntime};

    async fn workspace(files: &[(&str, &str)]) -> WorkspaceFs {
        let runtime = Arc::new(MemorySandbox::with_files(files).await);
        let fs = WorkspaceFs::new(runtime as Arc<dyn SandboxRuntime>);
        fs.initialize().await.unwrap();
        fs
    }

    #[tokio::test]
    async fn manifests_are_embedded_even_without_edit_intent() {
        let fs = workspace(&[
            ("/package.json", "{\"name\":\"demo\"}"),
            ("/index.html", "<html>"),
            ("/src/App.jsx", "export default function App() {}"),
        ])
        .await;

        let context = build_context(&fs, "what does this project do?").await;
        let paths: Vec<&str> = context
            .relevant_files
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(paths, vec!["/package.json"]);
    }

    #[tokio::test]
    async fn edit_intent_pulls_in_source_files_up_to_the_cap() {
        let fs = workspace(&[
            ("/package.json", "{}"),
            ("/src/a.jsx", "a"),
            ("/src/b.jsx", "b"),
            ("/src/c.jsx", "c"),
            ("/src/d.jsx", "d"),
            ("/src/e.jsx", "e"),
            ("/src/f.jsx", "f"),
            ("/README.md", "docs"),
        ])
        .await;

        let context = build_context(&fs, "Fix the header layout").await;
        let paths: Vec<&str> = context
            .relevant_files
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec![
                "/package.json",
                "/src/a.jsx",
                "/src/b.jsx",
                "/src/c.jsx",
                "/src/d.jsx",
                "/src/e.jsx",
            ]
        );
    }

    #[tokio::test]
    async fn manifests_are_not_selected_twice() {
        let fs = workspace(&[("/vite.config.js", "export default {}")]).await;

        let context = build_context(&fs, "update the build setup").await;
        let paths: Vec<&str> = context
            .relevant_files
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(paths, vec!["/vite.config.js"]);
    }

    #[test]
    fn long_content_is_truncated_on_a_char_boundary() {
        let mut content = "x".repeat(MAX_EMBEDDED_CONTENT - 10);
        for _ in 0..4 {
            content.push('\u{1F389}');
        }
        assert!(content.len() > MAX_EMBEDDED_CONTENT);

        let truncated = truncate_content(&content);
        assert!(truncated.ends_with("\n... (truncated)"));
        let body = truncated.trim_end_matches("\n... (truncated)");
        assert!(content.starts_with(body));
        assert!(body.len() <= MAX_EMBEDDED_CONTENT);
    }

    #[test]
    fn short_content_passes_through() {
        assert_eq!(truncate_content("fn main() {}"), "fn main() {}");
    }

    #[test]
    fn tree_serialization_indents_children() {
        let nodes = vec![
            FileNode::directory("/src", vec![FileNode::file("/src/App.jsx")]),
            FileNode::file("/index.html"),
        ];
        assert_eq!(serialize_tree(&nodes), "src/\n  App.jsx\nindex.html\n");
    }

    #[tokio::test]
    async fn system_prompt_carries_stack_tree_and_contract() {
        let fs = workspace(&[]).await;
        let context = build_context(&fs, "hello").await;
        let prompt = build_system_prompt(&context);

        assert!(prompt.starts_with("You are Sandcastle"));
        assert!(prompt.contains("(empty project)"));
        assert!(prompt.contains("```json"));
        assert!(prompt.contains("fileOperations"));
    }
}
