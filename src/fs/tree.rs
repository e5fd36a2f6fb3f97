//! Workspace file tree model.

use serde::{Deserialize, Serialize};

use crate::paths;
use crate::runtime::EntryKind;

/// One node of the workspace tree. Directories carry their children in
/// display order: directories before files, each level sorted by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileNode {
    pub id: String,
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    pub fn file(path: &str) -> Self {
        Self {
            id: paths::node_id(path),
            name: paths::file_name(path).to_string(),
            path: path.to_string(),
            kind: EntryKind::File,
            children: None,
        }
    }

    pub fn directory(path: &str, children: Vec<FileNode>) -> Self {
        Self {
            id: paths::node_id(path),
            name: paths::file_name(path).to_string(),
            path: path.to_string(),
            kind: EntryKind::Directory,
            children: Some(children),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Sort one sibling level: directories before files, then by name.
pub fn sort_level(nodes: &mut [FileNode]) {
    nodes.sort_by(|a, b| match (a.kind, b.kind) {
        (EntryKind::Directory, EntryKind::File) => std::cmp::Ordering::Less,
        (EntryKind::File, EntryKind::Directory) => std::cmp::Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
}

/// Depth-first lookup by canonical path.
pub fn find<'a>(nodes: &'a [FileNode], path: &str) -> Option<&'a FileNode> {
    for node in nodes {
        if node.path == path {
            return Some(node);
        }
        if let Some(children) = &node.children {
            if let Some(found) = find(children, path) {
                return Some(found);
            }
        }
    }
    None
}

/// Every node of the tree, depth-first in display order.
pub fn flatten(nodes: &[FileNode]) -> Vec<&FileNode> {
    fn walk<'a>(nodes: &'a [FileNode], out: &mut Vec<&'a FileNode>) {
        for node in nodes {
            out.push(node);
            if let Some(children) = &node.children {
                walk(children, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(nodes, &mut out);
    out
}
