//! Workspace path conventions.
//!
//! Every path held in the file tree, the content cache and change events is
//! in the canonical form produced by [`normalize`]: absolute, `/`-separated,
//! no trailing slash. Normalizing at the boundary means the same entry can
//! never appear under two spellings.

/// Normalize a workspace path to canonical form.
///
/// A leading `./` is dropped, a leading `/` is added when missing and
/// trailing slashes are stripped (the root itself stays `/`). The function
/// is idempotent: normalizing an already-normalized path returns it
/// unchanged.
pub fn normalize(path: &str) -> String {
    let stripped = path.strip_prefix("./").unwrap_or(path);
    let mut normalized = if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{stripped}")
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Stable tree-node id for a path: every character that is not ASCII
/// alphanumeric becomes `_`.
pub fn node_id(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Final path segment, used as the display name of a tree node.
pub fn file_name(path: &str) -> &str {
    path.split('/').last().unwrap_or(path)
}

/// Parent directory of a normalized path. `None` for the root and for
/// top-level entries, whose parent is the root itself.
pub fn parent(path: &str) -> Option<&str> {
    let idx = path.rfind('/')?;
    if idx == 0 {
        None
    } else {
        Some(&path[..idx])
    }
}
