//! Path walking over the tree.
//!
//! The host driver hands the engine backslash-separated paths; these
//! helpers split them and walk the child indexes from the root. Walking
//! stops early when an intermediate component is missing, is not a
//! directory, or is a directory flagged as a reparse point (the caller
//! then resolves the reparse target itself).

use crate::attr::FileAttributes;
use crate::error::WalkError;
use crate::node::ROOT_NODE;
use crate::tree::FileTree;

/// Splits a path into its non-empty components.
///
/// Leading, trailing and doubled separators are tolerated; `\` alone (or
/// the empty string) is the root.
fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('\\').filter(|c| !c.is_empty())
}

/// Splits a path into `(parent-path, leaf-name)`.
///
/// Returns `None` for the root itself, which has no parent.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('\\');
    let cut = trimmed.rfind('\\')?;
    let leaf = &trimmed[cut + 1..];
    if leaf.is_empty() {
        return None;
    }
    Some((&trimmed[..cut], leaf))
}

/// Resolves a full path to a node index, starting at the root.
///
/// Every component including the leaf must exist. Intermediate components
/// must be directories; an intermediate directory carrying the
/// reparse-point bit aborts the walk with [`WalkError::ReparsePoint`] so
/// the caller can chase the reparse target.
pub fn walk(tree: &FileTree, path: &str) -> Result<u64, WalkError> {
    let mut current = ROOT_NODE;
    let mut comps = components(path).peekable();

    while let Some(name) = comps.next() {
        let is_leaf = comps.peek().is_none();
        let found = tree.find(current, name).ok_or(WalkError::NotFound)?;
        let info = tree.get(found.node_index);

        if !is_leaf {
            if !info.attributes.is_directory() {
                return Err(WalkError::NotFound);
            }
            if info.attributes.is_reparse_point() {
                return Err(WalkError::ReparsePoint {
                    node_index: found.node_index,
                    reparse_tag: info.reparse_tag,
                });
            }
        }
        current = found.node_index;
    }
    Ok(current)
}

/// Resolves a path's parent directory, returning `(parent_index, leaf)`.
///
/// The leaf itself need not exist; creation flows through here. Fails like
/// [`walk`] when the parent chain is broken, and with
/// [`WalkError::NotFound`] when the resolved parent is not a directory.
pub fn walk_parent<'a>(tree: &FileTree, path: &'a str) -> Result<(u64, &'a str), WalkError> {
    let Some((parent_path, leaf)) = split_parent(path) else {
        return Err(WalkError::NotFound);
    };
    let parent = walk(tree, parent_path)?;
    let info = tree.get(parent);
    if !info.attributes.is_directory() {
        return Err(WalkError::NotFound);
    }
    if info.attributes.is_reparse_point() {
        return Err(WalkError::ReparsePoint {
            node_index: parent,
            reparse_tag: info.reparse_tag,
        });
    }
    Ok((parent, leaf))
}

/// Recomposes a path from the canonical names stored in the tree.
///
/// Case-insensitive volumes preserve the spelling a name was created
/// with; this rebuilds the path in that stored spelling so callers can
/// report it back. Case-sensitive volumes return `None` and the caller
/// uses its input unchanged.
pub fn normalized_path(tree: &FileTree, path: &str) -> Option<String> {
    if !tree.case_insensitive() {
        return None;
    }
    let mut current = ROOT_NODE;
    let mut out = String::with_capacity(path.len());
    for name in components(path) {
        let found = tree.find(current, name)?;
        out.push('\\');
        out.push_str(found.normalized_name.as_deref().unwrap_or(name));
        current = found.node_index;
    }
    if out.is_empty() {
        out.push('\\');
    }
    Some(out)
}
