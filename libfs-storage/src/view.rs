//! View Engine — materialises a view's dirtree into an in-memory prefix
//! tree, and compiles its filename template into a reversible
//! format/parse pair.
//!
//! Grounded on `business_logic.py`'s `generate_vtree`/`seek_vtree`/`mkdir`/
//! `setup_filename_parsing`/`get_metadata_from_gen_filename`/
//! `get_gen_filename`, and `misc.py`'s `DUPLICATE_COUNTER_RX`. The tree is
//! an arena of nodes rather than a recursive map-of-maps.

use std::collections::HashMap;

use libfs_core::View;
use regex::Regex;

use crate::error::{Result, StorageError};

const DUPLICATE_SUFFIX_PREFIX: &str = " (libfs:";

/// One node in the view tree. Children are keyed by their path segment;
/// `NodeId` is a plain index into the arena's `Vec`, avoiding the ownership
/// cycles a `Rc<RefCell<..>>` map-of-maps would need.
pub type NodeId = usize;

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, NodeId>,
}

/// The in-memory projection of `SELECT DISTINCT dirtree FROM files`.
#[derive(Debug)]
pub struct ViewTree {
    nodes: Vec<Node>,
}

impl ViewTree {
    pub const ROOT: NodeId = 0;

    fn empty() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    /// Rebuilds the tree from scratch out of the catalog's distinct
    /// dirtree-column tuples. Mirrors `generate_vtree`.
    pub fn build(tuples: &[Vec<String>]) -> Self {
        let mut tree = Self::empty();
        for tuple in tuples {
            let mut node = Self::ROOT;
            for segment in tuple {
                if segment.is_empty() {
                    continue;
                }
                node = tree.child_or_insert(node, segment);
            }
        }
        tree
    }

    fn child_or_insert(&mut self, parent: NodeId, segment: &str) -> NodeId {
        if let Some(&existing) = self.nodes[parent].children.get(segment) {
            return existing;
        }
        let id = self.nodes.len();
        self.nodes.push(Node::default());
        self.nodes[parent].children.insert(segment.to_string(), id);
        id
    }

    /// Walks `segments` from the root, returning the node at that depth, or
    /// `None` if any segment is absent. Mirrors `seek_vtree`/`lookup_dir`.
    pub fn seek(&self, segments: &[String]) -> Option<NodeId> {
        let mut node = Self::ROOT;
        for segment in segments {
            node = *self.nodes[node].children.get(segment)?;
        }
        Some(node)
    }

    pub fn children(&self, node: NodeId) -> impl Iterator<Item = &str> {
        self.nodes[node].children.keys().map(|s| s.as_str())
    }

    /// `mkdir` — splices an empty child into the tree in memory only; the
    /// node persists until a catalog rebuild either confirms or discards
    /// it. Mirrors `business_logic.py::mkdir`.
    pub fn mkdir(&mut self, segments: &[String]) -> Result<NodeId> {
        let (parent_segments, leaf) = segments
            .split_last()
            .ok_or_else(|| StorageError::InvalidMetadata("mkdir requires a path".into()))?;
        let parent = self.seek(parent_segments).ok_or_else(|| {
            StorageError::InvalidMetadata("mkdir: parent directory does not exist".into())
        })?;
        Ok(self.child_or_insert(parent, leaf))
    }

    /// `rmdir` — removes an empty child node. Errors if it has children.
    pub fn rmdir(&mut self, segments: &[String]) -> Result<()> {
        let (parent_segments, leaf) = segments
            .split_last()
            .ok_or_else(|| StorageError::InvalidMetadata("rmdir requires a path".into()))?;
        let parent = self
            .seek(parent_segments)
            .ok_or_else(|| StorageError::NotFound("rmdir: parent not found".into()))?;
        let child = *self.nodes[parent]
            .children
            .get(leaf)
            .ok_or_else(|| StorageError::NotFound(format!("rmdir: {leaf} not found")))?;
        if !self.nodes[child].children.is_empty() {
            return Err(StorageError::InvalidMetadata(
                "rmdir: directory not empty".into(),
            ));
        }
        self.nodes[parent].children.remove(leaf);
        Ok(())
    }
}

/// The compiled filename template: a regex with one capturing group per
/// `%{key}` placeholder, plus the ordered key list to zip captures against.
/// Mirrors `setup_filename_parsing`.
pub struct FilenameTemplate {
    template: String,
    keys: Vec<String>,
    regex: Regex,
}

impl FilenameTemplate {
    pub fn compile(template: &str) -> Result<Self> {
        let mut keys = Vec::new();
        let mut pattern = String::new();
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '%' && chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                let mut key = String::new();
                for c2 in chars.by_ref() {
                    if c2 == '}' {
                        break;
                    }
                    key.push(c2);
                }
                keys.push(key);
                pattern.push_str("(.*)");
            } else {
                pattern.push_str(&regex::escape(&c.to_string()));
            }
        }
        let regex = Regex::new(&format!("^{pattern}$"))
            .map_err(|e| StorageError::InvalidMetadata(e.to_string()))?;
        Ok(Self {
            template: template.to_string(),
            keys,
            regex,
        })
    }

    /// `get_gen_filename` — substitutes each `%{key}` with its stringified
    /// catalog value. Unknown keys are left as the literal placeholder.
    pub fn format(&self, values: &HashMap<String, String>) -> String {
        let mut out = String::new();
        let mut chars = self.template.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '%' && chars.peek() == Some(&'{') {
                chars.next();
                let mut key = String::new();
                for c2 in chars.by_ref() {
                    if c2 == '}' {
                        break;
                    }
                    key.push(c2);
                }
                match values.get(&key) {
                    Some(v) => out.push_str(v),
                    None => out.push_str(&format!("%{{{key}}}")),
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    /// `get_metadata_from_gen_filename` — re-applies the compiled regex and
    /// zips captures with the key list. A non-match is the caller's
    /// `EINVAL` at rename time.
    pub fn parse(&self, filename: &str) -> Result<HashMap<String, String>> {
        let caps = self.regex.captures(filename).ok_or_else(|| {
            StorageError::InvalidMetadata(format!(
                "{filename} does not match filename pattern {}",
                self.regex.as_str()
            ))
        })?;
        let mut out = HashMap::new();
        for (i, key) in self.keys.iter().enumerate() {
            if let Some(m) = caps.get(i + 1) {
                out.insert(key.clone(), m.as_str().to_string());
            }
        }
        Ok(out)
    }
}

pub fn filename_has_duplicate_counter(name: &str) -> bool {
    if let Some(idx) = name.rfind(DUPLICATE_SUFFIX_PREFIX) {
        return name[idx + DUPLICATE_SUFFIX_PREFIX.len()..]
            .strip_suffix(')')
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()));
    }
    false
}

/// Given formatted names in listing order, appends `" (libfs:N)"` to every
/// name beyond the first occurrence of a duplicate. Mirrors
/// `get_contents_by_vpath`'s `file_name_occurrences` counter, but emits the
/// `" (libfs:N)"` suffix that cache reconciliation actually recognizes (see
/// DESIGN.md for the original's inconsistency here).
pub fn disambiguate(names: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    names
        .into_iter()
        .map(|name| match seen.get(&name).copied() {
            None => {
                seen.insert(name.clone(), 0);
                name
            }
            Some(count) => {
                let next = count + 1;
                seen.insert(name.clone(), next);
                format!("{name}{DUPLICATE_SUFFIX_PREFIX}{next})")
            }
        })
        .collect()
}

/// Named view registry entry plus its dirtree depth, used throughout the
/// operations layer to decide whether a path is inside or beyond the tree.
pub fn max_dir_level(view: &View) -> usize {
    view.depth()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_seek_round_trip() {
        let tuples = vec![
            vec!["Rock".to_string(), "Artist A".to_string()],
            vec!["Rock".to_string(), "Artist B".to_string()],
            vec!["Jazz".to_string(), "Artist C".to_string()],
        ];
        let tree = ViewTree::build(&tuples);
        assert!(tree.seek(&["Rock".to_string()]).is_some());
        assert!(tree.seek(&["Rock".to_string(), "Artist A".to_string()]).is_some());
        assert!(tree.seek(&["Disco".to_string()]).is_none());
        let mut children: Vec<&str> = tree.children(ViewTree::ROOT).collect();
        children.sort();
        assert_eq!(children, vec!["Jazz", "Rock"]);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let tuples = vec![vec!["Rock".to_string()]];
        let a = ViewTree::build(&tuples);
        let b = ViewTree::build(&tuples);
        assert_eq!(a.children(ViewTree::ROOT).count(), b.children(ViewTree::ROOT).count());
    }

    #[test]
    fn mkdir_then_seek_finds_ephemeral_node() {
        let mut tree = ViewTree::build(&[vec!["Rock".to_string()]]);
        tree.mkdir(&["Rock".to_string(), "New Artist".to_string()])
            .unwrap();
        assert!(tree
            .seek(&["Rock".to_string(), "New Artist".to_string()])
            .is_some());
    }

    #[test]
    fn rmdir_rejects_nonempty_directory() {
        let mut tree = ViewTree::build(&[vec!["Rock".to_string(), "Artist A".to_string()]]);
        assert!(tree.rmdir(&["Rock".to_string()]).is_err());
    }

    #[test]
    fn template_format_and_parse_round_trip() {
        let tpl = FilenameTemplate::compile("%{track_number} -- %{title}").unwrap();
        let mut values = HashMap::new();
        values.insert("track_number".to_string(), "1".to_string());
        values.insert("title".to_string(), "Track A".to_string());
        let formatted = tpl.format(&values);
        assert_eq!(formatted, "1 -- Track A");
        let parsed = tpl.parse(&formatted).unwrap();
        assert_eq!(parsed.get("title").unwrap(), "Track A");
    }

    #[test]
    fn template_parse_rejects_non_matching_name() {
        let tpl = FilenameTemplate::compile("%{title}.mp3").unwrap();
        assert!(tpl.parse("no extension here").is_err());
    }

    #[test]
    fn disambiguate_suffixes_second_occurrence() {
        let names = vec!["Track.mp3".to_string(), "Track.mp3".to_string(), "Other.mp3".to_string()];
        let result = disambiguate(names);
        assert_eq!(
            result,
            vec!["Track.mp3", "Track.mp3 (libfs:1)", "Other.mp3"]
        );
    }

    #[test]
    fn filename_has_duplicate_counter_recognizes_suffix() {
        assert!(filename_has_duplicate_counter("Track.mp3 (libfs:1)"));
        assert!(!filename_has_duplicate_counter("Track.mp3"));
    }
}
