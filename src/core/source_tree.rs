/*
 * The browsable filesystem tree. Nodes live in an arena and address each
 * other by `NodeId`, never by reference, so the tree can be shared behind a
 * mutex and grown from worker threads without ownership ambiguity. The core
 * only manipulates the variants defined here; rendering them is the job of a
 * UI-owned adapter.
 */
use std::path::{Path, PathBuf};

/// Stable arena index of a node. Ids are never reused within one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// Trailing "load more" entry of a partially loaded directory.
    LoadMore,
    /// Shown while a page fetch for the directory is in flight.
    Loading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    PartiallyLoaded,
    Loaded,
}

/*
 * User-driven marking of a node. Ignored nodes are excluded from rule
 * application; mapped nodes already belong to a rule and are flagged so UI
 * surfaces can render and filter them.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marking {
    Normal,
    Ignored,
    Mapped,
}

#[derive(Debug)]
pub enum NodeKind {
    Directory {
        state: LoadState,
        children: Vec<NodeId>,
    },
    File,
    Placeholder(PlaceholderKind),
}

#[derive(Debug)]
pub struct SourceNode {
    pub path: PathBuf,
    pub name: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    pub marking: Marking,
}

impl SourceNode {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File)
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, NodeKind::Placeholder(_))
    }
}

/// An entry delivered by one directory page, in filesystem-reported order.
#[derive(Debug, Clone)]
pub struct PageEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/*
 * Arena of source nodes. Invariant maintained by the mutators below: a
 * directory's child list is a run of realized File/Directory nodes optionally
 * followed by exactly one placeholder, and the placeholder is present exactly
 * when the directory is Loading or PartiallyLoaded.
 */
#[derive(Debug, Default)]
pub struct SourceTree {
    nodes: Vec<SourceNode>,
    roots: Vec<NodeId>,
}

impl SourceTree {
    pub fn new() -> Self {
        SourceTree {
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &SourceNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SourceNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push_node(&mut self, node: SourceNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn display_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned())
    }

    pub fn add_root(&mut self, path: PathBuf, is_dir: bool) -> NodeId {
        let kind = if is_dir {
            NodeKind::Directory {
                state: LoadState::Unloaded,
                children: Vec::new(),
            }
        } else {
            NodeKind::File
        };
        let name = Self::display_name(&path);
        let id = self.push_node(SourceNode {
            path,
            name,
            parent: None,
            kind,
            marking: Marking::Normal,
        });
        self.roots.push(id);
        id
    }

    /// All children of a directory, placeholders included.
    pub fn children(&self, dir: NodeId) -> &[NodeId] {
        match &self.node(dir).kind {
            NodeKind::Directory { children, .. } => children,
            _ => &[],
        }
    }

    /// Children that are realized filesystem entries (no placeholders).
    pub fn delivered_children(&self, dir: NodeId) -> Vec<NodeId> {
        self.children(dir)
            .iter()
            .copied()
            .filter(|id| !self.node(*id).is_placeholder())
            .collect()
    }

    pub fn load_state(&self, dir: NodeId) -> Option<LoadState> {
        match &self.node(dir).kind {
            NodeKind::Directory { state, .. } => Some(*state),
            _ => None,
        }
    }

    pub fn set_marking(&mut self, id: NodeId, marking: Marking) {
        self.node_mut(id).marking = marking;
    }

    /// Marks a node and every realized descendant.
    pub fn mark_subtree(&mut self, id: NodeId, marking: Marking) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if self.node(current).is_placeholder() {
                continue;
            }
            self.node_mut(current).marking = marking;
            if let NodeKind::Directory { children, .. } = &self.node(current).kind {
                stack.extend(children.iter().copied());
            }
        }
    }

    fn trailing_placeholder(&self, dir: NodeId) -> Option<NodeId> {
        let last = *self.children(dir).last()?;
        if self.node(last).is_placeholder() {
            Some(last)
        } else {
            None
        }
    }

    pub fn has_load_more(&self, dir: NodeId) -> bool {
        self.trailing_placeholder(dir).is_some_and(|id| {
            matches!(
                self.node(id).kind,
                NodeKind::Placeholder(PlaceholderKind::LoadMore)
            )
        })
    }

    /*
     * Transitions a directory into the Loading state ahead of a page fetch.
     * An existing trailing LoadMore placeholder is swapped (in place) for a
     * Loading placeholder, mirroring what the explorer shows while a fetch is
     * in flight. Returns false if the directory is already Loaded or Loading.
     */
    pub fn begin_page_load(&mut self, dir: NodeId) -> bool {
        let placeholder = self.trailing_placeholder(dir);
        match &mut self.node_mut(dir).kind {
            NodeKind::Directory { state, .. } => match *state {
                LoadState::Loaded | LoadState::Loading => return false,
                LoadState::Unloaded | LoadState::PartiallyLoaded => *state = LoadState::Loading,
            },
            _ => return false,
        }
        if let Some(id) = placeholder {
            self.node_mut(id).kind = NodeKind::Placeholder(PlaceholderKind::Loading);
        }
        true
    }

    /*
     * Appends one delivered page to a directory. Already-delivered children
     * are left untouched; the new entries go after them, and the trailing
     * placeholder is re-established (as LoadMore) only when more entries
     * remain. The directory reaches Loaded exactly when the final entry of
     * the enumeration has been delivered.
     */
    pub fn deliver_page(&mut self, dir: NodeId, entries: Vec<PageEntry>, more_remaining: bool) {
        let placeholder = self.trailing_placeholder(dir);

        let mut new_children = Vec::with_capacity(entries.len());
        for entry in entries {
            let kind = if entry.is_dir {
                NodeKind::Directory {
                    state: LoadState::Unloaded,
                    children: Vec::new(),
                }
            } else {
                NodeKind::File
            };
            let name = Self::display_name(&entry.path);
            let id = self.push_node(SourceNode {
                path: entry.path,
                name,
                parent: Some(dir),
                kind,
                marking: Marking::Normal,
            });
            new_children.push(id);
        }

        let placeholder_id = match (placeholder, more_remaining) {
            (existing, true) => Some(existing.unwrap_or_else(|| {
                let parent_path = self.node(dir).path.clone();
                self.push_node(SourceNode {
                    path: parent_path,
                    name: String::new(),
                    parent: Some(dir),
                    kind: NodeKind::Placeholder(PlaceholderKind::LoadMore),
                    marking: Marking::Normal,
                })
            })),
            (_, false) => None,
        };
        if let Some(id) = placeholder_id {
            self.node_mut(id).kind = NodeKind::Placeholder(PlaceholderKind::LoadMore);
        }

        match &mut self.node_mut(dir).kind {
            NodeKind::Directory { state, children } => {
                if let Some(old) = placeholder {
                    children.retain(|c| *c != old);
                }
                children.extend(new_children);
                if let Some(id) = placeholder_id {
                    children.push(id);
                }
                *state = if more_remaining {
                    LoadState::PartiallyLoaded
                } else {
                    LoadState::Loaded
                };
            }
            _ => {
                log::error!(
                    "SourceTree: deliver_page called on non-directory node {:?}",
                    dir
                );
            }
        }
    }

    pub fn count_children_by_type(&self, dir: NodeId) -> (usize, usize) {
        let mut files = 0;
        let mut dirs = 0;
        for id in self.children(dir) {
            match self.node(*id).kind {
                NodeKind::File => files += 1,
                NodeKind::Directory { .. } => dirs += 1,
                NodeKind::Placeholder(_) => {}
            }
        }
        (files, dirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, is_dir: bool) -> PageEntry {
        PageEntry {
            path: PathBuf::from(path),
            is_dir,
        }
    }

    #[test]
    fn test_add_root_starts_unloaded() {
        let mut tree = SourceTree::new();
        let root = tree.add_root(PathBuf::from("/data"), true);
        assert_eq!(tree.roots(), &[root]);
        assert_eq!(tree.load_state(root), Some(LoadState::Unloaded));
        assert!(tree.children(root).is_empty());
        assert_eq!(tree.node(root).name, "data");
    }

    #[test]
    fn test_partial_page_keeps_single_trailing_placeholder() {
        let mut tree = SourceTree::new();
        let root = tree.add_root(PathBuf::from("/data"), true);

        assert!(tree.begin_page_load(root));
        assert_eq!(tree.load_state(root), Some(LoadState::Loading));
        tree.deliver_page(
            root,
            vec![entry("/data/a.txt", false), entry("/data/b.txt", false)],
            true,
        );

        assert_eq!(tree.load_state(root), Some(LoadState::PartiallyLoaded));
        assert_eq!(tree.delivered_children(root).len(), 2);
        assert_eq!(tree.children(root).len(), 3);
        assert!(tree.has_load_more(root));
        // The placeholder is the last child, and it is the only one.
        let placeholders: Vec<_> = tree
            .children(root)
            .iter()
            .filter(|id| tree.node(**id).is_placeholder())
            .collect();
        assert_eq!(placeholders.len(), 1);
    }

    #[test]
    fn test_final_page_drops_placeholder_and_loads() {
        let mut tree = SourceTree::new();
        let root = tree.add_root(PathBuf::from("/data"), true);

        tree.begin_page_load(root);
        tree.deliver_page(root, vec![entry("/data/a.txt", false)], true);
        tree.begin_page_load(root);
        tree.deliver_page(root, vec![entry("/data/sub", true)], false);

        assert_eq!(tree.load_state(root), Some(LoadState::Loaded));
        assert!(!tree.has_load_more(root));
        let delivered = tree.delivered_children(root);
        assert_eq!(delivered.len(), 2);
        assert_eq!(tree.children(root).len(), 2, "no placeholder may remain");
        assert_eq!(tree.count_children_by_type(root), (1, 1));
        // Order of the first page is untouched by the second delivery.
        assert_eq!(tree.node(delivered[0]).path, PathBuf::from("/data/a.txt"));
    }

    #[test]
    fn test_begin_page_load_swaps_placeholder_to_loading() {
        let mut tree = SourceTree::new();
        let root = tree.add_root(PathBuf::from("/data"), true);
        tree.begin_page_load(root);
        tree.deliver_page(root, vec![entry("/data/a.txt", false)], true);

        assert!(tree.begin_page_load(root));
        let last = *tree.children(root).last().unwrap();
        assert_eq!(
            match tree.node(last).kind {
                NodeKind::Placeholder(kind) => Some(kind),
                _ => None,
            },
            Some(PlaceholderKind::Loading)
        );
    }

    #[test]
    fn test_begin_page_load_rejects_loaded_and_inflight() {
        let mut tree = SourceTree::new();
        let root = tree.add_root(PathBuf::from("/data"), true);
        tree.begin_page_load(root);
        assert!(!tree.begin_page_load(root), "fetch already in flight");
        tree.deliver_page(root, vec![entry("/data/a.txt", false)], false);
        assert!(!tree.begin_page_load(root), "directory fully loaded");
    }

    #[test]
    fn test_mark_subtree_skips_placeholders() {
        let mut tree = SourceTree::new();
        let root = tree.add_root(PathBuf::from("/data"), true);
        tree.begin_page_load(root);
        tree.deliver_page(
            root,
            vec![entry("/data/a.txt", false), entry("/data/sub", true)],
            true,
        );

        tree.mark_subtree(root, Marking::Mapped);
        for id in tree.delivered_children(root) {
            assert_eq!(tree.node(id).marking, Marking::Mapped);
        }
        let placeholder = *tree.children(root).last().unwrap();
        assert_eq!(tree.node(placeholder).marking, Marking::Normal);
    }
}
