//! Hierarchical selection with parent to child inheritance.
//!
//! A node is *explicitly* selected when the user toggled it directly, and
//! *inherited* when an ancestor path is explicitly selected. Inherited
//! selections are computed, never stored, and cannot be toggled on their own.
//!
//! The explicit set remembers each entry's path and backend targets, so
//! ancestry checks and bulk calls keep working for nodes on pages that are
//! no longer loaded.

use std::borrow::Cow;
use std::collections::HashSet;

use compact_str::CompactString;
use indexmap::{IndexMap, IndexSet};

use crate::node::{BackendId, DiffNode, NodeKey, NodeTargets};

/// Ensure a path starts with `/`.
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    if path.starts_with('/') {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(format!("/{path}"))
    }
}

/// Whether `candidate` lies strictly below `ancestor`.
///
/// Compares whole path segments: `/Foo/Bar` descends from `/Foo`, but
/// `/FooBar` does not, and no path descends from itself.
pub fn is_descendant(candidate: &str, ancestor: &str) -> bool {
    let candidate = normalize_path(candidate);
    let ancestor = normalize_path(ancestor);

    if candidate == ancestor {
        return false;
    }

    if ancestor.ends_with('/') {
        candidate.starts_with(ancestor.as_ref())
    } else {
        candidate
            .strip_prefix(ancestor.as_ref())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// What the selection retains about an explicitly selected node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedEntry {
    pub path: CompactString,
    /// `None` when the node was malformed at selection time.
    pub targets: Option<NodeTargets>,
}

impl SelectedEntry {
    pub fn from_node(node: &DiffNode) -> Self {
        Self {
            path: node.location_path.clone(),
            targets: node.targets().ok(),
        }
    }
}

/// Selection state of a single visible node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selected {
    No,
    Explicit,
    Inherited,
}

impl Selected {
    pub fn is_selected(self) -> bool {
        self != Self::No
    }
}

/// Transition applied to a [`Selection`].
#[derive(Debug, Clone)]
pub enum SelectionAction {
    /// Toggle one node; `index` is its position on the visible page.
    Toggle { node: DiffNode, index: Option<usize> },
    /// Select the visible range between the last toggled index and `to`.
    ExtendTo { visible: Vec<DiffNode>, to: usize },
    /// Select every visible node, or deselect them all when all are selected.
    TogglePage { visible: Vec<DiffNode> },
    /// Replace the selection with the default for a freshly loaded page:
    /// nodes present on the source only.
    SeedDefaults { visible: Vec<DiffNode> },
    /// Refresh stored paths and targets for selected nodes on a loaded page.
    Refresh { visible: Vec<DiffNode> },
    Clear,
    /// The migration moved to another phase.
    PhaseAdvanced,
}

/// Explicit selection set, keyed by node id in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    explicit: IndexMap<NodeKey, SelectedEntry>,
    anchor: Option<usize>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a transition to the latest state.
    ///
    /// Returns `false` when the action was ignored (e.g. toggling a node
    /// whose selection is inherited).
    pub fn apply(&mut self, action: SelectionAction) -> bool {
        match action {
            SelectionAction::Toggle { node, index } => {
                if self.explicit.shift_remove(&node.id).is_none() {
                    if self.is_inherited_path(&node.location_path) {
                        return false;
                    }
                    self.explicit
                        .insert(node.id.clone(), SelectedEntry::from_node(&node));
                }
                self.anchor = index;
                true
            }
            SelectionAction::ExtendTo { visible, to } => {
                let Some(anchor) = self.anchor else {
                    return false;
                };
                let start = anchor.min(to);
                let end = anchor.max(to).min(visible.len().saturating_sub(1));
                for node in visible.iter().take(end + 1).skip(start) {
                    self.explicit
                        .insert(node.id.clone(), SelectedEntry::from_node(node));
                }
                true
            }
            SelectionAction::TogglePage { visible } => {
                let all_selected =
                    !visible.is_empty() && visible.iter().all(|n| self.explicit.contains_key(&n.id));
                if all_selected {
                    for node in &visible {
                        self.explicit.shift_remove(&node.id);
                    }
                    self.anchor = None;
                } else {
                    for node in &visible {
                        self.explicit
                            .insert(node.id.clone(), SelectedEntry::from_node(node));
                    }
                    self.anchor = visible.len().checked_sub(1);
                }
                true
            }
            SelectionAction::SeedDefaults { visible } => {
                self.explicit = visible
                    .iter()
                    .filter(|n| n.in_src && !n.in_dst)
                    .map(|n| (n.id.clone(), SelectedEntry::from_node(n)))
                    .collect();
                self.anchor = None;
                true
            }
            SelectionAction::Refresh { visible } => {
                for node in &visible {
                    if let Some(entry) = self.explicit.get_mut(&node.id) {
                        *entry = SelectedEntry::from_node(node);
                    }
                }
                true
            }
            SelectionAction::Clear | SelectionAction::PhaseAdvanced => {
                self.explicit.clear();
                self.anchor = None;
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.explicit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty()
    }

    pub fn contains(&self, id: &NodeKey) -> bool {
        self.explicit.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeKey> {
        self.explicit.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&NodeKey, &SelectedEntry)> {
        self.explicit.iter()
    }

    /// Whether `path` descends from any explicitly selected path.
    pub fn is_inherited_path(&self, path: &str) -> bool {
        self.explicit
            .values()
            .any(|entry| is_descendant(path, &entry.path))
    }

    /// Selection state of one visible node.
    pub fn state_of(&self, node: &DiffNode) -> Selected {
        if self.explicit.contains_key(&node.id) {
            Selected::Explicit
        } else if self.is_inherited_path(&node.location_path) {
            Selected::Inherited
        } else {
            Selected::No
        }
    }

    /// Ids of visible nodes selected only through an explicitly selected ancestor.
    pub fn inherited<'a>(&self, visible: impl IntoIterator<Item = &'a DiffNode>) -> HashSet<NodeKey> {
        visible
            .into_iter()
            .filter(|node| self.state_of(node) == Selected::Inherited)
            .map(|node| node.id.clone())
            .collect()
    }

    /// Explicit plus inherited count over the visible nodes.
    pub fn selected_count<'a>(&self, visible: impl IntoIterator<Item = &'a DiffNode>) -> usize {
        let visible: Vec<&DiffNode> = visible.into_iter().collect();
        self.explicit.len() + self.inherited(visible.iter().copied()).len()
    }

    /// The minimal ancestor-only form: every explicit entry whose path
    /// descends from another explicit entry is dropped.
    pub fn normalized(&self) -> Selection {
        let explicit = self
            .explicit
            .iter()
            .filter(|(id, entry)| {
                !self
                    .explicit
                    .iter()
                    .any(|(other, o)| other != *id && is_descendant(&entry.path, &o.path))
            })
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();

        Selection {
            explicit,
            anchor: None,
        }
    }

    /// Node ids of the normalized selection.
    pub fn normalized_ids(&self) -> IndexSet<NodeKey> {
        self.normalized().explicit.into_keys().collect()
    }

    /// Backend ids for a bulk call over the normalized selection, plus the
    /// ids of entries that carry no backend id.
    pub fn bulk_targets(&self) -> (Vec<BackendId>, Vec<NodeKey>) {
        let mut ids = IndexSet::new();
        let mut malformed = Vec::new();

        for (key, entry) in self.normalized().explicit {
            match entry.targets {
                Some(targets) => ids.extend(targets.ids().cloned()),
                None => malformed.push(key),
            }
        }

        (ids.into_iter().collect(), malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeSide, NodeType};

    fn folder(id: &str, path: &str) -> DiffNode {
        DiffNode::new_src_only(id, path, NodeType::Folder, NodeSide::new(format!("s-{id}")))
    }

    #[test]
    fn test_is_descendant_segments() {
        assert!(is_descendant("/Foo/Bar", "/Foo"));
        assert!(is_descendant("Foo/Bar", "/Foo"));
        assert!(is_descendant("/Foo/Bar", "/Foo/"));
        assert!(!is_descendant("/FooBar", "/Foo"));
        assert!(!is_descendant("/Foo", "/Foo"));
        assert!(!is_descendant("/Foo", "/Foo/Bar"));
        assert!(is_descendant("/anything", "/"));
    }

    #[test]
    fn test_toggle_and_inherit() {
        let mut sel = Selection::new();
        sel.apply(SelectionAction::Toggle {
            node: folder("a", "/Foo"),
            index: Some(0),
        });

        let bar = folder("b", "/Foo/Bar");
        assert_eq!(sel.state_of(&bar), Selected::Inherited);

        // Inherited nodes cannot be toggled on their own.
        assert!(!sel.apply(SelectionAction::Toggle {
            node: bar.clone(),
            index: Some(1)
        }));
        assert!(!sel.contains(&bar.id));

        // Untoggling the ancestor removes the inheritance.
        sel.apply(SelectionAction::Toggle {
            node: folder("a", "/Foo"),
            index: Some(0),
        });
        assert_eq!(sel.state_of(&bar), Selected::No);
    }

    #[test]
    fn test_extend_range_uses_anchor() {
        let visible: Vec<DiffNode> = (0..5)
            .map(|i| folder(&format!("n{i}"), &format!("/d{i}")))
            .collect();
        let mut sel = Selection::new();
        sel.apply(SelectionAction::Toggle {
            node: visible[1].clone(),
            index: Some(1),
        });
        sel.apply(SelectionAction::ExtendTo {
            visible: visible.clone(),
            to: 3,
        });
        assert_eq!(sel.len(), 3);
        assert!(!sel.contains(&visible[0].id));
        assert!(!sel.contains(&visible[4].id));
    }

    #[test]
    fn test_toggle_page_round_trip() {
        let visible = vec![folder("a", "/a"), folder("b", "/b")];
        let mut sel = Selection::new();
        sel.apply(SelectionAction::TogglePage {
            visible: visible.clone(),
        });
        assert_eq!(sel.len(), 2);
        sel.apply(SelectionAction::TogglePage { visible });
        assert!(sel.is_empty());
    }

    #[test]
    fn test_normalize_drops_descendants() {
        let mut sel = Selection::new();
        for node in [folder("a", "/Foo"), folder("c", "/FooBar")] {
            sel.apply(SelectionAction::Toggle { node, index: None });
        }
        // Select a descendant through the page gesture, which bypasses the
        // inheritance guard the same way a range selection does.
        sel.apply(SelectionAction::TogglePage {
            visible: vec![folder("b", "/Foo/Bar")],
        });
        assert_eq!(sel.len(), 3);

        let ids = sel.normalized_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&NodeKey::new("a")));
        assert!(ids.contains(&NodeKey::new("c")));
    }

    #[test]
    fn test_bulk_targets_cover_both_sides() {
        let node = DiffNode::new_on_both(
            "x",
            "/x",
            NodeType::File,
            NodeSide::new("s-x"),
            NodeSide::new("d-x"),
        );
        let mut sel = Selection::new();
        sel.apply(SelectionAction::Toggle { node, index: None });
        let (ids, malformed) = sel.bulk_targets();
        assert_eq!(ids, vec![BackendId::new("s-x"), BackendId::new("d-x")]);
        assert!(malformed.is_empty());
    }
}
