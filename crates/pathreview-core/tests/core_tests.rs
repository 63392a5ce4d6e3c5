use pathreview_core::{
    CopyStatus, DiffNode, MigrationPhase, NodeKey, NodeSide, NodeType, Selected, Selection,
    SelectionAction, StatusCategory, TraversalStatus, is_descendant, resolve,
};

const PATHS: [&str; 9] = [
    "/", "/Foo", "Foo", "/Foo/", "/Foo/Bar", "/Foo/Bar/Baz", "/FooBar", "/FooBar/x", "/Bar",
];

fn folder(id: &str, path: &str) -> DiffNode {
    DiffNode::new_src_only(id, path, NodeType::Folder, NodeSide::new(format!("src-{id}")))
}

fn file(id: &str, path: &str) -> DiffNode {
    DiffNode::new_src_only(id, path, NodeType::File, NodeSide::new(format!("src-{id}")))
}

fn toggle(selection: &mut Selection, node: DiffNode) -> bool {
    selection.apply(SelectionAction::Toggle { node, index: None })
}

fn normalized_form(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[test]
fn test_is_descendant_matches_segment_prefix() {
    for a in PATHS {
        for b in PATHS {
            let a_norm = normalized_form(a);
            let b_norm = normalized_form(b);
            let prefix = if b_norm.ends_with('/') {
                b_norm.clone()
            } else {
                format!("{b_norm}/")
            };
            let expected = a_norm != b_norm && a_norm.starts_with(&prefix);
            assert_eq!(is_descendant(a, b), expected, "is_descendant({a:?}, {b:?})");
        }
    }
}

#[test]
fn test_descendant_examples() {
    assert!(is_descendant("/Foo/Bar", "/Foo"));
    assert!(!is_descendant("/FooBar", "/Foo"));
}

#[test]
fn test_normalize_is_idempotent_and_minimal() {
    let sets: Vec<Vec<(&str, &str)>> = vec![
        vec![("a", "/Foo/Bar/Baz"), ("b", "/Foo/Bar"), ("c", "/Foo")],
        vec![("a", "/Foo/Bar"), ("b", "/FooBar"), ("c", "/Bar")],
        vec![("a", "/x/y"), ("b", "/x/z"), ("c", "/x")],
        vec![],
    ];

    for set in sets {
        let mut selection = Selection::new();
        // Descendants first: an ancestor selected earlier would make them inherited.
        for (id, path) in &set {
            assert!(toggle(&mut selection, folder(id, path)));
        }

        let once = selection.normalized();
        let twice = once.normalized();
        assert_eq!(once, twice);

        let entries: Vec<_> = once.entries().collect();
        for (id, entry) in &entries {
            for (other, other_entry) in &entries {
                if id != other {
                    assert!(
                        !is_descendant(&entry.path, &other_entry.path),
                        "{} descends from {}",
                        entry.path,
                        other_entry.path
                    );
                }
            }
        }
    }
}

#[test]
fn test_normalize_collapses_nested_chain() {
    let mut selection = Selection::new();
    toggle(&mut selection, folder("baz", "/Foo/Bar/Baz"));
    toggle(&mut selection, folder("bar", "/Foo/Bar"));
    toggle(&mut selection, folder("foo", "/Foo"));
    toggle(&mut selection, folder("foobar", "/FooBar"));

    let ids = selection.normalized_ids();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&NodeKey::new("foo")));
    assert!(ids.contains(&NodeKey::new("foobar")));

    let (backend_ids, malformed) = selection.bulk_targets();
    assert_eq!(backend_ids.len(), 2);
    assert!(malformed.is_empty());
}

#[test]
fn test_inherited_scenario() {
    let mut selection = Selection::new();
    toggle(&mut selection, folder("foo", "/Foo"));

    let bar = folder("bar", "/Foo/Bar");
    let baz = file("baz", "/Foo/Bar/Baz");
    let other = file("other", "/FooBar/readme.md");
    let visible = [bar.clone(), baz.clone(), other.clone()];

    let inherited = selection.inherited(visible.iter());
    assert_eq!(inherited.len(), 2);
    assert!(inherited.contains(&bar.id));
    assert!(inherited.contains(&baz.id));
    assert_eq!(selection.state_of(&other), Selected::No);

    assert!(!toggle(&mut selection, bar.clone()));
    assert!(!toggle(&mut selection, baz.clone()));
    assert_eq!(selection.len(), 1);
    assert_eq!(selection.selected_count(visible.iter()), 3);

    // Removing the ancestor removes the inheritance.
    assert!(toggle(&mut selection, folder("foo", "/Foo")));
    assert!(selection.inherited(visible.iter()).is_empty());
}

#[test]
fn test_inheritance_survives_pagination() {
    let mut selection = Selection::new();
    toggle(&mut selection, folder("foo", "/Foo"));

    // The ancestor is no longer on the visible page.
    let page_two = [file("deep", "/Foo/a/b/c.txt")];
    assert_eq!(selection.inherited(page_two.iter()).len(), 1);
}

#[test]
fn test_default_selection_scenario() {
    let a = DiffNode::new_src_only("a", "/X", NodeType::Folder, NodeSide::new("sa"));
    let b = DiffNode::new_on_both(
        "b",
        "/Y",
        NodeType::File,
        NodeSide::new("sb"),
        NodeSide::new("db"),
    );
    let c = DiffNode::new_dst_only("c", "/Z", NodeType::File, NodeSide::new("dc"));

    let mut selection = Selection::new();
    selection.apply(SelectionAction::SeedDefaults {
        visible: vec![a, b, c],
    });

    assert!(selection.contains(&NodeKey::new("a")));
    assert!(!selection.contains(&NodeKey::new("b")));
    assert!(!selection.contains(&NodeKey::new("c")));
}

#[test]
fn test_phase_advance_clears_selection() {
    let mut selection = Selection::new();
    toggle(&mut selection, folder("a", "/a"));
    selection.apply(SelectionAction::PhaseAdvanced);
    assert!(selection.is_empty());
}

const TRAVERSAL_STATUSES: [TraversalStatus; 7] = [
    TraversalStatus::Pending,
    TraversalStatus::Successful,
    TraversalStatus::Failed,
    TraversalStatus::NotOnSrc,
    TraversalStatus::ExclusionExplicit,
    TraversalStatus::ExclusionInherited,
    TraversalStatus::Unknown,
];

const COPY_STATUSES: [CopyStatus; 5] = [
    CopyStatus::Pending,
    CopyStatus::ExclusionExplicit,
    CopyStatus::ExclusionInherited,
    CopyStatus::Successful,
    CopyStatus::Failed,
];

fn every_node() -> Vec<DiffNode> {
    let mut nodes = Vec::new();
    for node_type in [NodeType::File, NodeType::Folder] {
        for traversal in TRAVERSAL_STATUSES {
            for copy in COPY_STATUSES {
                for retry_marked in [false, true] {
                    let side = NodeSide::new("s").with_traversal(traversal).with_copy(copy);
                    let other = NodeSide::new("d").with_traversal(traversal).with_copy(copy);

                    let mut variants = vec![
                        DiffNode::new_src_only("n", "/p", node_type, side.clone()),
                        DiffNode::new_on_both("n", "/p", node_type, side, other.clone()),
                        DiffNode::new_dst_only("n", "/p", node_type, other),
                    ];
                    for node in &mut variants {
                        node.retry_marked = retry_marked;
                    }
                    nodes.extend(variants);
                }
            }
        }
    }
    nodes
}

#[test]
fn test_resolution_is_closed_per_phase() {
    use strum::IntoEnumIterator;

    let nodes = every_node();
    for phase in MigrationPhase::iter() {
        let allowed: &[StatusCategory] = if phase.is_copy_scoped() {
            &StatusCategory::COPY
        } else {
            &StatusCategory::TRAVERSAL
        };
        for node in &nodes {
            let resolution = resolve(node, phase);
            assert!(
                allowed.contains(&resolution.category),
                "{:?} in {phase} resolved to {}",
                node,
                resolution.category
            );
            assert_eq!(resolution.interactive, resolution.action.is_some());
            if !phase.is_review() || node.is_locked() || node.is_dst_only() {
                assert!(!resolution.interactive);
            }
        }
    }
}

#[test]
fn test_failure_always_dominates_exclusion() {
    for copy in [CopyStatus::ExclusionExplicit, CopyStatus::ExclusionInherited] {
        let node = DiffNode::new_src_only(
            "n",
            "/p",
            NodeType::File,
            NodeSide::new("s")
                .with_traversal(TraversalStatus::Failed)
                .with_copy(copy),
        );
        assert_eq!(
            resolve(&node, MigrationPhase::TraversalReview).category,
            StatusCategory::Failed
        );
    }
}

#[test]
fn test_locked_folders_never_excluded() {
    for node in every_node().iter().filter(|n| n.is_locked()) {
        for phase in [MigrationPhase::TraversalReview, MigrationPhase::CopyReview] {
            assert_ne!(resolve(node, phase).category, StatusCategory::Excluded);
        }
    }
}
