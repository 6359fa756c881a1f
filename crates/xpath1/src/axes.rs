//! Contains pure functions for collecting nodes along each XPath axis.
//!
//! Every collector appends in axis order: document order for forward axes and
//! reverse document order for the reverse ones.

use crate::ast::Axis;
use crate::datasource::{DataSourceNode, NodeType};

/// Collects the nodes reachable from `node` along `axis`.
pub fn collect<'a, N: DataSourceNode<'a>>(axis: Axis, node: N) -> Vec<N> {
    let mut results = Vec::new();
    match axis {
        Axis::Child => collect_child_nodes(node, &mut results),
        Axis::Attribute => collect_attribute_nodes(node, &mut results),
        Axis::Descendant => collect_descendant_nodes(node, &mut results),
        Axis::DescendantOrSelf => collect_descendant_or_self_nodes(node, &mut results),
        Axis::Parent => collect_parent_nodes(node, &mut results),
        Axis::Ancestor => collect_ancestor_nodes(node, &mut results),
        Axis::AncestorOrSelf => {
            results.push(node);
            collect_ancestor_nodes(node, &mut results);
        }
        Axis::SelfAxis => results.push(node),
        Axis::FollowingSibling => collect_following_sibling_nodes(node, &mut results),
        Axis::PrecedingSibling => collect_preceding_sibling_nodes(node, &mut results),
        Axis::Following => collect_following_nodes(node, &mut results),
        Axis::Preceding => collect_preceding_nodes(node, &mut results),
        Axis::Namespace => {}
    }
    results
}

pub fn collect_child_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    results.extend(node.children());
}

pub fn collect_attribute_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    results.extend(node.attributes());
}

pub fn collect_descendant_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    let mut stack: Vec<N> = node.children().collect();
    stack.reverse();
    while let Some(current) = stack.pop() {
        results.push(current);
        let start = stack.len();
        stack.extend(current.children());
        stack[start..].reverse();
    }
}

pub fn collect_descendant_or_self_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    results.push(node);
    collect_descendant_nodes(node, results);
}

pub fn collect_parent_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    if let Some(parent) = node.parent() {
        results.push(parent);
    }
}

pub fn collect_ancestor_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    let mut current = node.parent();
    while let Some(p) = current {
        results.push(p);
        current = p.parent();
    }
}

fn is_attribute<'a, N: DataSourceNode<'a>>(node: N) -> bool {
    node.node_type() == NodeType::Attribute
}

pub fn collect_following_sibling_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    if is_attribute(node) {
        return;
    }
    if let Some(parent) = node.parent() {
        results.extend(parent.children().skip_while(|s| *s != node).skip(1));
    }
}

pub fn collect_preceding_sibling_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    if is_attribute(node) {
        return;
    }
    if let Some(parent) = node.parent() {
        let siblings: Vec<N> = parent.children().take_while(|s| *s != node).collect();
        results.extend(siblings.into_iter().rev());
    }
}

pub fn collect_following_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    let mut current = node;
    if is_attribute(node) {
        // Everything after an attribute starts with its owner's content.
        match node.parent() {
            Some(owner) => {
                collect_descendant_nodes(owner, results);
                current = owner;
            }
            None => return,
        }
    }
    while let Some(parent) = current.parent() {
        for sibling in parent.children().skip_while(|s| *s != current).skip(1) {
            collect_descendant_or_self_nodes(sibling, results);
        }
        current = parent;
    }
}

pub fn collect_preceding_nodes<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    let mut chain = vec![node];
    let mut current = node;
    while let Some(parent) = current.parent() {
        chain.push(parent);
        current = parent;
    }
    // Walk from the root down so the nodes are gathered in document order.
    let mut in_order = Vec::new();
    for pair in chain.windows(2).rev() {
        let (child, parent) = (pair[0], pair[1]);
        if is_attribute(child) {
            continue;
        }
        for sibling in parent.children().take_while(|s| *s != child) {
            collect_descendant_or_self_nodes(sibling, &mut in_order);
        }
    }
    results.extend(in_order.into_iter().rev());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::create_test_tree;

    fn ids<'a, N: DataSourceNode<'a>>(nodes: &[N], tree_id: impl Fn(&N) -> usize) -> Vec<usize> {
        nodes.iter().map(tree_id).collect()
    }

    #[test]
    fn test_descendants_are_in_document_order() {
        let tree = create_test_tree();
        let nodes = collect(Axis::Descendant, tree.node(1));
        assert_eq!(ids(&nodes, |n| n.id), vec![3, 5, 6, 7, 8, 9, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn test_reverse_axes_are_nearest_first() {
        let tree = create_test_tree();
        let ancestors = collect(Axis::Ancestor, tree.node(12));
        assert_eq!(ids(&ancestors, |n| n.id), vec![11, 9, 1, 0]);

        let preceding_siblings = collect(Axis::PrecedingSibling, tree.node(13));
        assert_eq!(ids(&preceding_siblings, |n| n.id), vec![11]);

        let preceding = collect(Axis::Preceding, tree.node(11));
        assert_eq!(ids(&preceding, |n| n.id), vec![8, 7, 6, 5, 3]);
    }

    #[test]
    fn test_following_skips_descendants_of_self() {
        let tree = create_test_tree();
        let following = collect(Axis::Following, tree.node(3));
        assert_eq!(ids(&following, |n| n.id), vec![9, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn test_attribute_has_no_siblings() {
        let tree = create_test_tree();
        assert!(collect(Axis::FollowingSibling, tree.node(4)).is_empty());
        assert_eq!(collect(Axis::Parent, tree.node(4)), vec![tree.node(3)]);
        let following = collect(Axis::Following, tree.node(4));
        assert_eq!(following.first(), Some(&tree.node(5)));
    }
}
