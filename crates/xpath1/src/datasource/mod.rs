//! Defines the core abstraction for a navigable, read-only document tree.
use std::hash::Hash;

/// A qualified name, consisting of an optional prefix and a local part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QName<'a> {
    pub prefix: Option<&'a str>,
    pub local_part: &'a str,
}

impl QName<'_> {
    /// The name as written in the source, `prefix:local` or `local`.
    pub fn qualified(&self) -> String {
        match self.prefix {
            Some(p) => format!("{}:{}", p, self.local_part),
            None => self.local_part.to_string(),
        }
    }
}

/// The type of a node in the tree, aligned with the XPath 1.0 data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

/// The contract for a node in a read-only, hierarchical document.
///
/// The XPath engine and the XSLT executor are written exclusively against this
/// trait. `Ord` must follow document order, with an element's attributes ordered
/// after the element and before its children.
///
/// `'a` is the lifetime of the underlying tree.
pub trait DataSourceNode<'a>:
    std::fmt::Debug + Clone + Copy + PartialEq + Eq + Hash + PartialOrd + Ord
{
    /// The type of the node (Element, Text, Attribute, etc.).
    fn node_type(&self) -> NodeType;

    /// The qualified name of the node. Returns `None` for node types that do not
    /// have names, such as text or root nodes. For a processing instruction this is
    /// its target.
    fn name(&self) -> Option<QName<'a>>;

    /// The namespace URI of an element or attribute name, if it has one.
    fn namespace_uri(&self) -> Option<&'a str> {
        None
    }

    /// The namespace declarations made on this element, as `(prefix, uri)` pairs.
    /// A `None` prefix is the default namespace.
    fn namespace_declarations(&self) -> Vec<(Option<&'a str>, &'a str)> {
        Vec::new()
    }

    /// The string value of the node, as defined by the XPath 1.0 `string()` function.
    /// - For a text node, this is its content.
    /// - For an element or the root, the concatenation of all descendant text nodes.
    /// - For an attribute, this is its value.
    /// - For a comment or processing instruction, this is its content.
    fn string_value(&self) -> String;

    /// An iterator over the attribute nodes of this node.
    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// An iterator over the child nodes of this node, in document order.
    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// The parent node. An attribute's parent is its owner element.
    fn parent(&self) -> Option<Self>;
}

// Test utilities, public so downstream crates can drive the engine without a parser.
pub mod tests {
    use super::*;
    use std::cmp::Ordering;
    use std::hash::Hasher;

    #[derive(Debug, Clone)]
    struct MockNodeData {
        node_type: NodeType,
        name: Option<&'static str>,
        value: &'static str,
        parent: Option<usize>,
        children: Vec<usize>,
        attributes: Vec<usize>,
    }

    /// An arena of nodes whose ids are allocated in document order.
    #[derive(Debug, Default)]
    pub struct MockTree {
        nodes: Vec<MockNodeData>,
    }

    impl MockTree {
        pub fn new() -> Self {
            let mut tree = Self::default();
            tree.nodes.push(MockNodeData {
                node_type: NodeType::Root,
                name: None,
                value: "",
                parent: None,
                children: vec![],
                attributes: vec![],
            });
            tree
        }

        fn push(
            &mut self,
            parent: usize,
            node_type: NodeType,
            name: Option<&'static str>,
            value: &'static str,
        ) -> usize {
            let id = self.nodes.len();
            self.nodes.push(MockNodeData {
                node_type,
                name,
                value,
                parent: Some(parent),
                children: vec![],
                attributes: vec![],
            });
            if node_type == NodeType::Attribute {
                self.nodes[parent].attributes.push(id);
            } else {
                self.nodes[parent].children.push(id);
            }
            id
        }

        pub fn element(&mut self, parent: usize, name: &'static str) -> usize {
            self.push(parent, NodeType::Element, Some(name), "")
        }

        pub fn attribute(&mut self, parent: usize, name: &'static str, value: &'static str) -> usize {
            self.push(parent, NodeType::Attribute, Some(name), value)
        }

        pub fn text(&mut self, parent: usize, value: &'static str) -> usize {
            self.push(parent, NodeType::Text, None, value)
        }

        pub fn comment(&mut self, parent: usize, value: &'static str) -> usize {
            self.push(parent, NodeType::Comment, None, value)
        }

        pub fn node(&self, id: usize) -> MockNode<'_> {
            MockNode { id, tree: self }
        }
    }

    /// A node handle that borrows its tree so it can navigate.
    #[derive(Debug, Clone, Copy)]
    pub struct MockNode<'a> {
        pub id: usize,
        pub tree: &'a MockTree,
    }

    impl PartialEq for MockNode<'_> {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }
    impl Eq for MockNode<'_> {}

    impl PartialOrd for MockNode<'_> {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for MockNode<'_> {
        fn cmp(&self, other: &Self) -> Ordering {
            self.id.cmp(&other.id)
        }
    }

    impl Hash for MockNode<'_> {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.id.hash(state);
        }
    }

    impl<'a> DataSourceNode<'a> for MockNode<'a> {
        fn node_type(&self) -> NodeType {
            self.tree.nodes[self.id].node_type
        }

        fn name(&self) -> Option<QName<'a>> {
            self.tree.nodes[self.id].name.map(|n| QName {
                prefix: None,
                local_part: n,
            })
        }

        fn string_value(&self) -> String {
            let data = &self.tree.nodes[self.id];
            match data.node_type {
                NodeType::Root | NodeType::Element => {
                    let mut out = String::new();
                    for child in self.children() {
                        if matches!(child.node_type(), NodeType::Element | NodeType::Text) {
                            out.push_str(&child.string_value());
                        }
                    }
                    out
                }
                _ => data.value.to_string(),
            }
        }

        fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
            let tree = self.tree;
            Box::new(
                tree.nodes[self.id]
                    .attributes
                    .iter()
                    .map(move |&id| MockNode { id, tree }),
            )
        }

        fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
            let tree = self.tree;
            Box::new(
                tree.nodes[self.id]
                    .children
                    .iter()
                    .map(move |&id| MockNode { id, tree }),
            )
        }

        fn parent(&self) -> Option<Self> {
            self.tree.nodes[self.id].parent.map(|id| MockNode {
                id,
                tree: self.tree,
            })
        }
    }

    /// Builds a small catalog:
    ///
    /// ```text
    /// 0  /
    /// 1  <catalog genre="rock">           2  @genre
    /// 3    <cd id="c1">                   4  @id
    /// 5      <title>Empire Burlesque      6  text
    /// 7      <price>10.90                 8  text
    /// 9    <cd id="c2">                   10 @id
    /// 11     <title>Hide your heart       12 text
    /// 13     <price>9.90                  14 text
    /// 15   <!-- end -->
    /// ```
    pub fn create_test_tree() -> MockTree {
        let mut t = MockTree::new();
        let catalog = t.element(0, "catalog");
        t.attribute(catalog, "genre", "rock");
        for (id, title, price) in [
            ("c1", "Empire Burlesque", "10.90"),
            ("c2", "Hide your heart", "9.90"),
        ] {
            let cd = t.element(catalog, "cd");
            t.attribute(cd, "id", id);
            let title_el = t.element(cd, "title");
            t.text(title_el, title);
            let price_el = t.element(cd, "price");
            t.text(price_el, price);
        }
        t.comment(catalog, " end ");
        t
    }

    #[test]
    fn test_mock_tree_ids_follow_document_order() {
        let tree = create_test_tree();
        let cd = tree.node(3);
        assert_eq!(cd.name().map(|q| q.local_part), Some("cd"));
        assert_eq!(cd.attributes().next(), Some(tree.node(4)));
        assert_eq!(cd.string_value(), "Empire Burlesque10.90");
        assert_eq!(tree.node(15).node_type(), NodeType::Comment);
        assert_eq!(tree.node(14).parent(), Some(tree.node(13)));
    }
}
