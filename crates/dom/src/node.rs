//! `XmlNode`, a cheap copyable handle into a [`Tree`] that the XPath engine navigates.

use crate::tree::{NodeId, NodeKind, Tree};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use xform_xpath1::{DataSourceNode, NodeType, QName};

#[derive(Clone, Copy)]
pub struct XmlNode<'a> {
    tree: &'a Tree,
    id: NodeId,
}

impl<'a> XmlNode<'a> {
    pub(crate) fn new(tree: &'a Tree, id: NodeId) -> Self {
        Self { tree, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'a Tree {
        self.tree
    }

    pub fn kind(&self) -> &'a NodeKind {
        &self.tree.data(self.id).kind
    }

    fn tree_addr(&self) -> usize {
        self.tree as *const Tree as usize
    }

    fn collect_text(&self, out: &mut String) {
        for child in self.children() {
            match child.kind() {
                NodeKind::Text(t) => out.push_str(t),
                NodeKind::Element { .. } => child.collect_text(out),
                _ => {}
            }
        }
    }
}

impl fmt::Debug for XmlNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            NodeKind::Root => write!(f, "Root"),
            NodeKind::Element { name, .. } => write!(f, "Element({}#{})", name.qualified(), self.id.index()),
            NodeKind::Attribute { name, value } => write!(f, "Attribute({}={:?})", name.qualified(), value),
            NodeKind::Text(t) => write!(f, "Text({:?})", t),
            NodeKind::Comment(c) => write!(f, "Comment({:?})", c),
            NodeKind::ProcessingInstruction { target, .. } => write!(f, "PI({})", target),
        }
    }
}

impl PartialEq for XmlNode<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

impl Eq for XmlNode<'_> {}

impl PartialOrd for XmlNode<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for XmlNode<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Nodes of different trees have no defined order; keep them grouped per tree.
        self.tree_addr()
            .cmp(&other.tree_addr())
            .then(self.id.cmp(&other.id))
    }
}

impl Hash for XmlNode<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<'a> DataSourceNode<'a> for XmlNode<'a> {
    fn node_type(&self) -> NodeType {
        match self.kind() {
            NodeKind::Root => NodeType::Root,
            NodeKind::Element { .. } => NodeType::Element,
            NodeKind::Attribute { .. } => NodeType::Attribute,
            NodeKind::Text(_) => NodeType::Text,
            NodeKind::Comment(_) => NodeType::Comment,
            NodeKind::ProcessingInstruction { .. } => NodeType::ProcessingInstruction,
        }
    }

    fn name(&self) -> Option<QName<'a>> {
        match self.kind() {
            NodeKind::Element { name, .. } | NodeKind::Attribute { name, .. } => Some(QName {
                prefix: name.prefix.as_deref(),
                local_part: &name.local,
            }),
            NodeKind::ProcessingInstruction { target, .. } => Some(QName {
                prefix: None,
                local_part: target,
            }),
            _ => None,
        }
    }

    fn namespace_uri(&self) -> Option<&'a str> {
        match self.kind() {
            NodeKind::Element { name, .. } | NodeKind::Attribute { name, .. } => {
                name.namespace.as_deref()
            }
            _ => None,
        }
    }

    fn namespace_declarations(&self) -> Vec<(Option<&'a str>, &'a str)> {
        match self.kind() {
            NodeKind::Element { namespaces, .. } => namespaces
                .iter()
                .map(|(prefix, uri)| (prefix.as_deref(), uri.as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn string_value(&self) -> String {
        match self.kind() {
            NodeKind::Root | NodeKind::Element { .. } => {
                let mut out = String::new();
                self.collect_text(&mut out);
                out
            }
            NodeKind::Attribute { value, .. } => value.clone(),
            NodeKind::Text(t) | NodeKind::Comment(t) => t.clone(),
            NodeKind::ProcessingInstruction { data, .. } => data.clone(),
        }
    }

    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        let tree = self.tree;
        Box::new(
            tree.data(self.id)
                .attributes
                .iter()
                .map(move |&id| XmlNode { tree, id }),
        )
    }

    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        let tree = self.tree;
        Box::new(
            tree.data(self.id)
                .children
                .iter()
                .map(move |&id| XmlNode { tree, id }),
        )
    }

    fn parent(&self) -> Option<Self> {
        self.tree.data(self.id).parent.map(|id| XmlNode {
            tree: self.tree,
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::xml::parse_xml;
    use std::collections::HashMap;
    use xform_xpath1::{
        DataSourceNode, EvaluationContext, FunctionRegistry, XPathValue, evaluate,
        parse_expression,
    };

    #[test]
    fn test_xpath_over_parsed_document() {
        let tree = parse_xml("<cds><cd a='1'>x</cd><cd a='2'>y</cd></cds>").unwrap();
        let vars: HashMap<String, XPathValue<_>> = HashMap::new();
        let ns = HashMap::new();
        let keys = HashMap::new();
        let ctx = EvaluationContext::new(
            tree.root(),
            tree.root(),
            FunctionRegistry::global(),
            &vars,
            &ns,
            &keys,
        );
        let expr = parse_expression("//cd[@a = 2]").unwrap();
        let nodes = evaluate(&expr, &ctx).unwrap().into_nodes("test").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].string_value(), "y");
    }

    #[test]
    fn test_attributes_sort_between_owner_and_children() {
        let tree = parse_xml("<a k='v'><b/></a>").unwrap();
        let a = tree.node(tree.document_element().unwrap());
        let attr = a.attributes().next().unwrap();
        let b = a.children().next().unwrap();
        assert!(a < attr && attr < b);
        assert_eq!(attr.parent(), Some(a));
    }
}
