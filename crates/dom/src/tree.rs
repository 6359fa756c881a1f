//! Arena storage for documents.
//!
//! Nodes are allocated in document order, and an element's attributes are
//! allocated right after the element itself, so comparing two [`NodeId`]s
//! compares document positions.

use crate::node::XmlNode;

/// Index of a node inside its [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An element or attribute name with its resolved namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
}

impl Name {
    /// A name in no namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Name {
            prefix: None,
            local: local.into(),
            namespace: None,
        }
    }

    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }

    /// True when the name is `local` in namespace `uri`.
    pub fn is(&self, uri: &str, local: &str) -> bool {
        self.namespace.as_deref() == Some(uri) && self.local == local
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Element {
        name: Name,
        /// Namespace declarations made on this element, `(prefix, uri)`.
        namespaces: Vec<(Option<String>, String)>,
    },
    Attribute {
        name: Name,
        value: String,
    },
    Text(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

#[derive(Debug, Clone)]
pub struct NodeData {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub attributes: Vec<NodeId>,
}

/// Deepest element nesting a front end accepts.
pub const MAX_DEPTH: usize = 512;

/// Which front end produced a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Xml,
    Html,
}

/// An immutable document.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<NodeData>,
    kind: DocumentKind,
}

impl Tree {
    pub fn root(&self) -> XmlNode<'_> {
        XmlNode::new(self, NodeId::ROOT)
    }

    pub fn node(&self, id: NodeId) -> XmlNode<'_> {
        XmlNode::new(self, id)
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.index()]
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// The single element child of the root, if there is one.
    pub fn document_element(&self) -> Option<NodeId> {
        self.data(NodeId::ROOT)
            .children
            .iter()
            .copied()
            .find(|&id| matches!(self.data(id).kind, NodeKind::Element { .. }))
    }

    /// Returns a copy without the whitespace-only text nodes whose parent element
    /// `strip` selects. Used for `xsl:strip-space`.
    pub fn strip_whitespace<F>(&self, strip: F) -> Tree
    where
        F: Fn(&Name) -> bool,
    {
        let mut builder = TreeBuilder::new();
        for &child in &self.data(NodeId::ROOT).children {
            self.copy_into(child, &mut builder, &strip);
        }
        builder.finish(self.kind)
    }

    fn copy_into<F>(&self, id: NodeId, builder: &mut TreeBuilder, strip: &F)
    where
        F: Fn(&Name) -> bool,
    {
        let data = self.data(id);
        match &data.kind {
            NodeKind::Element { name, namespaces } => {
                let attributes = data
                    .attributes
                    .iter()
                    .filter_map(|&a| match &self.data(a).kind {
                        NodeKind::Attribute { name, value } => Some((name.clone(), value.clone())),
                        _ => None,
                    })
                    .collect();
                builder.start_element(name.clone(), namespaces.clone(), attributes);
                let strip_here = strip(name);
                for &child in &data.children {
                    if strip_here
                        && matches!(&self.data(child).kind, NodeKind::Text(t) if t.trim().is_empty())
                    {
                        continue;
                    }
                    self.copy_into(child, builder, strip);
                }
                builder.end_element();
            }
            NodeKind::Text(t) => builder.text(t),
            NodeKind::Comment(c) => builder.comment(c),
            NodeKind::ProcessingInstruction { target, data } => {
                builder.processing_instruction(target, data)
            }
            NodeKind::Root | NodeKind::Attribute { .. } => {}
        }
    }
}

/// Builds a [`Tree`] from start/end events, keeping nodes in document order.
#[derive(Debug)]
pub struct TreeBuilder {
    nodes: Vec<NodeData>,
    open: Vec<NodeId>,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
                attributes: Vec::new(),
            }],
            open: vec![NodeId::ROOT],
        }
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.open.len() - 1
    }

    fn current(&self) -> NodeId {
        self.open.last().copied().unwrap_or(NodeId::ROOT)
    }

    fn push(&mut self, kind: NodeKind, parent: NodeId) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            attributes: Vec::new(),
        });
        id
    }

    pub fn start_element(
        &mut self,
        name: Name,
        namespaces: Vec<(Option<String>, String)>,
        attributes: Vec<(Name, String)>,
    ) {
        let parent = self.current();
        let id = self.push(NodeKind::Element { name, namespaces }, parent);
        self.nodes[parent.index()].children.push(id);
        for (name, value) in attributes {
            let attr = self.push(NodeKind::Attribute { name, value }, id);
            self.nodes[id.index()].attributes.push(attr);
        }
        self.open.push(id);
    }

    pub fn end_element(&mut self) {
        if self.open.len() > 1 {
            self.open.pop();
        }
    }

    /// Appends text, merging it into a directly preceding text node.
    pub fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let parent = self.current();
        if let Some(&last) = self.nodes[parent.index()].children.last() {
            if let NodeKind::Text(existing) = &mut self.nodes[last.index()].kind {
                existing.push_str(text);
                return;
            }
        }
        let id = self.push(NodeKind::Text(text.to_string()), parent);
        self.nodes[parent.index()].children.push(id);
    }

    pub fn comment(&mut self, text: &str) {
        let parent = self.current();
        let id = self.push(NodeKind::Comment(text.to_string()), parent);
        self.nodes[parent.index()].children.push(id);
    }

    pub fn processing_instruction(&mut self, target: &str, data: &str) {
        let parent = self.current();
        let id = self.push(
            NodeKind::ProcessingInstruction {
                target: target.to_string(),
                data: data.to_string(),
            },
            parent,
        );
        self.nodes[parent.index()].children.push(id);
    }

    pub fn finish(self, kind: DocumentKind) -> Tree {
        Tree {
            nodes: self.nodes,
            kind,
        }
    }
}
