//! Owned handles for parsed documents and compiled stylesheets.
//!
//! Handles are deliberately not `Clone`: each one is owned by whoever loaded it.
//! The engine state behind a handle is immutable and reference counted, so a
//! non-blocking operation can keep reading it on a worker after the call that
//! started it has returned.

use std::fmt;
use std::sync::Arc;
use xform_dom::{DocumentKind, NodeKind, Tree};
use xform_xslt::{OutputMethod, XsltTemplate};

/// A well-formed XML document.
pub struct XmlDocument {
    tree: Arc<Tree>,
}

/// An HTML document, repaired by the lenient HTML parser.
pub struct HtmlDocument {
    tree: Arc<Tree>,
}

/// A compiled XSLT stylesheet. It can be applied any number of times.
pub struct Stylesheet {
    template: XsltTemplate,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::XmlDocument {}
    impl Sealed for super::HtmlDocument {}
}

/// A document a stylesheet can be applied to: [`XmlDocument`] or [`HtmlDocument`].
pub trait SourceDocument: sealed::Sealed + Send + Sync {
    fn tree(&self) -> &Tree;

    /// A shared reference to the tree, for work that outlives the borrow.
    fn shared_tree(&self) -> Arc<Tree>;
}

impl XmlDocument {
    pub(crate) fn new(tree: Tree) -> Self {
        Self {
            tree: Arc::new(tree),
        }
    }

    /// The local name of the document element.
    pub fn root_name(&self) -> Option<&str> {
        root_name(&self.tree)
    }
}

impl HtmlDocument {
    pub(crate) fn new(tree: Tree) -> Self {
        debug_assert_eq!(tree.kind(), DocumentKind::Html);
        Self {
            tree: Arc::new(tree),
        }
    }

    /// The local name of the document element, `html` for any repaired input.
    pub fn root_name(&self) -> Option<&str> {
        root_name(&self.tree)
    }
}

impl SourceDocument for XmlDocument {
    fn tree(&self) -> &Tree {
        &self.tree
    }

    fn shared_tree(&self) -> Arc<Tree> {
        self.tree.clone()
    }
}

impl SourceDocument for HtmlDocument {
    fn tree(&self) -> &Tree {
        &self.tree
    }

    fn shared_tree(&self) -> Arc<Tree> {
        self.tree.clone()
    }
}

impl Stylesheet {
    pub(crate) fn new(template: XsltTemplate) -> Self {
        Self { template }
    }

    /// The output method declared by `xsl:output`, if any. Without one the
    /// method is chosen from the result tree of each transform.
    pub fn output_method(&self) -> Option<OutputMethod> {
        self.template.output().method
    }

    pub(crate) fn template(&self) -> &XsltTemplate {
        &self.template
    }
}

fn root_name(tree: &Tree) -> Option<&str> {
    let id = tree.document_element()?;
    match &tree.data(id).kind {
        NodeKind::Element { name, .. } => Some(name.local.as_str()),
        _ => None,
    }
}

impl fmt::Debug for XmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlDocument")
            .field("root", &self.root_name())
            .field("nodes", &self.tree.len())
            .finish()
    }
}

impl fmt::Debug for HtmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtmlDocument")
            .field("nodes", &self.tree.len())
            .finish()
    }
}

impl fmt::Debug for Stylesheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let compiled = self.template.stylesheet();
        f.debug_struct("Stylesheet")
            .field("templates", &compiled.templates.len())
            .field("named_templates", &compiled.named_templates.len())
            .field("output", &compiled.output.method)
            .finish()
    }
}
