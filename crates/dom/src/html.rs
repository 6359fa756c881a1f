//! Lenient HTML front end built on `html5ever`.
//!
//! Input is parsed the way a browser would, recovering from malformed markup,
//! and the resulting DOM is copied into a [`Tree`]. HTML elements are placed in
//! no namespace so that stylesheets can match them with plain names.

use crate::error::DomError;
use crate::tree::{DocumentKind, MAX_DEPTH, Name, Tree, TreeBuilder};
use html5ever::tendril::TendrilSink;
use html5ever::{QualName, parse_document};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Parses HTML into a [`Tree`]. Blank input and elements nested deeper than
/// [`MAX_DEPTH`] are rejected; anything else is repaired into a document with
/// `html`, `head` and `body` elements.
pub fn parse_html(text: &str) -> Result<Tree, DomError> {
    if text.trim().is_empty() {
        return Err(DomError::EmptyDocument);
    }
    let dom = parse_document(RcDom::default(), Default::default()).one(text);
    if !dom.errors.is_empty() {
        log::debug!("recovered from {} HTML parse errors", dom.errors.len());
    }

    let mut builder = TreeBuilder::new();
    copy_children(&dom.document, &mut builder)?;
    let tree = builder.finish(DocumentKind::Html);
    log::trace!("parsed HTML document into {} nodes", tree.len());
    Ok(tree)
}

enum Step {
    Enter(Handle),
    Leave,
}

/// Copies the subtree below `parent` without recursing, so document depth is
/// bounded by [`MAX_DEPTH`] rather than by the stack.
fn copy_children(parent: &Handle, builder: &mut TreeBuilder) -> Result<(), DomError> {
    let mut work: Vec<Step> = parent
        .children
        .borrow()
        .iter()
        .rev()
        .map(|child| Step::Enter(child.clone()))
        .collect();

    while let Some(step) = work.pop() {
        let handle = match step {
            Step::Enter(handle) => handle,
            Step::Leave => {
                builder.end_element();
                continue;
            }
        };
        match &handle.data {
            NodeData::Element { name, attrs, .. } => {
                if builder.depth() >= MAX_DEPTH {
                    return Err(DomError::TooDeep(MAX_DEPTH));
                }
                let attributes = attrs
                    .borrow()
                    .iter()
                    .map(|attr| (convert_name(&attr.name), attr.value.to_string()))
                    .collect();
                builder.start_element(convert_name(name), Vec::new(), attributes);
                work.push(Step::Leave);
                work.extend(
                    handle
                        .children
                        .borrow()
                        .iter()
                        .rev()
                        .map(|child| Step::Enter(child.clone())),
                );
            }
            NodeData::Text { contents } => builder.text(&contents.borrow()),
            NodeData::Comment { contents } => builder.comment(contents),
            NodeData::ProcessingInstruction { target, contents } => {
                builder.processing_instruction(target, contents)
            }
            NodeData::Document | NodeData::Doctype { .. } => {}
        }
    }
    Ok(())
}

fn convert_name(name: &QualName) -> Name {
    let ns: &str = &name.ns;
    let namespace = if ns.is_empty() || ns == XHTML_NAMESPACE {
        None
    } else {
        Some(ns.to_string())
    };
    Name {
        prefix: name.prefix.as_ref().map(|p| p.to_string()),
        local: name.local.to_string(),
        namespace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::XmlNode;
    use crate::tree::NodeKind;
    use xform_xpath1::DataSourceNode;

    fn element_names(node: XmlNode<'_>, out: &mut Vec<String>) {
        for child in node.children() {
            if let NodeKind::Element { name, .. } = child.kind() {
                out.push(name.local.clone());
            }
            element_names(child, out);
        }
    }

    #[test]
    fn test_fragment_is_repaired_into_a_document() {
        let tree = parse_html("<p>Hello <b>world").unwrap();
        assert_eq!(tree.kind(), DocumentKind::Html);
        let mut names = Vec::new();
        element_names(tree.root(), &mut names);
        assert_eq!(names, vec!["html", "head", "body", "p", "b"]);
        assert_eq!(tree.root().string_value(), "Hello world");
    }

    #[test]
    fn test_html_elements_have_no_namespace() {
        let tree = parse_html("<html><body><div class='x'>t</div></body></html>").unwrap();
        let html = tree.node(tree.document_element().unwrap());
        assert_eq!(html.namespace_uri(), None);
        assert_eq!(html.name().unwrap().local_part, "html");
    }

    #[test]
    fn test_blank_input_is_rejected() {
        assert!(matches!(parse_html("  \n"), Err(DomError::EmptyDocument)));
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        // html and body take two levels.
        let fits = "<div>".repeat(MAX_DEPTH - 2);
        assert!(parse_html(&fits).is_ok());

        let hostile = "<div>".repeat(20_000);
        assert!(matches!(parse_html(&hostile), Err(DomError::TooDeep(MAX_DEPTH))));
    }

    #[test]
    fn test_sibling_order_is_preserved() {
        let tree = parse_html("<ul><li>a</li><li>b<i>c</i></li></ul>tail").unwrap();
        let mut names = Vec::new();
        element_names(tree.root(), &mut names);
        assert_eq!(names, vec!["html", "head", "body", "ul", "li", "li", "i"]);
        assert_eq!(tree.root().string_value(), "abctail");
    }
}
