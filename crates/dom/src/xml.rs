//! XML front end built on `roxmltree`.
//!
//! `roxmltree` borrows from its input, so the parsed document is copied into an
//! owned [`Tree`] that can outlive the source text.

use crate::error::DomError;
use crate::tree::{DocumentKind, MAX_DEPTH, Name, Tree, TreeBuilder};
use roxmltree::{Node, NodeType, ParsingOptions};

/// Parses well-formed XML into a [`Tree`].
pub fn parse_xml(text: &str) -> Result<Tree, DomError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = roxmltree::Document::parse_with_options(text, options)?;

    // Walked in document order without recursion; `open` mirrors the builder's
    // element stack.
    let mut builder = TreeBuilder::new();
    let mut open: Vec<roxmltree::NodeId> = Vec::new();
    for node in doc.root().descendants().skip(1) {
        let parent = node.parent().map(|p| p.id());
        while !open.is_empty() && open.last().copied() != parent {
            open.pop();
            builder.end_element();
        }
        open_node(node, &mut builder)?;
        if node.is_element() {
            open.push(node.id());
        }
    }
    let tree = builder.finish(DocumentKind::Xml);
    log::trace!("parsed XML document into {} nodes", tree.len());
    Ok(tree)
}

fn open_node(node: Node<'_, '_>, builder: &mut TreeBuilder) -> Result<(), DomError> {
    match node.node_type() {
        NodeType::Element => {
            if builder.depth() >= MAX_DEPTH {
                return Err(DomError::TooDeep(MAX_DEPTH));
            }
            builder.start_element(
                element_name(node),
                declared_namespaces(node),
                attributes(node),
            );
        }
        NodeType::Text => builder.text(node.text().unwrap_or_default()),
        NodeType::Comment => builder.comment(node.text().unwrap_or_default()),
        NodeType::PI => {
            if let Some(pi) = node.pi() {
                builder.processing_instruction(pi.target, pi.value.unwrap_or_default());
            }
        }
        NodeType::Root => {}
    }
    Ok(())
}

fn element_name(node: Node<'_, '_>) -> Name {
    let tag = node.tag_name();
    let namespace = tag.namespace();
    let prefix = namespace.and_then(|uri| {
        node.namespaces()
            .find(|ns| ns.uri() == uri)
            .and_then(|ns| ns.name())
    });
    Name {
        prefix: prefix.map(str::to_string),
        local: tag.name().to_string(),
        namespace: namespace.map(str::to_string),
    }
}

fn attributes(node: Node<'_, '_>) -> Vec<(Name, String)> {
    node.attributes()
        .map(|attr| {
            let namespace = attr.namespace();
            // Unprefixed attributes are never in a namespace, so only named bindings apply.
            let prefix = namespace.and_then(|uri| {
                node.namespaces()
                    .filter(|ns| ns.uri() == uri)
                    .find_map(|ns| ns.name())
            });
            let name = Name {
                prefix: prefix.map(str::to_string),
                local: attr.name().to_string(),
                namespace: namespace.map(str::to_string),
            };
            (name, attr.value().to_string())
        })
        .collect()
}

/// The bindings in scope on `node` that are not in scope on its parent element.
fn declared_namespaces(node: Node<'_, '_>) -> Vec<(Option<String>, String)> {
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();

    node.namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .filter(|ns| !inherited.contains(&(ns.name(), ns.uri())))
        .map(|ns| (ns.name().map(str::to_string), ns.uri().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;
    use xform_xpath1::DataSourceNode;

    #[test]
    fn test_parses_elements_attributes_and_text() {
        let tree = parse_xml("<a x='1'><b>hi</b><!--c--><?pi data?></a>").unwrap();
        let a = tree.node(tree.document_element().unwrap());
        assert_eq!(a.name().unwrap().local_part, "a");
        assert_eq!(a.attributes().count(), 1);
        assert_eq!(a.string_value(), "hi");
        let kinds: Vec<_> = a.children().map(|c| c.node_type()).collect();
        assert_eq!(
            kinds,
            vec![
                xform_xpath1::NodeType::Element,
                xform_xpath1::NodeType::Comment,
                xform_xpath1::NodeType::ProcessingInstruction
            ]
        );
    }

    #[test]
    fn test_namespaces_are_resolved_and_declared_once() {
        let tree = parse_xml(
            r#"<r:root xmlns:r="urn:r" xmlns="urn:d"><child r:at="v"/></r:root>"#,
        )
        .unwrap();
        let root = tree.document_element().unwrap();
        match &tree.data(root).kind {
            NodeKind::Element { name, namespaces } => {
                assert!(name.is("urn:r", "root"));
                assert_eq!(name.prefix.as_deref(), Some("r"));
                assert_eq!(namespaces.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        let child = tree.data(root).children[0];
        match &tree.data(child).kind {
            NodeKind::Element { name, namespaces } => {
                assert!(name.is("urn:d", "child"));
                assert!(name.prefix.is_none());
                assert!(namespaces.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        let attr = tree.data(child).attributes[0];
        match &tree.data(attr).kind {
            NodeKind::Attribute { name, value } => {
                assert_eq!(name.qualified(), "r:at");
                assert_eq!(value, "v");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_byte_order_mark_and_declaration_are_accepted() {
        let tree =
            parse_xml("\u{feff}<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<a>x</a>").unwrap();
        assert_eq!(tree.root().string_value(), "x");
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(matches!(parse_xml("<a><b></a>"), Err(DomError::Xml(_))));
        assert!(parse_xml("").is_err());
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        let nested = |depth: usize| format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth));
        let tree = parse_xml(&nested(MAX_DEPTH)).unwrap();
        assert_eq!(tree.len(), MAX_DEPTH + 1);
        assert!(matches!(
            parse_xml(&nested(100_000)),
            Err(DomError::TooDeep(MAX_DEPTH))
        ));
    }
}
