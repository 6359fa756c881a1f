//! A "dumb" driver that walks a parsed stylesheet document and notifies a builder of events.
use crate::error::XsltError;
use xform_dom::{Name, NodeId, NodeKind, Tree};
use xform_xpath1::functions::XSLT_NAMESPACE;

/// A start tag as the compiler sees it, with names already namespace-resolved.
#[derive(Debug, Clone)]
pub struct ElementEvent {
    pub name: Name,
    pub attributes: Vec<(Name, String)>,
    /// Namespace declarations made on this element.
    pub namespaces: Vec<(Option<String>, String)>,
}

impl ElementEvent {
    /// An attribute in no namespace.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.namespace.is_none() && n.local == local)
            .map(|(_, v)| v.as_str())
    }

    pub fn attr_ns(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.is(namespace, local))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_xslt(&self) -> bool {
        self.name.namespace.as_deref() == Some(XSLT_NAMESPACE)
    }

    pub fn is_xslt_named(&self, local: &str) -> bool {
        self.is_xslt() && self.name.local == local
    }

    pub fn display_name(&self) -> String {
        if self.is_xslt() {
            format!("xsl:{}", self.name.local)
        } else {
            self.name.qualified()
        }
    }
}

/// Receives the stylesheet document as a stream of events.
pub trait StylesheetBuilder {
    fn start_element(&mut self, element: ElementEvent) -> Result<(), XsltError>;
    fn end_element(&mut self) -> Result<(), XsltError>;
    fn text(&mut self, text: &str) -> Result<(), XsltError>;
}

/// Drives the parsing process, calling builder methods for each significant node.
/// Comments and processing instructions in a stylesheet carry no meaning and are skipped.
pub fn parse_stylesheet_content(
    tree: &Tree,
    builder: &mut impl StylesheetBuilder,
) -> Result<(), XsltError> {
    for &child in &tree.data(NodeId::ROOT).children {
        visit(tree, child, builder)?;
    }
    Ok(())
}

fn visit(tree: &Tree, id: NodeId, builder: &mut impl StylesheetBuilder) -> Result<(), XsltError> {
    let data = tree.data(id);
    match &data.kind {
        NodeKind::Element { name, namespaces } => {
            let attributes = data
                .attributes
                .iter()
                .filter_map(|&a| match &tree.data(a).kind {
                    NodeKind::Attribute { name, value } => Some((name.clone(), value.clone())),
                    _ => None,
                })
                .collect();
            builder.start_element(ElementEvent {
                name: name.clone(),
                attributes,
                namespaces: namespaces.clone(),
            })?;
            for &child in &data.children {
                visit(tree, child, builder)?;
            }
            builder.end_element()
        }
        NodeKind::Text(text) => builder.text(text),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xform_dom::parse_xml;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl StylesheetBuilder for Recorder {
        fn start_element(&mut self, element: ElementEvent) -> Result<(), XsltError> {
            self.events.push(format!("<{}", element.display_name()));
            Ok(())
        }

        fn end_element(&mut self) -> Result<(), XsltError> {
            self.events.push(">".to_string());
            Ok(())
        }

        fn text(&mut self, text: &str) -> Result<(), XsltError> {
            self.events.push(format!("'{}'", text));
            Ok(())
        }
    }

    #[test]
    fn test_events_follow_document_order() {
        let tree = parse_xml(
            r#"<t:stylesheet xmlns:t="http://www.w3.org/1999/XSL/Transform"><!--c--><p>x</p></t:stylesheet>"#,
        )
        .unwrap();
        let mut recorder = Recorder::default();
        parse_stylesheet_content(&tree, &mut recorder).unwrap();
        assert_eq!(recorder.events, vec!["<xsl:stylesheet", "<p", "'x'", ">", ">"]);
    }
}
