//! The in-memory result tree that the executor builds and the serializer writes out.
//! Variables bound to content keep their value as a [`ResultFragment`] too.

use crate::output::OutputBuilder;
use xform_dom::Name;

#[derive(Debug, Clone, PartialEq)]
pub struct ResultElement {
    pub name: Name,
    pub namespaces: Vec<(Option<String>, String)>,
    pub attributes: Vec<(Name, String)>,
    pub children: Vec<ResultNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultNode {
    Element(ResultElement),
    Text {
        text: String,
        disable_escaping: bool,
    },
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

/// A finished sequence of top-level result nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultFragment {
    pub nodes: Vec<ResultNode>,
}

impl ResultFragment {
    /// Concatenation of every text node, as XPath sees a fragment.
    pub fn string_value(&self) -> String {
        fn collect(nodes: &[ResultNode], out: &mut String) {
            for node in nodes {
                match node {
                    ResultNode::Text { text, .. } => out.push_str(text),
                    ResultNode::Element(e) => collect(&e.children, out),
                    _ => {}
                }
            }
        }
        let mut out = String::new();
        collect(&self.nodes, &mut out);
        out
    }

    /// The first top-level element, if any.
    pub fn document_element(&self) -> Option<&ResultElement> {
        self.nodes.iter().find_map(|n| match n {
            ResultNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Writes the fragment into another builder, as `xsl:copy-of` does.
    pub fn replay(&self, builder: &mut dyn OutputBuilder) {
        fn replay_nodes(nodes: &[ResultNode], builder: &mut dyn OutputBuilder) {
            for node in nodes {
                match node {
                    ResultNode::Element(e) => {
                        builder.start_element(&e.name);
                        for (prefix, uri) in &e.namespaces {
                            builder.add_namespace(prefix.as_deref(), uri);
                        }
                        for (name, value) in &e.attributes {
                            builder.set_attribute(name, value);
                        }
                        replay_nodes(&e.children, builder);
                        builder.end_element();
                    }
                    ResultNode::Text {
                        text,
                        disable_escaping,
                    } => builder.add_text(text, *disable_escaping),
                    ResultNode::Comment(c) => builder.add_comment(c),
                    ResultNode::ProcessingInstruction { target, data } => {
                        builder.add_processing_instruction(target, data)
                    }
                }
            }
        }
        replay_nodes(&self.nodes, builder);
    }
}

/// An [`OutputBuilder`] that assembles a [`ResultFragment`].
#[derive(Debug, Default)]
pub struct ResultTreeBuilder {
    open: Vec<ResultElement>,
    top: Vec<ResultNode>,
}

impl ResultTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn children_mut(&mut self) -> &mut Vec<ResultNode> {
        match self.open.last_mut() {
            Some(element) => &mut element.children,
            None => &mut self.top,
        }
    }

    /// Closes any elements still open and returns the fragment.
    pub fn finish(mut self) -> ResultFragment {
        while !self.open.is_empty() {
            self.end_element();
        }
        ResultFragment { nodes: self.top }
    }
}

impl OutputBuilder for ResultTreeBuilder {
    fn start_element(&mut self, name: &Name) {
        self.open.push(ResultElement {
            name: name.clone(),
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        });
    }

    fn end_element(&mut self) {
        if let Some(element) = self.open.pop() {
            self.children_mut().push(ResultNode::Element(element));
        }
    }

    fn add_namespace(&mut self, prefix: Option<&str>, uri: &str) {
        if let Some(element) = self.open.last_mut()
            && !element.namespaces.iter().any(|(p, _)| p.as_deref() == prefix)
        {
            element
                .namespaces
                .push((prefix.map(str::to_string), uri.to_string()));
        }
    }

    fn set_attribute(&mut self, name: &Name, value: &str) {
        let Some(element) = self.open.last_mut() else {
            log::warn!("attribute '{}' ignored: no element to attach it to", name.qualified());
            return;
        };
        if !element.children.is_empty() {
            log::warn!(
                "attribute '{}' ignored: added to <{}> after its children",
                name.qualified(),
                element.name.qualified()
            );
            return;
        }
        let existing = element
            .attributes
            .iter_mut()
            .find(|(n, _)| n.local == name.local && n.namespace == name.namespace);
        match existing {
            Some((_, v)) => *v = value.to_string(),
            None => element.attributes.push((name.clone(), value.to_string())),
        }
    }

    fn add_text(&mut self, text: &str, disable_escaping: bool) {
        if text.is_empty() {
            return;
        }
        let children = self.children_mut();
        if let Some(ResultNode::Text {
            text: previous,
            disable_escaping: flag,
        }) = children.last_mut()
            && *flag == disable_escaping
        {
            previous.push_str(text);
            return;
        }
        children.push(ResultNode::Text {
            text: text.to_string(),
            disable_escaping,
        });
    }

    fn add_comment(&mut self, text: &str) {
        self.children_mut().push(ResultNode::Comment(text.to_string()));
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) {
        self.children_mut().push(ResultNode::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_nested_elements_and_merges_text() {
        let mut b = ResultTreeBuilder::new();
        b.start_element(&Name::local("tr"));
        b.set_attribute(&Name::local("class"), "odd");
        b.add_text("Bob ", false);
        b.add_text("Dylan", false);
        b.end_element();
        let fragment = b.finish();
        let tr = fragment.document_element().unwrap();
        assert_eq!(tr.attributes.len(), 1);
        assert_eq!(tr.children.len(), 1);
        assert_eq!(fragment.string_value(), "Bob Dylan");
    }

    #[test]
    fn test_late_attribute_is_ignored_and_duplicates_replace() {
        let mut b = ResultTreeBuilder::new();
        b.start_element(&Name::local("a"));
        b.set_attribute(&Name::local("href"), "x");
        b.set_attribute(&Name::local("href"), "y");
        b.add_text("t", false);
        b.set_attribute(&Name::local("late"), "z");
        let fragment = b.finish();
        let a = fragment.document_element().unwrap();
        assert_eq!(a.attributes, vec![(Name::local("href"), "y".to_string())]);
    }

    #[test]
    fn test_replay_reproduces_fragment() {
        let mut b = ResultTreeBuilder::new();
        b.add_comment("c");
        b.start_element(&Name::local("p"));
        b.add_text("x", true);
        b.end_element();
        let fragment = b.finish();

        let mut copy = ResultTreeBuilder::new();
        fragment.replay(&mut copy);
        assert_eq!(copy.finish(), fragment);
    }
}
