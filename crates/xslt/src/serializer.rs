//! Writes a result tree as text following the `xsl:output` settings.

use crate::ast::{OutputMethod, OutputSettings};
use crate::result_tree::{ResultElement, ResultFragment, ResultNode};
use quick_xml::escape::partial_escape;
use std::borrow::Cow;
use xform_dom::Name;

const HTML_DEFAULT_PUBLIC: &str = "-//W3C//DTD HTML 4.0 Transitional//EN";
const HTML_DEFAULT_SYSTEM: &str = "http://www.w3.org/TR/REC-html40/loose.dtd";

const HTML_VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "br", "col", "embed", "frame", "hr", "img", "input", "isindex",
    "link", "meta", "param", "source", "track", "wbr",
];

const HTML_BOOLEAN_ATTRIBUTES: &[&str] = &[
    "checked", "compact", "declare", "defer", "disabled", "ismap", "multiple", "nohref",
    "noresize", "noshade", "nowrap", "readonly", "selected",
];

/// The method used for `fragment`: the declared one, otherwise HTML when the
/// document element is `html` in no namespace, otherwise XML.
pub fn resolve_method(fragment: &ResultFragment, settings: &OutputSettings) -> OutputMethod {
    if let Some(method) = settings.method {
        return method;
    }
    for node in &fragment.nodes {
        match node {
            ResultNode::Element(e) => {
                return if e.name.namespace.is_none() && e.name.local.eq_ignore_ascii_case("html") {
                    OutputMethod::Html
                } else {
                    OutputMethod::Xml
                };
            }
            ResultNode::Text { text, .. } if !text.trim().is_empty() => return OutputMethod::Xml,
            _ => {}
        }
    }
    OutputMethod::Xml
}

/// Serializes a result tree.
pub fn serialize(fragment: &ResultFragment, settings: &OutputSettings) -> String {
    let method = resolve_method(fragment, settings);
    if method == OutputMethod::Text {
        return fragment.string_value();
    }
    let encoding = settings.encoding.clone().unwrap_or_else(|| "UTF-8".to_string());
    let mut serializer = Serializer {
        out: String::new(),
        method,
        indent: settings.indent.unwrap_or(method == OutputMethod::Html),
        ascii_only: !is_unicode_encoding(&encoding),
        encoding,
        scopes: Vec::new(),
        generated_prefixes: 0,
    };
    serializer.write_prolog(fragment, settings);
    for node in &fragment.nodes {
        serializer.write_node(node, 0, false);
        if !matches!(node, ResultNode::Text { .. }) {
            serializer.out.push('\n');
        }
    }
    serializer.out
}

fn is_unicode_encoding(encoding: &str) -> bool {
    let e = encoding.to_ascii_uppercase();
    e == "UTF-8" || e == "UTF8" || e.starts_with("UTF-16")
}

struct Serializer {
    out: String,
    method: OutputMethod,
    indent: bool,
    ascii_only: bool,
    encoding: String,
    /// Namespace bindings written on each open element.
    scopes: Vec<Vec<(Option<String>, String)>>,
    generated_prefixes: usize,
}

impl Serializer {
    fn write_prolog(&mut self, fragment: &ResultFragment, settings: &OutputSettings) {
        let root_name = fragment.document_element().map(|e| e.name.qualified());
        match self.method {
            OutputMethod::Xml => {
                if !settings.omit_xml_declaration {
                    self.out
                        .push_str(&format!("<?xml version=\"1.0\" encoding=\"{}\"", self.encoding));
                    if let Some(standalone) = settings.standalone {
                        self.out.push_str(if standalone {
                            " standalone=\"yes\""
                        } else {
                            " standalone=\"no\""
                        });
                    }
                    self.out.push_str("?>\n");
                }
                if let (Some(system), Some(root)) = (&settings.doctype_system, &root_name) {
                    match &settings.doctype_public {
                        Some(public) => self.out.push_str(&format!(
                            "<!DOCTYPE {} PUBLIC \"{}\" \"{}\">\n",
                            root, public, system
                        )),
                        None => self
                            .out
                            .push_str(&format!("<!DOCTYPE {} SYSTEM \"{}\">\n", root, system)),
                    }
                }
            }
            OutputMethod::Html => {
                let root = root_name.unwrap_or_else(|| "html".to_string());
                match (&settings.doctype_public, &settings.doctype_system) {
                    (None, None) => self.out.push_str(&format!(
                        "<!DOCTYPE {} PUBLIC \"{}\" \"{}\">\n",
                        root, HTML_DEFAULT_PUBLIC, HTML_DEFAULT_SYSTEM
                    )),
                    (Some(public), Some(system)) => self.out.push_str(&format!(
                        "<!DOCTYPE {} PUBLIC \"{}\" \"{}\">\n",
                        root, public, system
                    )),
                    (Some(public), None) => self
                        .out
                        .push_str(&format!("<!DOCTYPE {} PUBLIC \"{}\">\n", root, public)),
                    (None, Some(system)) => self
                        .out
                        .push_str(&format!("<!DOCTYPE {} SYSTEM \"{}\">\n", root, system)),
                }
            }
            OutputMethod::Text => {}
        }
    }

    fn is_html_element(&self, name: &Name) -> bool {
        self.method == OutputMethod::Html && name.namespace.is_none()
    }

    fn write_node(&mut self, node: &ResultNode, depth: usize, raw_text: bool) {
        match node {
            ResultNode::Element(e) => self.write_element(e, depth),
            ResultNode::Text {
                text,
                disable_escaping,
            } => {
                if *disable_escaping || raw_text {
                    self.out.push_str(text);
                } else {
                    let escaped = partial_escape(text);
                    self.push_encoded(&escaped);
                }
            }
            ResultNode::Comment(text) => {
                self.out.push_str("<!--");
                self.push_encoded(text);
                self.out.push_str("-->");
            }
            ResultNode::ProcessingInstruction { target, data } => {
                self.out.push_str("<?");
                self.out.push_str(target);
                if !data.is_empty() {
                    self.out.push(' ');
                    self.out.push_str(data);
                }
                self.out
                    .push_str(if self.method == OutputMethod::Html { ">" } else { "?>" });
            }
        }
    }

    fn write_element(&mut self, element: &ResultElement, depth: usize) {
        let html = self.is_html_element(&element.name);
        self.scopes.push(Vec::new());

        self.out.push('<');
        self.out.push_str(&element.name.qualified());
        let mut declarations = Vec::new();
        for (prefix, uri) in &element.namespaces {
            self.declare(prefix.clone(), uri, &mut declarations);
        }
        if !html {
            match &element.name.namespace {
                Some(uri) => self.declare(element.name.prefix.clone(), uri, &mut declarations),
                None => {
                    if self.lookup(None).is_some_and(|uri| !uri.is_empty()) {
                        self.declare(None, "", &mut declarations);
                    }
                }
            }
        }
        let attributes: Vec<(String, &str)> = element
            .attributes
            .iter()
            .map(|(name, value)| (self.attribute_name(name, &mut declarations), value.as_str()))
            .collect();

        for (prefix, uri) in &declarations {
            match prefix {
                Some(p) => self.out.push_str(&format!(" xmlns:{}=\"", p)),
                None => self.out.push_str(" xmlns=\""),
            }
            self.push_attribute_value(uri);
            self.out.push('"');
        }
        for (name, value) in attributes {
            self.out.push(' ');
            self.out.push_str(&name);
            if html && HTML_BOOLEAN_ATTRIBUTES.contains(&name.to_ascii_lowercase().as_str())
                && value.eq_ignore_ascii_case(&name)
            {
                continue;
            }
            self.out.push_str("=\"");
            self.push_attribute_value(value);
            self.out.push('"');
        }

        let local = element.name.local.to_ascii_lowercase();
        let children: Cow<'_, [ResultNode]> = if html && local == "head" {
            Cow::Owned(self.with_content_type_meta(&element.children))
        } else {
            Cow::Borrowed(&element.children)
        };

        if html && HTML_VOID_ELEMENTS.contains(&local.as_str()) {
            self.out.push('>');
        } else if children.is_empty() && !html {
            self.out.push_str("/>");
        } else {
            self.out.push('>');
            let raw_text = html && (local == "script" || local == "style");
            self.write_children(&children, depth, raw_text);
            self.out.push_str("</");
            self.out.push_str(&element.name.qualified());
            self.out.push('>');
        }
        self.scopes.pop();
    }

    fn write_children(&mut self, children: &[ResultNode], depth: usize, raw_text: bool) {
        // Only element-only content is indented, so text never gains whitespace.
        let indent = self.indent
            && !children.is_empty()
            && children
                .iter()
                .all(|c| !matches!(c, ResultNode::Text { .. }));
        for child in children {
            if indent {
                self.newline(depth + 1);
            }
            self.write_node(child, depth + 1, raw_text);
        }
        if indent {
            self.newline(depth);
        }
    }

    fn newline(&mut self, depth: usize) {
        self.out.push('\n');
        for _ in 0..depth {
            self.out.push_str("  ");
        }
    }

    /// Prepends the META element HTML output carries in `head`, unless the
    /// stylesheet wrote one itself.
    fn with_content_type_meta(&self, children: &[ResultNode]) -> Vec<ResultNode> {
        let has_meta = children.iter().any(|c| match c {
            ResultNode::Element(e) => {
                e.name.local.eq_ignore_ascii_case("meta")
                    && e.attributes.iter().any(|(n, v)| {
                        n.local.eq_ignore_ascii_case("http-equiv")
                            && v.eq_ignore_ascii_case("content-type")
                    })
            }
            _ => false,
        });
        let mut out = Vec::with_capacity(children.len() + 1);
        if !has_meta {
            out.push(ResultNode::Element(ResultElement {
                name: Name::local("meta"),
                namespaces: Vec::new(),
                attributes: vec![
                    (Name::local("http-equiv"), "Content-Type".to_string()),
                    (
                        Name::local("content"),
                        format!("text/html; charset={}", self.encoding),
                    ),
                ],
                children: Vec::new(),
            }));
        }
        out.extend(children.iter().cloned());
        out
    }

    fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// Records a binding on the current element unless it is already in effect.
    fn declare(
        &mut self,
        prefix: Option<String>,
        uri: &str,
        declarations: &mut Vec<(Option<String>, String)>,
    ) {
        if prefix.as_deref() == Some("xml") {
            return;
        }
        let in_effect = self.lookup(prefix.as_deref()).unwrap_or("");
        if in_effect == uri {
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((prefix.clone(), uri.to_string()));
        }
        declarations.push((prefix, uri.to_string()));
    }

    /// The name an attribute is written with. Namespaced attributes need a prefix
    /// bound to their namespace; one is declared or invented when missing.
    fn attribute_name(
        &mut self,
        name: &Name,
        declarations: &mut Vec<(Option<String>, String)>,
    ) -> String {
        let Some(uri) = &name.namespace else {
            return name.local.clone();
        };
        if uri == xform_xpath1::functions::XML_NAMESPACE {
            return format!("xml:{}", name.local);
        }
        if let Some(prefix) = &name.prefix
            && self.lookup(Some(prefix)).is_none_or(|bound| bound == uri)
        {
            self.declare(Some(prefix.clone()), uri, declarations);
            return format!("{}:{}", prefix, name.local);
        }
        let existing = self
            .scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(p, u)| p.is_some() && u == uri)
            .and_then(|(p, _)| p.clone());
        let prefix = match existing {
            Some(p) if self.lookup(Some(&p)) == Some(uri.as_str()) => p,
            _ => {
                let p = format!("ns{}", self.generated_prefixes);
                self.generated_prefixes += 1;
                self.declare(Some(p.clone()), uri, declarations);
                p
            }
        };
        format!("{}:{}", prefix, name.local)
    }

    fn push_attribute_value(&mut self, value: &str) {
        let escaped = partial_escape(value);
        let escaped = escaped
            .replace('"', "&quot;")
            .replace('\n', "&#10;")
            .replace('\t', "&#9;");
        self.push_encoded(&escaped);
    }

    /// Appends text, replacing characters the output encoding cannot carry with
    /// character references.
    fn push_encoded(&mut self, text: &str) {
        if !self.ascii_only || text.is_ascii() {
            self.out.push_str(text);
            return;
        }
        for c in text.chars() {
            if c.is_ascii() {
                self.out.push(c);
            } else {
                self.out.push_str(&format!("&#{};", c as u32));
            }
        }
    }
}
