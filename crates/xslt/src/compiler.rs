//! Turns stylesheet events into a [`CompiledStylesheet`].
//!
//! The builder keeps a stack of open elements. Each element collects the items
//! its children produced; when it closes, a handler in `compiler_handlers`
//! turns it into an instruction, a body item for its parent, or a top-level
//! declaration.

use crate::ast::{
    AttributeValueTemplate, AvtPart, CompiledStylesheet, Param, PreparsedTemplate, SortKey, When,
    WithParam, XsltInstruction,
};
use crate::error::XsltError;
use crate::parser::{ElementEvent, StylesheetBuilder, parse_stylesheet_content};
use crate::pattern::{self, Pattern};
use crate::util::{parse_avt, split_qname};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use xform_dom::Tree;
use xform_xpath1::functions::{XML_NAMESPACE, XSLT_NAMESPACE};
use xform_xpath1::{Expression, FunctionRegistry, NamespaceMap, XPathError, parse_expression};

/// What a closed element hands to its parent.
#[derive(Debug)]
pub(crate) enum BodyItem {
    Instruction(XsltInstruction),
    Param(Param),
    Sort(SortKey),
    WithParam(WithParam),
    When(When),
    Otherwise(PreparsedTemplate),
    Fallback(PreparsedTemplate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ElementKind {
    Stylesheet,
    Xslt,
    Literal,
}

#[derive(Debug)]
pub(crate) struct OpenElement {
    pub event: ElementEvent,
    pub kind: ElementKind,
    pub items: Vec<BodyItem>,
    pub preserve_space: bool,
}

/// A stylesheet module being compiled.
#[derive(Debug, Default)]
pub(crate) struct ModuleFrame {
    /// Canonical location, when the module was read from a file.
    pub path: Option<PathBuf>,
    /// Directory relative `href`s resolve against; empty for the current directory.
    pub base: PathBuf,
    /// Whether a top-level element other than `xsl:import` has been seen.
    pub declared: bool,
}

#[derive(Debug, Default)]
pub struct CompilerBuilder {
    pub(crate) open: Vec<OpenElement>,
    pub(crate) stylesheet: CompiledStylesheet,
    pub(crate) forwards_compatible: bool,
    pub(crate) simplified: bool,
    pub(crate) excluded_namespaces: Vec<String>,
    pub(crate) called_templates: Vec<String>,
    pub(crate) used_attribute_sets: Vec<String>,
    /// Import precedence of the declarations being compiled.
    pub(crate) precedence: usize,
    pub(crate) named_precedence: HashMap<String, usize>,
    pub(crate) global_precedence: HashMap<String, usize>,
    pub(crate) decimal_format_precedence: HashMap<Option<String>, usize>,
    /// Modules being compiled, outermost first.
    pub(crate) modules: Vec<ModuleFrame>,
    /// Set while the document element of an included or imported module is expected.
    pub(crate) module_root_pending: bool,
    /// Depth inside a foreign top-level element whose content is skipped.
    ignore_depth: usize,
    finished: bool,
}

impl CompilerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings in scope for the innermost open element, plus `extra` when the
    /// element being closed has already been popped.
    pub(crate) fn in_scope_namespaces(&self, extra: Option<&ElementEvent>) -> NamespaceMap {
        let mut map = NamespaceMap::new();
        let events = self.open.iter().map(|o| &o.event).chain(extra);
        for event in events {
            for (prefix, uri) in &event.namespaces {
                if let Some(prefix) = prefix {
                    map.insert(prefix.clone(), uri.clone());
                }
            }
        }
        map
    }

    /// The default namespace in scope, used by `#default` in exclusion lists.
    pub(crate) fn default_namespace(&self, extra: Option<&ElementEvent>) -> Option<String> {
        let events = self.open.iter().map(|o| &o.event).chain(extra);
        let mut current = None;
        for event in events {
            for (prefix, uri) in &event.namespaces {
                if prefix.is_none() {
                    current = Some(uri.clone()).filter(|u| !u.is_empty());
                }
            }
        }
        current
    }

    pub(crate) fn parent_kind(&self) -> Option<ElementKind> {
        self.open.last().map(|o| o.kind)
    }

    pub(crate) fn parent_is_xslt(&self, local: &str) -> bool {
        self.open
            .last()
            .is_some_and(|o| o.event.is_xslt_named(local))
    }

    /// Parses an XPath expression and verifies that every function it calls exists
    /// and accepts the given number of arguments.
    pub(crate) fn expression(
        &self,
        text: &str,
        namespaces: &NamespaceMap,
    ) -> Result<Expression, XsltError> {
        let expr = parse_expression(text)?;
        check_functions(&expr, namespaces)?;
        Ok(expr)
    }

    /// Parses an attribute value template, checking its expressions like
    /// [`CompilerBuilder::expression`] does.
    pub(crate) fn avt(
        &self,
        text: &str,
        namespaces: &NamespaceMap,
    ) -> Result<AttributeValueTemplate, XsltError> {
        let avt = parse_avt(text)?;
        for part in &avt.0 {
            if let AvtPart::Dynamic(expr) = part {
                check_functions(expr, namespaces)?;
            }
        }
        Ok(avt)
    }

    pub(crate) fn pattern(
        &self,
        text: &str,
        namespaces: &NamespaceMap,
    ) -> Result<Pattern, XsltError> {
        pattern::parse(text, namespaces)
    }

    /// Resolves an `exclude-result-prefixes` style list into namespace URIs.
    pub(crate) fn exclude_prefixes(
        &mut self,
        list: &str,
        element: &ElementEvent,
    ) -> Result<(), XsltError> {
        let namespaces = self.in_scope_namespaces(Some(element));
        for token in list.split_whitespace() {
            let uri = if token == "#default" {
                self.default_namespace(Some(element))
            } else {
                Some(namespaces.get(token).cloned().ok_or_else(|| {
                    XsltError::structure(
                        element.display_name(),
                        format!("excluded prefix '{}' is not declared", token),
                    )
                })?)
            };
            if let Some(uri) = uri
                && !self.excluded_namespaces.contains(&uri)
            {
                self.excluded_namespaces.push(uri);
            }
        }
        Ok(())
    }

    fn classify(&mut self, event: &ElementEvent) -> Result<Option<ElementKind>, XsltError> {
        if self.module_root_pending {
            self.module_root_pending = false;
            if !(event.is_xslt_named("stylesheet") || event.is_xslt_named("transform")) {
                return Err(XsltError::structure(
                    event.display_name(),
                    "an included or imported module must be an xsl:stylesheet",
                ));
            }
            self.begin_stylesheet(event)?;
            return Ok(Some(ElementKind::Stylesheet));
        }
        match self.parent_kind() {
            None => {
                if event.is_xslt_named("stylesheet") || event.is_xslt_named("transform") {
                    self.begin_stylesheet(event)?;
                    Ok(Some(ElementKind::Stylesheet))
                } else if let Some(version) = event.attr_ns(XSLT_NAMESPACE, "version") {
                    self.simplified = true;
                    self.forwards_compatible = version.trim() != "1.0";
                    Ok(Some(ElementKind::Literal))
                } else {
                    Err(XsltError::structure(
                        event.display_name(),
                        "document element is not an XSLT stylesheet",
                    ))
                }
            }
            // Top-level elements from other namespaces are ignored with their content.
            Some(ElementKind::Stylesheet) if !event.is_xslt() => Ok(None),
            Some(_) if event.is_xslt() => Ok(Some(ElementKind::Xslt)),
            Some(_) => Ok(Some(ElementKind::Literal)),
        }
    }

    fn begin_stylesheet(&mut self, event: &ElementEvent) -> Result<(), XsltError> {
        match event.attr("version") {
            Some(version) => self.forwards_compatible = version.trim() != "1.0",
            None => log::warn!("{} has no version attribute", event.display_name()),
        }
        for attr in ["exclude-result-prefixes", "extension-element-prefixes"] {
            if let Some(list) = event.attr(attr) {
                self.exclude_prefixes(list, event)?;
            }
        }
        Ok(())
    }

    /// Converts collected items into a plain instruction body.
    pub(crate) fn instructions(
        element: &ElementEvent,
        items: Vec<BodyItem>,
    ) -> Result<PreparsedTemplate, XsltError> {
        let mut body = Vec::with_capacity(items.len());
        for item in items {
            match item {
                BodyItem::Instruction(i) => body.push(i),
                // Only meaningful under instructions this processor does not know.
                BodyItem::Fallback(_) => {}
                other => {
                    return Err(XsltError::structure(
                        element.display_name(),
                        format!("{} is not allowed here", item_name(&other)),
                    ));
                }
            }
        }
        Ok(PreparsedTemplate(body))
    }

    pub fn finish(self) -> Result<CompiledStylesheet, XsltError> {
        if !self.finished {
            return Err(XsltError::Compilation("stylesheet is empty".to_string()));
        }
        Ok(self.stylesheet)
    }
}

fn check_functions(expr: &Expression, namespaces: &NamespaceMap) -> Result<(), XsltError> {
    let mut problem: Option<XPathError> = None;
    expr.for_each_function_call(&mut |name, arity| {
        if problem.is_some() {
            return;
        }
        let (prefix, local) = split_qname(name);
        let namespace = match prefix {
            Some(p) => match namespaces.get(p) {
                Some(uri) => Some(uri.as_str()),
                None => {
                    problem = Some(XPathError::UnboundPrefix(p.to_string()));
                    return;
                }
            },
            None => None,
        };
        if let Err(e) = FunctionRegistry::global().check_call(namespace, local, arity) {
            problem = Some(e);
        }
    });
    match problem {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

pub(crate) fn item_name(item: &BodyItem) -> &'static str {
    match item {
        BodyItem::Instruction(_) => "an instruction",
        BodyItem::Param(_) => "xsl:param",
        BodyItem::Sort(_) => "xsl:sort",
        BodyItem::WithParam(_) => "xsl:with-param",
        BodyItem::When(_) => "xsl:when",
        BodyItem::Otherwise(_) => "xsl:otherwise",
        BodyItem::Fallback(_) => "xsl:fallback",
    }
}

impl StylesheetBuilder for CompilerBuilder {
    fn start_element(&mut self, event: ElementEvent) -> Result<(), XsltError> {
        if self.ignore_depth > 0 {
            self.ignore_depth += 1;
            return Ok(());
        }
        if self.finished {
            return Err(XsltError::Compilation(
                "content after the stylesheet element".to_string(),
            ));
        }
        let Some(kind) = self.classify(&event)? else {
            log::trace!("ignoring top-level element {}", event.display_name());
            self.ignore_depth = 1;
            return Ok(());
        };

        if kind == ElementKind::Literal
            && let Some(list) = event.attr_ns(XSLT_NAMESPACE, "exclude-result-prefixes")
        {
            let list = list.to_string();
            self.exclude_prefixes(&list, &event)?;
        }
        for (prefix, uri) in &event.namespaces {
            if let Some(prefix) = prefix {
                self.stylesheet
                    .namespaces
                    .entry(prefix.clone())
                    .or_insert_with(|| uri.clone());
            }
        }

        let inherited = self.open.last().is_some_and(|o| o.preserve_space);
        let preserve_space = match event.attr_ns(XML_NAMESPACE, "space") {
            Some("preserve") => true,
            Some("default") => false,
            _ => inherited,
        };
        self.open.push(OpenElement {
            event,
            kind,
            items: Vec::new(),
            preserve_space,
        });
        Ok(())
    }

    fn end_element(&mut self) -> Result<(), XsltError> {
        if self.ignore_depth > 0 {
            self.ignore_depth -= 1;
            return Ok(());
        }
        let Some(element) = self.open.pop() else {
            return Ok(());
        };
        let namespaces = self.in_scope_namespaces(Some(&element.event));
        let items = self.finish_element(element, &namespaces)?;
        match self.open.last_mut() {
            Some(parent) => parent.items.extend(items),
            // The document element of an included or imported module.
            None if self.modules.len() > 1 => {}
            None => {
                if self.simplified {
                    self.register_simplified(items)?;
                }
                self.finish_stylesheet()?;
            }
        }
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<(), XsltError> {
        if self.ignore_depth > 0 {
            return Ok(());
        }
        let Some(current) = self.open.last_mut() else {
            return Ok(());
        };
        let whitespace_only = text.trim().is_empty();
        match current.kind {
            ElementKind::Stylesheet => {
                if !whitespace_only {
                    log::warn!("ignoring text at the top level of the stylesheet");
                }
            }
            _ if current.event.is_xslt_named("text") => {
                current.items.push(BodyItem::Instruction(XsltInstruction::Text {
                    text: text.to_string(),
                    disable_escaping: false,
                }));
            }
            _ if whitespace_only && !current.preserve_space => {}
            _ => current.items.push(BodyItem::Instruction(XsltInstruction::Text {
                text: text.to_string(),
                disable_escaping: false,
            })),
        }
        Ok(())
    }
}

impl CompilerBuilder {
    fn finish_stylesheet(&mut self) -> Result<(), XsltError> {
        for name in &self.called_templates {
            if !self.stylesheet.named_templates.contains_key(name) {
                return Err(XsltError::Compilation(format!(
                    "xsl:call-template refers to undefined template '{}'",
                    name
                )));
            }
        }
        for name in &self.used_attribute_sets {
            if !self.stylesheet.attribute_sets.contains_key(name) {
                return Err(XsltError::Compilation(format!(
                    "undefined attribute set '{}'",
                    name
                )));
            }
        }
        for rules in self.stylesheet.rules.values_mut() {
            // Highest import precedence, then highest priority; among equals the
            // rule declared last wins.
            rules.sort_by(|a, b| {
                b.precedence
                    .cmp(&a.precedence)
                    .then(b.priority.total_cmp(&a.priority))
                    .then(b.template.cmp(&a.template))
            });
        }
        self.finished = true;
        log::debug!(
            "compiled stylesheet: {} templates, {} globals, {} keys",
            self.stylesheet.templates.len(),
            self.stylesheet.globals.len(),
            self.stylesheet.keys.len()
        );
        Ok(())
    }
}

/// Compiles a parsed stylesheet document. Relative `xsl:include` and
/// `xsl:import` locations resolve against the current directory.
pub fn compile(tree: &Tree) -> Result<CompiledStylesheet, XsltError> {
    compile_module(tree, None)
}

/// Compiles a stylesheet read from `location`, which relative module locations
/// resolve against.
pub fn compile_module(
    tree: &Tree,
    location: Option<&Path>,
) -> Result<CompiledStylesheet, XsltError> {
    let path = location.map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()));
    let base = path
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let mut builder = CompilerBuilder::new();
    builder.modules.push(ModuleFrame {
        path,
        base,
        declared: false,
    });
    parse_stylesheet_content(tree, &mut builder)?;
    builder.finish()
}
