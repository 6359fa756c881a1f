//! The compiled form of a stylesheet.
//!
//! Everything here is immutable after compilation and free of interior
//! mutability, so a [`CompiledStylesheet`] can be shared across threads.

use crate::pattern::{NameTest, Pattern};
use std::collections::HashMap;
use xform_dom::Name;
use xform_xpath1::{DecimalFormats, Expression, NamespaceMap};

/// A part of an attribute value template.
#[derive(Debug, Clone, PartialEq)]
pub enum AvtPart {
    Static(String),
    Dynamic(Expression),
}

/// An attribute value such as `row-{position()}`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValueTemplate(pub Vec<AvtPart>);

impl AttributeValueTemplate {
    pub fn literal(text: impl Into<String>) -> Self {
        AttributeValueTemplate(vec![AvtPart::Static(text.into())])
    }

    /// The value when the template has no expressions in it.
    pub fn as_static(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.0 {
            match part {
                AvtPart::Static(s) => out.push_str(s),
                AvtPart::Dynamic(_) => return None,
            }
        }
        Some(out)
    }
}

/// A sequence of instructions, the body of a template or of an instruction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparsedTemplate(pub Vec<XsltInstruction>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDataType {
    Text,
    Number,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub select: Expression,
    pub order: SortOrder,
    pub data_type: SortDataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct When {
    pub test: Expression,
    pub body: PreparsedTemplate,
}

/// How a variable, parameter or `xsl:with-param` gets its value.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Select(Expression),
    /// Content that is instantiated into a result tree fragment.
    Content(PreparsedTemplate),
    /// Neither `select` nor content: the empty string.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithParam {
    pub name: String,
    pub value: VariableValue,
}

/// A template parameter with its default.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: VariableValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberLevel {
    Single,
    Multiple,
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberInstruction {
    pub level: NumberLevel,
    pub count: Option<Pattern>,
    pub from: Option<Pattern>,
    pub value: Option<Expression>,
    pub format: AttributeValueTemplate,
}

/// A name computed at run time, for `xsl:element` and `xsl:attribute`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedName {
    pub name: AttributeValueTemplate,
    pub namespace: Option<AttributeValueTemplate>,
    /// Bindings in scope where the instruction appeared, used to resolve a prefix
    /// in the computed name.
    pub in_scope: NamespaceMap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XsltInstruction {
    Text {
        text: String,
        disable_escaping: bool,
    },
    LiteralElement {
        name: Name,
        namespaces: Vec<(Option<String>, String)>,
        attributes: Vec<(Name, AttributeValueTemplate)>,
        use_attribute_sets: Vec<String>,
        body: PreparsedTemplate,
    },
    ApplyTemplates {
        select: Option<Expression>,
        mode: Option<String>,
        sort_keys: Vec<SortKey>,
        params: Vec<WithParam>,
    },
    ApplyImports,
    CallTemplate {
        name: String,
        params: Vec<WithParam>,
    },
    ForEach {
        select: Expression,
        sort_keys: Vec<SortKey>,
        body: PreparsedTemplate,
    },
    If {
        test: Expression,
        body: PreparsedTemplate,
    },
    Choose {
        whens: Vec<When>,
        otherwise: Option<PreparsedTemplate>,
    },
    ValueOf {
        select: Expression,
        disable_escaping: bool,
    },
    Copy {
        use_attribute_sets: Vec<String>,
        body: PreparsedTemplate,
    },
    CopyOf {
        select: Expression,
    },
    Element {
        name: ComputedName,
        use_attribute_sets: Vec<String>,
        body: PreparsedTemplate,
    },
    Attribute {
        name: ComputedName,
        body: PreparsedTemplate,
    },
    Comment {
        body: PreparsedTemplate,
    },
    ProcessingInstruction {
        name: AttributeValueTemplate,
        body: PreparsedTemplate,
    },
    Variable {
        name: String,
        value: VariableValue,
    },
    Number(NumberInstruction),
    Message {
        body: PreparsedTemplate,
        terminate: bool,
    },
}

/// An `xsl:template` element.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRule {
    pub name: Option<String>,
    pub pattern: Option<Pattern>,
    pub mode: Option<String>,
    pub priority: Option<f64>,
    /// Import precedence of the module that declared the template; higher wins.
    pub precedence: usize,
    pub params: Vec<Param>,
    pub body: PreparsedTemplate,
}

/// One alternative of a template's match pattern, ready for rule selection.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRule {
    pub pattern: Pattern,
    pub priority: f64,
    pub precedence: usize,
    /// Index into [`CompiledStylesheet::templates`].
    pub template: usize,
}

/// A top-level `xsl:variable` or `xsl:param`.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalBinding {
    pub name: String,
    pub value: VariableValue,
    pub is_param: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyDefinition {
    pub name: String,
    pub pattern: Pattern,
    pub use_expr: Expression,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    pub attributes: Vec<XsltInstruction>,
    pub use_attribute_sets: Vec<String>,
}

/// An `xsl:strip-space` or `xsl:preserve-space` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceRule {
    pub test: NameTest,
    pub strip: bool,
}

/// The namespace an `xsl:namespace-alias` puts literal result elements in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceAlias {
    pub prefix: Option<String>,
    /// Empty for no namespace.
    pub uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMethod {
    Xml,
    Html,
    Text,
}

/// The merged `xsl:output` declarations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputSettings {
    /// `None` means the method is chosen from the result tree.
    pub method: Option<OutputMethod>,
    pub indent: Option<bool>,
    pub omit_xml_declaration: bool,
    pub encoding: Option<String>,
    pub doctype_public: Option<String>,
    pub doctype_system: Option<String>,
    pub standalone: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct CompiledStylesheet {
    pub templates: Vec<TemplateRule>,
    pub named_templates: HashMap<String, usize>,
    /// Match rules per mode, best candidates first.
    pub rules: HashMap<Option<String>, Vec<MatchRule>>,
    pub globals: Vec<GlobalBinding>,
    pub keys: Vec<KeyDefinition>,
    pub attribute_sets: HashMap<String, AttributeSet>,
    pub space_rules: Vec<SpaceRule>,
    pub output: OutputSettings,
    /// Prefixes available to XPath expressions at run time.
    pub namespaces: NamespaceMap,
    pub decimal_formats: DecimalFormats,
    /// Result namespaces keyed by the stylesheet namespace URI they replace,
    /// empty for no namespace.
    pub namespace_aliases: HashMap<String, NamespaceAlias>,
}

impl CompiledStylesheet {
    /// Whether whitespace-only text children of an element named `name` are removed
    /// from the source before processing.
    pub fn strips_whitespace_in(&self, name: &Name) -> bool {
        let mut best: Option<(f64, bool)> = None;
        for rule in &self.space_rules {
            if !rule.test.matches_name(name) {
                continue;
            }
            let priority = rule.test.default_priority();
            // Later declarations win ties.
            if best.is_none_or(|(p, _)| priority >= p) {
                best = Some((priority, rule.strip));
            }
        }
        best.is_some_and(|(_, strip)| strip)
    }

    pub fn has_space_rules(&self) -> bool {
        self.space_rules.iter().any(|r| r.strip)
    }
}
