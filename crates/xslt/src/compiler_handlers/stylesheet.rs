//! Handlers for top-level stylesheet declarations.

use crate::ast::{
    AttributeSet, GlobalBinding, KeyDefinition, MatchRule, NamespaceAlias, OutputMethod,
    PreparsedTemplate, SpaceRule, TemplateRule, XsltInstruction,
};
use crate::compiler::{BodyItem, CompilerBuilder, item_name};
use crate::error::XsltError;
use crate::parser::ElementEvent;
use crate::pattern::NameTest;
use crate::util::split_qname;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use xform_xpath1::functions::expanded_name;
use xform_xpath1::{DecimalFormat, NamespaceMap};

/// How a declaration compares with an earlier one of the same name.
enum Redefinition {
    New,
    Replaces,
    Overridden,
}

/// Tracks the import precedence each name was declared with. Two declarations
/// at the same precedence conflict; otherwise the higher precedence wins.
fn redefinition<K: std::hash::Hash + Eq>(
    seen: &mut HashMap<K, usize>,
    key: K,
    precedence: usize,
) -> Option<Redefinition> {
    match seen.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(precedence);
            Some(Redefinition::New)
        }
        Entry::Occupied(mut slot) => match (*slot.get()).cmp(&precedence) {
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some(Redefinition::Overridden),
            std::cmp::Ordering::Less => {
                slot.insert(precedence);
                Some(Redefinition::Replaces)
            }
        },
    }
}

impl CompilerBuilder {
    pub(crate) fn handle_declaration(
        &mut self,
        event: ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<(), XsltError> {
        self.check_declaration_order(&event)?;
        match event.name.local.as_str() {
            "template" => self.handle_template(&event, items, ns),
            "variable" | "param" => self.handle_global(&event, items, ns),
            "output" => self.handle_output(&event),
            "strip-space" => self.handle_space(&event, ns, true),
            "preserve-space" => self.handle_space(&event, ns, false),
            "key" => self.handle_key(&event, ns),
            "attribute-set" => self.handle_attribute_set(&event, items),
            "decimal-format" => self.handle_decimal_format(&event, ns),
            "namespace-alias" => self.handle_namespace_alias(&event, ns),
            "import" => self.handle_module(&event, true),
            "include" => self.handle_module(&event, false),
            _ if self.forwards_compatible => {
                log::debug!("ignoring unknown declaration {}", event.display_name());
                Ok(())
            }
            _ => Err(XsltError::structure(
                event.display_name(),
                "unknown top-level XSLT element",
            )),
        }
    }

    fn handle_template(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<(), XsltError> {
        let name = Self::qname_attr(event, "name")?;
        let pattern = event
            .attr("match")
            .map(|p| self.pattern(p, ns))
            .transpose()?;
        if name.is_none() && pattern.is_none() {
            return Err(XsltError::structure(
                event.display_name(),
                "requires a match or a name attribute",
            ));
        }
        let mode = Self::qname_attr(event, "mode")?;
        if mode.is_some() && pattern.is_none() {
            log::warn!("mode on a template without a match pattern is ignored");
        }
        let priority = match event.attr("priority") {
            Some(text) => Some(text.trim().parse::<f64>().map_err(|_| {
                XsltError::structure(
                    event.display_name(),
                    format!("invalid priority '{}'", text),
                )
            })?),
            None => None,
        };

        let mut params = Vec::new();
        let mut body = Vec::new();
        for item in items {
            match item {
                BodyItem::Param(_) if !body.is_empty() => {
                    return Err(XsltError::structure(
                        event.display_name(),
                        "xsl:param must come before the other content",
                    ));
                }
                BodyItem::Param(param) => params.push(param),
                BodyItem::Instruction(i) => body.push(i),
                BodyItem::Fallback(_) => {}
                other => {
                    return Err(XsltError::structure(
                        event.display_name(),
                        format!("{} is not allowed here", item_name(&other)),
                    ));
                }
            }
        }

        let index = self.stylesheet.templates.len();
        let precedence = self.precedence;
        if let Some(name) = &name {
            match redefinition(&mut self.named_precedence, name.clone(), precedence) {
                None => {
                    return Err(XsltError::Compilation(format!(
                        "template '{}' is defined more than once",
                        name
                    )));
                }
                Some(Redefinition::Overridden) => {}
                Some(_) => {
                    self.stylesheet.named_templates.insert(name.clone(), index);
                }
            }
        }
        if let Some(pattern) = &pattern {
            let rules = self.stylesheet.rules.entry(mode.clone()).or_default();
            for alternative in pattern.alternatives() {
                rules.push(MatchRule {
                    priority: priority.unwrap_or_else(|| alternative.default_priority()),
                    precedence,
                    pattern: alternative,
                    template: index,
                });
            }
        }
        self.stylesheet.templates.push(TemplateRule {
            name,
            pattern,
            mode,
            priority,
            precedence,
            params,
            body: PreparsedTemplate(body),
        });
        Ok(())
    }

    fn handle_global(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<(), XsltError> {
        let name = Self::required_qname(event, "name")?;
        let value = self.variable_value(event, items, ns)?;
        let binding = GlobalBinding {
            name: name.clone(),
            value,
            is_param: event.name.local == "param",
        };
        match redefinition(&mut self.global_precedence, name.clone(), self.precedence) {
            None => Err(XsltError::Compilation(format!(
                "global variable '{}' is defined more than once",
                name
            ))),
            Some(Redefinition::New) => {
                self.stylesheet.globals.push(binding);
                Ok(())
            }
            Some(Redefinition::Replaces) => {
                self.stylesheet.globals.retain(|g| g.name != name);
                self.stylesheet.globals.push(binding);
                Ok(())
            }
            Some(Redefinition::Overridden) => Ok(()),
        }
    }

    fn handle_output(&mut self, event: &ElementEvent) -> Result<(), XsltError> {
        let output = &mut self.stylesheet.output;
        if let Some(method) = event.attr("method") {
            output.method = match method.trim() {
                "xml" => Some(OutputMethod::Xml),
                "html" => Some(OutputMethod::Html),
                "text" => Some(OutputMethod::Text),
                other if other.contains(':') => {
                    log::warn!("output method '{}' is not supported, using the default", other);
                    output.method
                }
                other => {
                    return Err(XsltError::structure(
                        event.display_name(),
                        format!("unknown output method '{}'", other),
                    ));
                }
            };
        }
        if let Some(indent) = Self::yes_no(event, "indent")? {
            output.indent = Some(indent);
        }
        if let Some(omit) = Self::yes_no(event, "omit-xml-declaration")? {
            output.omit_xml_declaration = omit;
        }
        if let Some(standalone) = Self::yes_no(event, "standalone")? {
            output.standalone = Some(standalone);
        }
        if let Some(encoding) = event.attr("encoding") {
            output.encoding = Some(encoding.trim().to_string());
        }
        if let Some(public) = event.attr("doctype-public") {
            output.doctype_public = Some(public.to_string());
        }
        if let Some(system) = event.attr("doctype-system") {
            output.doctype_system = Some(system.to_string());
        }
        Ok(())
    }

    fn handle_space(
        &mut self,
        event: &ElementEvent,
        ns: &NamespaceMap,
        strip: bool,
    ) -> Result<(), XsltError> {
        let elements = Self::required(event, "elements")?;
        let tests = NameTest::parse_list(elements, ns)
            .map_err(|message| XsltError::structure(event.display_name(), message))?;
        self.stylesheet
            .space_rules
            .extend(tests.into_iter().map(|test| SpaceRule { test, strip }));
        Ok(())
    }

    fn handle_key(&mut self, event: &ElementEvent, ns: &NamespaceMap) -> Result<(), XsltError> {
        let name = Self::required_qname(event, "name")?;
        let pattern = self.pattern(Self::required(event, "match")?, ns)?;
        let use_expr = self.required_expression(event, "use", ns)?;
        self.stylesheet.keys.push(KeyDefinition {
            name,
            pattern,
            use_expr,
        });
        Ok(())
    }

    fn handle_attribute_set(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
    ) -> Result<(), XsltError> {
        let name = Self::required_qname(event, "name")?;
        let mut attributes = Vec::new();
        for instruction in Self::instructions(event, items)?.0 {
            match instruction {
                XsltInstruction::Attribute { .. } => attributes.push(instruction),
                _ => {
                    return Err(XsltError::structure(
                        event.display_name(),
                        "may only contain xsl:attribute",
                    ));
                }
            }
        }
        let use_attribute_sets = self.attribute_set_list(event.attr("use-attribute-sets"));
        // Sets with the same name are merged.
        let set = self
            .stylesheet
            .attribute_sets
            .entry(name)
            .or_insert_with(AttributeSet::default);
        set.attributes.extend(attributes);
        set.use_attribute_sets.extend(use_attribute_sets);
        Ok(())
    }

    fn handle_decimal_format(
        &mut self,
        event: &ElementEvent,
        ns: &NamespaceMap,
    ) -> Result<(), XsltError> {
        let key = match Self::qname_attr(event, "name")? {
            Some(name) => Some(self.expanded_qname(event, &name, ns)?),
            None => None,
        };
        let mut format = DecimalFormat::default();
        for (attr, slot) in [
            ("decimal-separator", &mut format.decimal_separator),
            ("grouping-separator", &mut format.grouping_separator),
            ("minus-sign", &mut format.minus_sign),
            ("percent", &mut format.percent),
            ("per-mille", &mut format.per_mille),
            ("zero-digit", &mut format.zero_digit),
            ("digit", &mut format.digit),
            ("pattern-separator", &mut format.pattern_separator),
        ] {
            if let Some(value) = event.attr(attr) {
                let mut chars = value.chars();
                *slot = match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        return Err(XsltError::structure(
                            event.display_name(),
                            format!("attribute '{}' must be a single character", attr),
                        ));
                    }
                };
            }
        }
        if let Some(infinity) = event.attr("infinity") {
            format.infinity = infinity.to_string();
        }
        if let Some(nan) = event.attr("NaN") {
            format.nan = nan.to_string();
        }

        let existing = self.stylesheet.decimal_formats.get(&key);
        match redefinition(&mut self.decimal_format_precedence, key.clone(), self.precedence) {
            // Repeating an identical declaration is allowed.
            None if existing == Some(&format) => Ok(()),
            None => Err(XsltError::Compilation(format!(
                "decimal format '{}' is declared more than once with different values",
                key.as_deref().unwrap_or("#default")
            ))),
            Some(Redefinition::Overridden) => Ok(()),
            Some(_) => {
                self.stylesheet.decimal_formats.insert(key, format);
                Ok(())
            }
        }
    }

    fn expanded_qname(
        &self,
        event: &ElementEvent,
        name: &str,
        ns: &NamespaceMap,
    ) -> Result<String, XsltError> {
        let (prefix, local) = split_qname(name);
        match prefix {
            Some(prefix) => match ns.get(prefix) {
                Some(uri) => Ok(expanded_name(Some(uri.as_str()), local)),
                None => Err(XsltError::structure(
                    event.display_name(),
                    format!("prefix '{}' is not declared", prefix),
                )),
            },
            None => Ok(local.to_string()),
        }
    }

    fn handle_namespace_alias(
        &mut self,
        event: &ElementEvent,
        ns: &NamespaceMap,
    ) -> Result<(), XsltError> {
        let stylesheet_prefix = Self::required(event, "stylesheet-prefix")?;
        let result_prefix = Self::required(event, "result-prefix")?;
        let (stylesheet_uri, _) = self.alias_namespace(event, stylesheet_prefix, ns)?;
        let (result_uri, prefix) = self.alias_namespace(event, result_prefix, ns)?;
        match self.stylesheet.namespace_aliases.entry(stylesheet_uri) {
            Entry::Occupied(slot) if slot.get().uri != result_uri => {
                log::warn!(
                    "namespace alias for '{}' is declared more than once; the first one is used",
                    slot.key()
                );
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(NamespaceAlias {
                    prefix,
                    uri: result_uri,
                });
            }
        }
        Ok(())
    }

    /// Resolves a prefix of `xsl:namespace-alias`, where `#default` names the
    /// default namespace. The URI is empty for no namespace.
    fn alias_namespace(
        &self,
        event: &ElementEvent,
        prefix: &str,
        ns: &NamespaceMap,
    ) -> Result<(String, Option<String>), XsltError> {
        let prefix = prefix.trim();
        if prefix == "#default" {
            let uri = self.default_namespace(Some(event)).unwrap_or_default();
            return Ok((uri, None));
        }
        match ns.get(prefix) {
            Some(uri) => Ok((uri.clone(), Some(prefix.to_string()))),
            None => Err(XsltError::structure(
                event.display_name(),
                format!("prefix '{}' is not declared", prefix),
            )),
        }
    }

    /// A literal result element used as the whole stylesheet becomes the
    /// template for the root node.
    pub(crate) fn register_simplified(&mut self, items: Vec<BodyItem>) -> Result<(), XsltError> {
        let mut body = Vec::new();
        for item in items {
            if let BodyItem::Instruction(i) = item {
                body.push(i);
            }
        }
        let pattern = self.pattern("/", &NamespaceMap::new())?;
        let index = self.stylesheet.templates.len();
        self.stylesheet
            .rules
            .entry(None)
            .or_default()
            .push(MatchRule {
                priority: pattern.default_priority(),
                precedence: self.precedence,
                pattern: pattern.clone(),
                template: index,
            });
        self.stylesheet.templates.push(TemplateRule {
            name: None,
            pattern: Some(pattern),
            mode: None,
            priority: None,
            precedence: self.precedence,
            params: Vec::new(),
            body: PreparsedTemplate(body),
        });
        Ok(())
    }
}
