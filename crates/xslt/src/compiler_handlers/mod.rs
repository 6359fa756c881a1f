pub(super) mod control_flow;
pub(super) mod instructions;
pub(super) mod modules;
pub(super) mod stylesheet;
pub(super) mod variables;

use crate::ast::{AttributeValueTemplate, XsltInstruction};
use crate::compiler::{BodyItem, CompilerBuilder, ElementKind, OpenElement};
use crate::error::XsltError;
use crate::parser::ElementEvent;
use crate::util::is_qname;
use xform_xpath1::functions::XSLT_NAMESPACE;
use xform_xpath1::{Expression, NamespaceMap};

// Dispatch and attribute helpers shared by every handler.
// They are implemented as methods on CompilerBuilder.

impl CompilerBuilder {
    pub(crate) fn finish_element(
        &mut self,
        element: OpenElement,
        namespaces: &NamespaceMap,
    ) -> Result<Vec<BodyItem>, XsltError> {
        let OpenElement { event, kind, items, .. } = element;
        match kind {
            ElementKind::Stylesheet => Ok(Vec::new()),
            ElementKind::Literal => Ok(vec![self.handle_literal_result_element(event, items)?]),
            ElementKind::Xslt if self.parent_kind() == Some(ElementKind::Stylesheet) => {
                self.handle_declaration(event, items, namespaces)?;
                Ok(Vec::new())
            }
            ElementKind::Xslt => self.handle_instruction(event, items, namespaces),
        }
    }

    fn handle_instruction(
        &mut self,
        event: ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<Vec<BodyItem>, XsltError> {
        let item = match event.name.local.as_str() {
            "apply-templates" => self.handle_apply_templates(&event, items, ns)?,
            "apply-imports" => BodyItem::Instruction(XsltInstruction::ApplyImports),
            "call-template" => self.handle_call_template(&event, items)?,
            "for-each" => self.handle_for_each(&event, items, ns)?,
            "if" => self.handle_if(&event, items, ns)?,
            "choose" => self.handle_choose(&event, items)?,
            "when" => self.handle_when(&event, items, ns)?,
            "otherwise" => self.handle_otherwise(&event, items)?,
            "sort" => self.handle_sort(&event, ns)?,
            "fallback" => BodyItem::Fallback(Self::instructions(&event, items)?),
            "message" => self.handle_message(&event, items)?,
            "text" => match self.handle_text(&event, items)? {
                Some(item) => item,
                None => return Ok(Vec::new()),
            },
            "value-of" => self.handle_value_of(&event, ns)?,
            "copy" => self.handle_copy(&event, items)?,
            "copy-of" => self.handle_copy_of(&event, ns)?,
            "element" => self.handle_element(&event, items, ns)?,
            "attribute" => self.handle_attribute(&event, items, ns)?,
            "comment" => self.handle_comment(&event, items)?,
            "processing-instruction" => self.handle_processing_instruction(&event, items, ns)?,
            "number" => self.handle_number(&event, ns)?,
            "variable" => self.handle_local_variable(&event, items, ns)?,
            "param" => self.handle_param(&event, items, ns)?,
            "with-param" => self.handle_with_param(&event, items, ns)?,
            _ => return self.handle_unknown_instruction(&event, items),
        };
        Ok(vec![item])
    }

    /// An XSLT element this processor does not know. In forwards-compatible mode
    /// its `xsl:fallback` children run instead.
    fn handle_unknown_instruction(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
    ) -> Result<Vec<BodyItem>, XsltError> {
        if !self.forwards_compatible {
            return Err(XsltError::structure(
                event.display_name(),
                "unknown XSLT instruction",
            ));
        }
        log::debug!("{} is unknown; using its fallback", event.display_name());
        Ok(items
            .into_iter()
            .filter_map(|item| match item {
                BodyItem::Fallback(body) => Some(body.0),
                _ => None,
            })
            .flatten()
            .map(BodyItem::Instruction)
            .collect())
    }

    pub(crate) fn handle_literal_result_element(
        &mut self,
        event: ElementEvent,
        items: Vec<BodyItem>,
    ) -> Result<BodyItem, XsltError> {
        let namespaces = self.in_scope_namespaces(Some(&event));
        let mut attributes = Vec::with_capacity(event.attributes.len());
        for (name, value) in &event.attributes {
            if name.namespace.as_deref() == Some(XSLT_NAMESPACE) {
                continue;
            }
            attributes.push((name.clone(), self.avt(value, &namespaces)?));
        }
        let use_attribute_sets = self.attribute_set_list(
            event.attr_ns(XSLT_NAMESPACE, "use-attribute-sets"),
        );
        let body = Self::instructions(&event, items)?;
        let literal_namespaces = self.literal_namespaces(&event);
        Ok(BodyItem::Instruction(XsltInstruction::LiteralElement {
            name: event.name,
            namespaces: literal_namespaces,
            attributes,
            use_attribute_sets,
            body,
        }))
    }

    /// Namespace nodes a literal result element carries into the output: all
    /// bindings in scope except the XSLT namespace and excluded ones.
    fn literal_namespaces(&self, event: &ElementEvent) -> Vec<(Option<String>, String)> {
        let mut bindings: Vec<(Option<String>, String)> = Vec::new();
        let events = self.open.iter().map(|o| &o.event).chain(Some(event));
        for declared in events {
            for (prefix, uri) in &declared.namespaces {
                bindings.retain(|(p, _)| p != prefix);
                bindings.push((prefix.clone(), uri.clone()));
            }
        }
        bindings.retain(|(_, uri)| {
            !uri.is_empty() && uri != XSLT_NAMESPACE && !self.excluded_namespaces.contains(uri)
        });
        bindings
    }

    pub(crate) fn required<'e>(
        event: &'e ElementEvent,
        attr: &str,
    ) -> Result<&'e str, XsltError> {
        event.attr(attr).ok_or_else(|| {
            XsltError::structure(
                event.display_name(),
                format!("missing required attribute '{}'", attr),
            )
        })
    }

    pub(crate) fn required_expression(
        &self,
        event: &ElementEvent,
        attr: &str,
        ns: &NamespaceMap,
    ) -> Result<Expression, XsltError> {
        let text = Self::required(event, attr)?;
        self.expression(text, ns)
    }

    pub(crate) fn optional_expression(
        &self,
        event: &ElementEvent,
        attr: &str,
        ns: &NamespaceMap,
    ) -> Result<Option<Expression>, XsltError> {
        event
            .attr(attr)
            .map(|text| self.expression(text, ns))
            .transpose()
    }

    pub(crate) fn optional_avt(
        &self,
        event: &ElementEvent,
        attr: &str,
        ns: &NamespaceMap,
    ) -> Result<Option<AttributeValueTemplate>, XsltError> {
        event.attr(attr).map(|text| self.avt(text, ns)).transpose()
    }

    /// A `name`-like attribute that must be a QName, such as a template or mode name.
    pub(crate) fn qname_attr(event: &ElementEvent, attr: &str) -> Result<Option<String>, XsltError> {
        match event.attr(attr) {
            Some(value) if is_qname(value.trim()) => Ok(Some(value.trim().to_string())),
            Some(value) => Err(XsltError::structure(
                event.display_name(),
                format!("'{}' is not a valid name for attribute '{}'", value, attr),
            )),
            None => Ok(None),
        }
    }

    pub(crate) fn required_qname(event: &ElementEvent, attr: &str) -> Result<String, XsltError> {
        Self::qname_attr(event, attr)?.ok_or_else(|| {
            XsltError::structure(
                event.display_name(),
                format!("missing required attribute '{}'", attr),
            )
        })
    }

    /// A `yes`/`no` attribute.
    pub(crate) fn yes_no(event: &ElementEvent, attr: &str) -> Result<Option<bool>, XsltError> {
        match event.attr(attr).map(str::trim) {
            Some("yes") => Ok(Some(true)),
            Some("no") => Ok(Some(false)),
            Some(other) => Err(XsltError::structure(
                event.display_name(),
                format!("attribute '{}' must be 'yes' or 'no', not '{}'", attr, other),
            )),
            None => Ok(None),
        }
    }

    /// Splits a `use-attribute-sets` value and remembers the names for the
    /// end-of-stylesheet check.
    pub(crate) fn attribute_set_list(&mut self, value: Option<&str>) -> Vec<String> {
        let names: Vec<String> = value
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        for name in &names {
            if !self.used_attribute_sets.contains(name) {
                self.used_attribute_sets.push(name.clone());
            }
        }
        names
    }
}

