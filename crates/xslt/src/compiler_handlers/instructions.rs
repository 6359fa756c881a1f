//! Handlers for instructions that write to the result tree.

use crate::ast::{
    AttributeValueTemplate, ComputedName, NumberInstruction, NumberLevel, XsltInstruction,
};
use crate::compiler::{BodyItem, CompilerBuilder};
use crate::error::XsltError;
use crate::parser::ElementEvent;
use xform_xpath1::NamespaceMap;

impl CompilerBuilder {
    /// `xsl:text` yields nothing when it is empty.
    pub(crate) fn handle_text(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
    ) -> Result<Option<BodyItem>, XsltError> {
        let disable_escaping = Self::yes_no(event, "disable-output-escaping")?.unwrap_or(false);
        let mut text = String::new();
        for instruction in Self::instructions(event, items)?.0 {
            match instruction {
                XsltInstruction::Text { text: t, .. } => text.push_str(&t),
                _ => {
                    return Err(XsltError::structure(
                        event.display_name(),
                        "may only contain character data",
                    ));
                }
            }
        }
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(BodyItem::Instruction(XsltInstruction::Text {
            text,
            disable_escaping,
        })))
    }

    pub(crate) fn handle_value_of(
        &mut self,
        event: &ElementEvent,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        Ok(BodyItem::Instruction(XsltInstruction::ValueOf {
            select: self.required_expression(event, "select", ns)?,
            disable_escaping: Self::yes_no(event, "disable-output-escaping")?.unwrap_or(false),
        }))
    }

    pub(crate) fn handle_copy(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
    ) -> Result<BodyItem, XsltError> {
        let use_attribute_sets = self.attribute_set_list(event.attr("use-attribute-sets"));
        Ok(BodyItem::Instruction(XsltInstruction::Copy {
            use_attribute_sets,
            body: Self::instructions(event, items)?,
        }))
    }

    pub(crate) fn handle_copy_of(
        &mut self,
        event: &ElementEvent,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        Ok(BodyItem::Instruction(XsltInstruction::CopyOf {
            select: self.required_expression(event, "select", ns)?,
        }))
    }

    fn computed_name(
        &self,
        event: &ElementEvent,
        ns: &NamespaceMap,
    ) -> Result<ComputedName, XsltError> {
        let name = self.avt(Self::required(event, "name")?, ns)?;
        if let Some(literal) = name.as_static()
            && !crate::util::is_qname(literal.trim())
        {
            return Err(XsltError::structure(
                event.display_name(),
                format!("'{}' is not a valid name", literal),
            ));
        }
        Ok(ComputedName {
            name,
            namespace: self.optional_avt(event, "namespace", ns)?,
            in_scope: ns.clone(),
        })
    }

    pub(crate) fn handle_element(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        let name = self.computed_name(event, ns)?;
        let use_attribute_sets = self.attribute_set_list(event.attr("use-attribute-sets"));
        Ok(BodyItem::Instruction(XsltInstruction::Element {
            name,
            use_attribute_sets,
            body: Self::instructions(event, items)?,
        }))
    }

    pub(crate) fn handle_attribute(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        let name = self.computed_name(event, ns)?;
        if name.namespace.is_none() && name.name.as_static().as_deref() == Some("xmlns") {
            return Err(XsltError::structure(
                event.display_name(),
                "cannot create a namespace declaration",
            ));
        }
        Ok(BodyItem::Instruction(XsltInstruction::Attribute {
            name,
            body: Self::instructions(event, items)?,
        }))
    }

    pub(crate) fn handle_comment(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
    ) -> Result<BodyItem, XsltError> {
        Ok(BodyItem::Instruction(XsltInstruction::Comment {
            body: Self::instructions(event, items)?,
        }))
    }

    pub(crate) fn handle_processing_instruction(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        Ok(BodyItem::Instruction(XsltInstruction::ProcessingInstruction {
            name: self.avt(Self::required(event, "name")?, ns)?,
            body: Self::instructions(event, items)?,
        }))
    }

    pub(crate) fn handle_number(
        &mut self,
        event: &ElementEvent,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        let level = match event.attr("level").map(str::trim) {
            None | Some("single") => NumberLevel::Single,
            Some("multiple") => NumberLevel::Multiple,
            Some("any") => NumberLevel::Any,
            Some(other) => {
                return Err(XsltError::structure(
                    event.display_name(),
                    format!("unsupported level '{}'", other),
                ));
            }
        };
        let count = event
            .attr("count")
            .map(|p| self.pattern(p, ns))
            .transpose()?;
        let from = event
            .attr("from")
            .map(|p| self.pattern(p, ns))
            .transpose()?;
        let format = self
            .optional_avt(event, "format", ns)?
            .unwrap_or_else(|| AttributeValueTemplate::literal("1"));
        Ok(BodyItem::Instruction(XsltInstruction::Number(
            NumberInstruction {
                level,
                count,
                from,
                value: self.optional_expression(event, "value", ns)?,
                format,
            },
        )))
    }
}
