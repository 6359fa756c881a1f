//! Handlers for `<xsl:variable>`, `<xsl:param>`, and `<xsl:with-param>`.

use crate::ast::{Param, VariableValue, WithParam, XsltInstruction};
use crate::compiler::{BodyItem, CompilerBuilder};
use crate::error::XsltError;
use crate::parser::ElementEvent;
use xform_xpath1::NamespaceMap;

impl CompilerBuilder {
    /// The value of a binding element: `select` or its content, never both.
    pub(crate) fn variable_value(
        &self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<VariableValue, XsltError> {
        let select = self.optional_expression(event, "select", ns)?;
        let content = Self::instructions(event, items)?;
        match (select, content.0.is_empty()) {
            (Some(_), false) => Err(XsltError::structure(
                event.display_name(),
                "must not have both a select attribute and content",
            )),
            (Some(expr), true) => Ok(VariableValue::Select(expr)),
            (None, false) => Ok(VariableValue::Content(content)),
            (None, true) => Ok(VariableValue::Empty),
        }
    }

    pub(crate) fn handle_local_variable(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        Ok(BodyItem::Instruction(XsltInstruction::Variable {
            name: Self::required_qname(event, "name")?,
            value: self.variable_value(event, items, ns)?,
        }))
    }

    pub(crate) fn handle_param(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        self.expect_parent(event, "template")?;
        Ok(BodyItem::Param(Param {
            name: Self::required_qname(event, "name")?,
            default: self.variable_value(event, items, ns)?,
        }))
    }

    pub(crate) fn handle_with_param(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        if !self.parent_is_xslt("call-template") && !self.parent_is_xslt("apply-templates") {
            return Err(XsltError::structure(
                event.display_name(),
                "only allowed in xsl:call-template or xsl:apply-templates",
            ));
        }
        Ok(BodyItem::WithParam(WithParam {
            name: Self::required_qname(event, "name")?,
            value: self.variable_value(event, items, ns)?,
        }))
    }
}
