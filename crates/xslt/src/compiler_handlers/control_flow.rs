//! Handlers for template application, iteration, and conditional instructions.

use crate::ast::{PreparsedTemplate, SortDataType, SortKey, SortOrder, When, XsltInstruction};
use crate::compiler::{BodyItem, CompilerBuilder, item_name};
use crate::error::XsltError;
use crate::parser::ElementEvent;
use xform_xpath1::NamespaceMap;

impl CompilerBuilder {
    pub(crate) fn handle_apply_templates(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        let select = self.optional_expression(event, "select", ns)?;
        let mode = Self::qname_attr(event, "mode")?;
        let mut sort_keys = Vec::new();
        let mut params = Vec::new();
        for item in items {
            match item {
                BodyItem::Sort(key) => sort_keys.push(key),
                BodyItem::WithParam(param) => params.push(param),
                other => return Err(not_allowed(event, &other)),
            }
        }
        Ok(BodyItem::Instruction(XsltInstruction::ApplyTemplates {
            select,
            mode,
            sort_keys,
            params,
        }))
    }

    pub(crate) fn handle_call_template(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
    ) -> Result<BodyItem, XsltError> {
        let name = Self::required_qname(event, "name")?;
        let mut params = Vec::new();
        for item in items {
            match item {
                BodyItem::WithParam(param) => params.push(param),
                other => return Err(not_allowed(event, &other)),
            }
        }
        if !self.called_templates.contains(&name) {
            self.called_templates.push(name.clone());
        }
        Ok(BodyItem::Instruction(XsltInstruction::CallTemplate {
            name,
            params,
        }))
    }

    pub(crate) fn handle_for_each(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        let select = self.required_expression(event, "select", ns)?;
        let mut sort_keys = Vec::new();
        let mut body = Vec::new();
        for item in items {
            match item {
                BodyItem::Sort(_) if !body.is_empty() => {
                    return Err(XsltError::structure(
                        event.display_name(),
                        "xsl:sort must come before the other content",
                    ));
                }
                BodyItem::Sort(key) => sort_keys.push(key),
                BodyItem::Instruction(i) => body.push(i),
                BodyItem::Fallback(_) => {}
                other => return Err(not_allowed(event, &other)),
            }
        }
        Ok(BodyItem::Instruction(XsltInstruction::ForEach {
            select,
            sort_keys,
            body: PreparsedTemplate(body),
        }))
    }

    pub(crate) fn handle_if(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        Ok(BodyItem::Instruction(XsltInstruction::If {
            test: self.required_expression(event, "test", ns)?,
            body: Self::instructions(event, items)?,
        }))
    }

    pub(crate) fn handle_choose(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
    ) -> Result<BodyItem, XsltError> {
        let mut whens = Vec::new();
        let mut otherwise = None;
        for item in items {
            match item {
                BodyItem::When(_) | BodyItem::Otherwise(_) if otherwise.is_some() => {
                    return Err(XsltError::structure(
                        event.display_name(),
                        "xsl:otherwise must be the last child",
                    ));
                }
                BodyItem::When(when) => whens.push(when),
                BodyItem::Otherwise(body) => otherwise = Some(body),
                other => return Err(not_allowed(event, &other)),
            }
        }
        if whens.is_empty() {
            return Err(XsltError::structure(
                event.display_name(),
                "requires at least one xsl:when",
            ));
        }
        Ok(BodyItem::Instruction(XsltInstruction::Choose { whens, otherwise }))
    }

    pub(crate) fn handle_when(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        self.expect_parent(event, "choose")?;
        Ok(BodyItem::When(When {
            test: self.required_expression(event, "test", ns)?,
            body: Self::instructions(event, items)?,
        }))
    }

    pub(crate) fn handle_otherwise(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
    ) -> Result<BodyItem, XsltError> {
        self.expect_parent(event, "choose")?;
        Ok(BodyItem::Otherwise(Self::instructions(event, items)?))
    }

    pub(crate) fn handle_sort(
        &mut self,
        event: &ElementEvent,
        ns: &NamespaceMap,
    ) -> Result<BodyItem, XsltError> {
        if !self.parent_is_xslt("for-each") && !self.parent_is_xslt("apply-templates") {
            return Err(XsltError::structure(
                event.display_name(),
                "only allowed in xsl:for-each or xsl:apply-templates",
            ));
        }
        let select = self.expression(event.attr("select").unwrap_or("."), ns)?;
        let order = match event.attr("order").map(str::trim) {
            None | Some("ascending") => SortOrder::Ascending,
            Some("descending") => SortOrder::Descending,
            Some(other) => {
                return Err(XsltError::structure(
                    event.display_name(),
                    format!("unsupported order '{}'", other),
                ));
            }
        };
        let data_type = match event.attr("data-type").map(str::trim) {
            None | Some("text") => SortDataType::Text,
            Some("number") => SortDataType::Number,
            Some(other) => {
                // A prefixed data type is implementation-defined; sort as text.
                log::warn!("unsupported sort data-type '{}', sorting as text", other);
                SortDataType::Text
            }
        };
        Ok(BodyItem::Sort(SortKey {
            select,
            order,
            data_type,
        }))
    }

    pub(crate) fn handle_message(
        &mut self,
        event: &ElementEvent,
        items: Vec<BodyItem>,
    ) -> Result<BodyItem, XsltError> {
        Ok(BodyItem::Instruction(XsltInstruction::Message {
            body: Self::instructions(event, items)?,
            terminate: Self::yes_no(event, "terminate")?.unwrap_or(false),
        }))
    }

    pub(crate) fn expect_parent(&self, event: &ElementEvent, parent: &str) -> Result<(), XsltError> {
        if self.parent_is_xslt(parent) {
            Ok(())
        } else {
            Err(XsltError::structure(
                event.display_name(),
                format!("only allowed as a child of xsl:{}", parent),
            ))
        }
    }
}

fn not_allowed(event: &ElementEvent, item: &BodyItem) -> XsltError {
    XsltError::structure(
        event.display_name(),
        format!("{} is not allowed here", item_name(item)),
    )
}
