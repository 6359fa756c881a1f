use crate::ast::{
    AttributeValueTemplate, ComputedName, NamespaceAlias, PreparsedTemplate, XsltInstruction,
};
use crate::error::ExecutionError;
use crate::executor::{Focus, TemplateExecutor};
use crate::output::OutputBuilder;
use crate::util::{is_ncname, is_qname, split_qname};
use std::borrow::Cow;
use std::collections::HashMap;
use xform_dom::Name;
use xform_xpath1::DataSourceNode;
use xform_xpath1::functions::XML_NAMESPACE;

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_literal_element<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &Name,
    namespaces: &[(Option<String>, String)],
    attributes: &[(Name, AttributeValueTemplate)],
    use_attribute_sets: &'s [String],
    body: &'s PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let stylesheet = executor.stylesheet;
    let aliases = &stylesheet.namespace_aliases;
    builder.start_element(&aliased_name(aliases, name));
    for (prefix, uri) in namespaces {
        let (prefix, uri) = match aliases.get(uri) {
            Some(alias) => (alias.prefix.as_deref(), alias.uri.as_str()),
            None => (prefix.as_deref(), uri.as_str()),
        };
        if !uri.is_empty() {
            builder.add_namespace(prefix, uri);
        }
    }
    // Attributes from sets come first so literal attributes override them.
    apply_attribute_sets(executor, use_attribute_sets, focus, builder)?;
    for (attr_name, avt) in attributes {
        let value = executor.evaluate_avt(avt, focus)?;
        let attr_name = match attr_name.namespace {
            Some(_) => aliased_name(aliases, attr_name),
            None => Cow::Borrowed(attr_name),
        };
        builder.set_attribute(&attr_name, &value);
    }
    executor.execute_template(body, focus, builder)?;
    builder.end_element();
    Ok(())
}

/// The name a literal result element or attribute is written with once
/// `xsl:namespace-alias` declarations are applied.
fn aliased_name<'n>(aliases: &HashMap<String, NamespaceAlias>, name: &'n Name) -> Cow<'n, Name> {
    let uri = name.namespace.as_deref().unwrap_or("");
    match aliases.get(uri) {
        Some(alias) => Cow::Owned(Name {
            prefix: alias.prefix.clone(),
            local: name.local.clone(),
            namespace: Some(alias.uri.clone()).filter(|u| !u.is_empty()),
        }),
        None => Cow::Borrowed(name),
    }
}

pub(crate) fn handle_element<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &ComputedName,
    use_attribute_sets: &'s [String],
    body: &'s PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let name = resolve_name(executor, name, focus, "element")?;
    builder.start_element(&name);
    apply_attribute_sets(executor, use_attribute_sets, focus, builder)?;
    executor.execute_template(body, focus, builder)?;
    builder.end_element();
    Ok(())
}

pub(crate) fn handle_attribute<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &ComputedName,
    body: &'s PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let name = resolve_name(executor, name, focus, "attribute")?;
    if name.prefix.is_none() && name.local == "xmlns" {
        log::warn!("xsl:attribute cannot create a namespace declaration; ignored");
        return Ok(());
    }
    let value = executor.instantiate_to_string(body, focus)?;
    builder.set_attribute(&name, &value);
    Ok(())
}

pub(crate) fn handle_comment<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    body: &'s PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let mut text = executor.instantiate_to_string(body, focus)?;
    // A comment must not contain "--" or end with "-".
    while text.contains("--") {
        text = text.replace("--", "- -");
    }
    if text.ends_with('-') {
        text.push(' ');
    }
    builder.add_comment(&text);
    Ok(())
}

pub(crate) fn handle_processing_instruction<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &AttributeValueTemplate,
    body: &'s PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let target = executor.evaluate_avt(name, focus)?;
    let target = target.trim();
    if !is_ncname(target) || target.eq_ignore_ascii_case("xml") {
        return Err(ExecutionError::Runtime(format!(
            "'{}' is not a valid processing instruction target",
            target
        )));
    }
    let data = executor
        .instantiate_to_string(body, focus)?
        .replace("?>", "? >");
    builder.add_processing_instruction(target, &data);
    Ok(())
}

/// Adds the attributes of the named sets, including the sets they use.
pub(crate) fn apply_attribute_sets<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    names: &'s [String],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let mut active = Vec::new();
    apply_sets(executor, names, focus, builder, &mut active)
}

fn apply_sets<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    names: &'s [String],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
    active: &mut Vec<&'s str>,
) -> Result<(), ExecutionError> {
    for name in names {
        if active.contains(&name.as_str()) {
            return Err(ExecutionError::Runtime(format!(
                "attribute set '{}' uses itself",
                name
            )));
        }
        let stylesheet = executor.stylesheet;
        let Some(set) = stylesheet.attribute_sets.get(name) else {
            return Err(ExecutionError::Runtime(format!(
                "undefined attribute set '{}'",
                name
            )));
        };
        active.push(name);
        apply_sets(executor, &set.use_attribute_sets, focus, builder, active)?;
        for instruction in &set.attributes {
            if let XsltInstruction::Attribute { name, body } = instruction {
                handle_attribute(executor, name, body, focus, builder)?;
            }
        }
        active.pop();
    }
    Ok(())
}

fn resolve_name<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &TemplateExecutor<'s, 'a, N>,
    name: &ComputedName,
    focus: Focus<N>,
    what: &str,
) -> Result<Name, ExecutionError> {
    let qname = executor.evaluate_avt(&name.name, focus)?;
    let qname = qname.trim();
    if !is_qname(qname) {
        return Err(ExecutionError::Runtime(format!(
            "'{}' is not a valid {} name",
            qname, what
        )));
    }
    let (prefix, local) = split_qname(qname);
    let namespace = match (&name.namespace, prefix) {
        (Some(avt), _) => Some(executor.evaluate_avt(avt, focus)?).filter(|uri| !uri.is_empty()),
        (None, Some("xml")) => Some(XML_NAMESPACE.to_string()),
        (None, Some(p)) => Some(name.in_scope.get(p).cloned().ok_or_else(|| {
            ExecutionError::Runtime(format!("prefix '{}' is not declared", p))
        })?),
        (None, None) => None,
    };
    Ok(Name {
        // A prefix with no namespace would be unbound in the output.
        prefix: prefix.filter(|_| namespace.is_some()).map(str::to_string),
        local: local.to_string(),
        namespace,
    })
}
