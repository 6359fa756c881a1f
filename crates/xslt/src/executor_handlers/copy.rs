use crate::ast::PreparsedTemplate;
use crate::error::ExecutionError;
use crate::executor::{Focus, TemplateExecutor, node_name};
use crate::executor_handlers::literals::apply_attribute_sets;
use crate::output::OutputBuilder;
use xform_xpath1::{DataSourceNode, Expression, NodeType, XPathValue};

pub(crate) fn handle_copy_of<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    select: &Expression,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    // A variable bound to content copies the markup, not just its string value.
    if let Expression::Variable(name) = select
        && let Some(fragment) = executor.variable_fragment(name)
    {
        fragment.replay(builder);
        return Ok(());
    }
    match executor.evaluate(select, focus)? {
        XPathValue::NodeSet(nodes) => {
            for node in nodes {
                copy_node_deep(node, builder);
            }
        }
        other => builder.add_text(&other.to_string(), false),
    }
    Ok(())
}

pub(crate) fn handle_copy<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    use_attribute_sets: &'s [String],
    body: &'s PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let node = focus.node;
    match node.node_type() {
        NodeType::Root => executor.execute_template(body, focus, builder),
        NodeType::Element => {
            let Some(name) = node_name(&node) else {
                return Ok(());
            };
            builder.start_element(&name);
            copy_namespaces(node, builder);
            apply_attribute_sets(executor, use_attribute_sets, focus, builder)?;
            executor.execute_template(body, focus, builder)?;
            builder.end_element();
            Ok(())
        }
        _ => {
            copy_leaf(node, builder);
            Ok(())
        }
    }
}

/// Copies a source node with its attributes and descendants.
pub(crate) fn copy_node_deep<'a, N: DataSourceNode<'a> + 'a>(
    node: N,
    builder: &mut dyn OutputBuilder,
) {
    match node.node_type() {
        NodeType::Root => {
            for child in node.children() {
                copy_node_deep(child, builder);
            }
        }
        NodeType::Element => {
            let Some(name) = node_name(&node) else {
                return;
            };
            builder.start_element(&name);
            copy_namespaces(node, builder);
            for attribute in node.attributes() {
                copy_leaf(attribute, builder);
            }
            for child in node.children() {
                copy_node_deep(child, builder);
            }
            builder.end_element();
        }
        _ => copy_leaf(node, builder),
    }
}

fn copy_namespaces<'a, N: DataSourceNode<'a>>(node: N, builder: &mut dyn OutputBuilder) {
    for (prefix, uri) in node.namespace_declarations() {
        builder.add_namespace(prefix, uri);
    }
}

fn copy_leaf<'a, N: DataSourceNode<'a>>(node: N, builder: &mut dyn OutputBuilder) {
    match node.node_type() {
        NodeType::Attribute => {
            if let Some(name) = node_name(&node) {
                builder.set_attribute(&name, &node.string_value());
            }
        }
        NodeType::Text => builder.add_text(&node.string_value(), false),
        NodeType::Comment => builder.add_comment(&node.string_value()),
        NodeType::ProcessingInstruction => {
            let target = node.name().map(|q| q.local_part).unwrap_or_default();
            builder.add_processing_instruction(target, &node.string_value());
        }
        NodeType::Root | NodeType::Element => {}
    }
}
