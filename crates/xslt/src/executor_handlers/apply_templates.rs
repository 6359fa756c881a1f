use crate::ast::{SortKey, WithParam};
use crate::error::ExecutionError;
use crate::executor::{Focus, TemplateExecutor};
use crate::executor_handlers::{sort::sort_nodes, variables::evaluate_params};
use crate::output::OutputBuilder;
use xform_xpath1::{DataSourceNode, Expression};

pub(crate) fn handle_apply_templates<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    select: Option<&Expression>,
    mode: Option<&'s str>,
    sort_keys: &[SortKey],
    params: &'s [WithParam],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let mut nodes = match select {
        Some(expr) => executor.select_nodes(expr, focus, "xsl:apply-templates")?,
        None => focus.node.children().collect(),
    };
    sort_nodes(executor, &mut nodes, sort_keys)?;
    let params = evaluate_params(executor, params, focus)?;
    executor.apply_templates_to_nodes(&nodes, mode, &params, builder)
}

/// Applies the best rule for the current node from the modules with lower
/// import precedence than the current rule, or the built-in rule when none matches.
pub(crate) fn handle_apply_imports<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let mode = executor.current_mode;
    let Some(precedence) = executor.current_precedence else {
        return Err(ExecutionError::Runtime(
            "xsl:apply-imports used without a current template rule".to_string(),
        ));
    };
    match executor.find_template(focus.node, mode, Some(precedence))? {
        Some(index) => executor.invoke_rule(index, focus, &[], mode, builder),
        None => executor.apply_built_in(focus, mode, builder),
    }
}
