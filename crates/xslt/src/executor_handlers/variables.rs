use crate::ast::{VariableValue, WithParam};
use crate::error::ExecutionError;
use crate::executor::{Binding, Focus, TemplateExecutor};
use xform_xpath1::DataSourceNode;

pub(crate) fn handle_variable<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &str,
    value: &'s VariableValue,
    focus: Focus<N>,
) -> Result<(), ExecutionError> {
    let binding = executor.binding_value(value, focus)?;
    executor.push_variable(name.to_string(), binding);
    Ok(())
}

/// Evaluates `xsl:with-param` values in the caller's context.
pub(crate) fn evaluate_params<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    params: &'s [WithParam],
    focus: Focus<N>,
) -> Result<Vec<(String, Binding<N>)>, ExecutionError> {
    params
        .iter()
        .map(|param| Ok((param.name.clone(), executor.binding_value(&param.value, focus)?)))
        .collect()
}
