use crate::ast::WithParam;
use crate::error::ExecutionError;
use crate::executor::{Focus, TemplateExecutor};
use crate::executor_handlers::variables::evaluate_params;
use crate::output::OutputBuilder;
use xform_xpath1::DataSourceNode;

/// Parameters are evaluated in the caller's scope; the called template keeps the
/// current node and the current mode.
pub(crate) fn handle_call_template<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &str,
    params: &'s [WithParam],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let Some(&index) = executor.stylesheet.named_templates.get(name) else {
        return Err(ExecutionError::Runtime(format!(
            "no template named '{}'",
            name
        )));
    };
    let passed = evaluate_params(executor, params, focus)?;
    let mode = executor.current_mode;
    executor.invoke_template(index, focus, &passed, mode, builder)
}
