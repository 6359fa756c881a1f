use crate::ast::{PreparsedTemplate, When};
use crate::error::ExecutionError;
use crate::executor::{Focus, TemplateExecutor};
use crate::output::OutputBuilder;
use xform_xpath1::{DataSourceNode, Expression};

pub(crate) fn handle_if<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    test: &Expression,
    body: &'s PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    if executor.evaluate_bool(test, focus)? {
        executor.execute_template(body, focus, builder)?;
    }
    Ok(())
}

pub(crate) fn handle_choose<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    whens: &'s [When],
    otherwise: Option<&'s PreparsedTemplate>,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    for when_block in whens {
        if executor.evaluate_bool(&when_block.test, focus)? {
            return executor.execute_template(&when_block.body, focus, builder);
        }
    }
    if let Some(otherwise_body) = otherwise {
        executor.execute_template(otherwise_body, focus, builder)?;
    }
    Ok(())
}

pub(crate) fn handle_message<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    body: &'s PreparsedTemplate,
    terminate: bool,
    focus: Focus<N>,
) -> Result<(), ExecutionError> {
    let text = executor.instantiate_to_string(body, focus)?;
    if terminate {
        return Err(ExecutionError::Terminated(text));
    }
    log::warn!("xsl:message: {}", text);
    Ok(())
}
