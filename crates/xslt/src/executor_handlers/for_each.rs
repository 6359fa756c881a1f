use crate::ast::{PreparsedTemplate, SortKey};
use crate::error::ExecutionError;
use crate::executor::{Focus, TemplateExecutor};
use crate::executor_handlers::sort::sort_nodes;
use crate::output::OutputBuilder;
use xform_xpath1::{DataSourceNode, Expression};

pub(crate) fn handle_for_each<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    select: &Expression,
    sort_keys: &[SortKey],
    body: &'s PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let mut nodes = executor.select_nodes(select, focus, "xsl:for-each")?;
    sort_nodes(executor, &mut nodes, sort_keys)?;
    let size = nodes.len();
    for (i, node) in nodes.into_iter().enumerate() {
        let inner = Focus {
            node,
            position: i + 1,
            size,
        };
        executor.execute_template(body, inner, builder)?;
    }
    Ok(())
}
