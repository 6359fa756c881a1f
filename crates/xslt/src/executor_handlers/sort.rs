use crate::ast::{SortDataType, SortKey, SortOrder};
use crate::error::ExecutionError;
use crate::executor::{Focus, TemplateExecutor};
use std::cmp::Ordering;
use xform_xpath1::DataSourceNode;

#[derive(Debug)]
enum SortValue {
    Text(String),
    Number(f64),
}

fn compare(a: &SortValue, b: &SortValue) -> Ordering {
    match (a, b) {
        (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
        // NaN sorts before every number.
        (SortValue::Number(a), SortValue::Number(b)) => match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        },
        _ => Ordering::Equal,
    }
}

/// Reorders `nodes` by the sort keys. Keys are evaluated with each node as the
/// context node, positioned in the unsorted list. The sort is stable, so nodes
/// with equal keys stay in document order.
pub(crate) fn sort_nodes<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &TemplateExecutor<'s, 'a, N>,
    nodes: &mut Vec<N>,
    sort_keys: &[SortKey],
) -> Result<(), ExecutionError> {
    if sort_keys.is_empty() || nodes.len() < 2 {
        return Ok(());
    }
    let size = nodes.len();
    let mut keyed = Vec::with_capacity(size);
    for (i, &node) in nodes.iter().enumerate() {
        let focus = Focus {
            node,
            position: i + 1,
            size,
        };
        let mut values = Vec::with_capacity(sort_keys.len());
        for key in sort_keys {
            let value = executor.evaluate(&key.select, focus)?;
            values.push(match key.data_type {
                SortDataType::Text => SortValue::Text(value.to_string()),
                SortDataType::Number => SortValue::Number(value.to_number()),
            });
        }
        keyed.push((node, values));
    }
    keyed.sort_by(|(_, a), (_, b)| {
        for ((x, y), key) in a.iter().zip(b).zip(sort_keys) {
            let ordering = match key.order {
                SortOrder::Ascending => compare(x, y),
                SortOrder::Descending => compare(y, x),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    *nodes = keyed.into_iter().map(|(node, _)| node).collect();
    Ok(())
}
