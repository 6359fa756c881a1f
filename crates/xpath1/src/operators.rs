//! Binary operators: arithmetic, node-set union and the XPath 1.0 comparison rules.

use crate::ast::BinaryOperator;
use crate::datasource::DataSourceNode;
use crate::engine::{XPathValue, sort_document_order, string_to_number};
use crate::error::XPathError;

/// Applies `op` to two already-evaluated operands. `and`/`or` are handled here too,
/// but the engine short-circuits them before the right side is evaluated.
pub fn evaluate<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: XPathValue<N>,
    right: XPathValue<N>,
) -> Result<XPathValue<N>, XPathError> {
    use BinaryOperator::*;
    let value = match op {
        Or => XPathValue::Boolean(left.to_bool() || right.to_bool()),
        And => XPathValue::Boolean(left.to_bool() && right.to_bool()),
        Equals | NotEquals | LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual => {
            XPathValue::Boolean(compare(op, &left, &right))
        }
        Plus => XPathValue::Number(left.to_number() + right.to_number()),
        Minus => XPathValue::Number(left.to_number() - right.to_number()),
        Multiply => XPathValue::Number(left.to_number() * right.to_number()),
        Divide => XPathValue::Number(left.to_number() / right.to_number()),
        // Truncating remainder, which is what Rust's `%` does for floats.
        Modulo => XPathValue::Number(left.to_number() % right.to_number()),
        Union => {
            let mut nodes = left.into_nodes("the union operator")?;
            nodes.extend(right.into_nodes("the union operator")?);
            sort_document_order(&mut nodes);
            XPathValue::NodeSet(nodes)
        }
    };
    Ok(value)
}

/// A non-node-set operand, or one member of a node-set viewed as a string.
enum Atomic<'v> {
    Str(std::borrow::Cow<'v, str>),
    Num(f64),
    Bool(bool),
}

fn atomize<'a, 'v, N: DataSourceNode<'a>>(value: &'v XPathValue<N>) -> Atomic<'v> {
    match value {
        XPathValue::String(s) => Atomic::Str(s.as_str().into()),
        XPathValue::Number(n) => Atomic::Num(*n),
        XPathValue::Boolean(b) => Atomic::Bool(*b),
        XPathValue::NodeSet(_) => Atomic::Bool(value.to_bool()),
    }
}

fn compare<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: &XPathValue<N>,
    right: &XPathValue<N>,
) -> bool {
    match (left, right) {
        (XPathValue::NodeSet(l), XPathValue::NodeSet(r)) => {
            let right_strings: Vec<String> = r.iter().map(|n| n.string_value()).collect();
            l.iter().any(|ln| {
                let ls = ln.string_value();
                right_strings.iter().any(|rs| {
                    compare_atomic(op, &Atomic::Str(ls.as_str().into()), &Atomic::Str(rs.into()))
                })
            })
        }
        (XPathValue::NodeSet(nodes), other) => compare_node_set(op, nodes, other, false),
        (other, XPathValue::NodeSet(nodes)) => compare_node_set(op, nodes, other, true),
        _ => compare_atomic(op, &atomize(left), &atomize(right)),
    }
}

/// Compares each member of a node-set with a single value. A boolean operand
/// compares against the node-set's own truth value rather than its members.
fn compare_node_set<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    nodes: &[N],
    other: &XPathValue<N>,
    swapped: bool,
) -> bool {
    let other_atomic = atomize(other);
    match other_atomic {
        Atomic::Bool(_) => ordered(op, swapped, &Atomic::Bool(!nodes.is_empty()), &other_atomic),
        Atomic::Num(_) => nodes.iter().any(|n| {
            let member = Atomic::Num(string_to_number(&n.string_value()));
            ordered(op, swapped, &member, &other_atomic)
        }),
        Atomic::Str(_) => nodes.iter().any(|n| {
            let member = Atomic::Str(n.string_value().into());
            ordered(op, swapped, &member, &other_atomic)
        }),
    }
}

fn ordered(op: BinaryOperator, swapped: bool, member: &Atomic, other: &Atomic) -> bool {
    if swapped {
        compare_atomic(op, other, member)
    } else {
        compare_atomic(op, member, other)
    }
}

fn compare_atomic(op: BinaryOperator, left: &Atomic, right: &Atomic) -> bool {
    use BinaryOperator::*;
    match op {
        Equals | NotEquals => {
            let equal = match (left, right) {
                (Atomic::Bool(_), _) | (_, Atomic::Bool(_)) => as_bool(left) == as_bool(right),
                (Atomic::Num(_), _) | (_, Atomic::Num(_)) => as_number(left) == as_number(right),
                (Atomic::Str(l), Atomic::Str(r)) => l == r,
            };
            if op == Equals { equal } else { !equal }
        }
        _ => {
            let (l, r) = (as_number(left), as_number(right));
            match op {
                LessThan => l < r,
                LessThanOrEqual => l <= r,
                GreaterThan => l > r,
                _ => l >= r,
            }
        }
    }
}

fn as_bool(value: &Atomic) -> bool {
    match value {
        Atomic::Str(s) => !s.is_empty(),
        Atomic::Num(n) => *n != 0.0 && !n.is_nan(),
        Atomic::Bool(b) => *b,
    }
}

fn as_number(value: &Atomic) -> f64 {
    match value {
        Atomic::Str(s) => string_to_number(s),
        Atomic::Num(n) => *n,
        Atomic::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
    }
}
