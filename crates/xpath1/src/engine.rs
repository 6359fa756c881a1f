//! The evaluation engine for executing a parsed XPath AST against a generic `DataSourceNode`.

use super::ast::{Axis, BinaryOperator, Expression, LocationPath, NodeTest, NodeTypeTest, Step, UnaryOperator};
use super::functions::{self, DecimalFormats, FunctionRegistry};
use super::{axes, operators};
use crate::datasource::{DataSourceNode, NodeType};
use crate::error::XPathError;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Namespace prefixes in scope for an expression, mapped to their URIs.
pub type NamespaceMap = HashMap<String, String>;

/// Pre-computed `xsl:key` indexes: key name → key value → nodes in document order.
pub type KeyIndexes<N> = HashMap<String, HashMap<String, Vec<N>>>;

/// Represents the possible result types of an XPath expression evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum XPathValue<N> {
    /// Nodes in document order, without duplicates.
    NodeSet(Vec<N>),
    String(String),
    Number(f64),
    Boolean(bool),
}

impl<'a, N: DataSourceNode<'a>> XPathValue<N> {
    /// Coerces the XPath value to a boolean as per XPath 1.0 rules.
    pub fn to_bool(&self) -> bool {
        match self {
            XPathValue::NodeSet(nodes) => !nodes.is_empty(),
            XPathValue::String(s) => !s.is_empty(),
            XPathValue::Number(n) => *n != 0.0 && !n.is_nan(),
            XPathValue::Boolean(b) => *b,
        }
    }

    /// Coerces the XPath value to a number as per XPath 1.0 rules.
    pub fn to_number(&self) -> f64 {
        match self {
            XPathValue::Number(n) => *n,
            XPathValue::String(s) => string_to_number(s),
            XPathValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            XPathValue::NodeSet(_) => string_to_number(&self.to_string()),
        }
    }

    /// Returns the node-set, or a type error naming `what` for any other value.
    pub fn into_nodes(self, what: &str) -> Result<Vec<N>, XPathError> {
        match self {
            XPathValue::NodeSet(nodes) => Ok(nodes),
            other => Err(XPathError::TypeError(format!(
                "{} requires a node-set, found {}",
                what,
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            XPathValue::NodeSet(_) => "node-set",
            XPathValue::String(_) => "string",
            XPathValue::Number(_) => "number",
            XPathValue::Boolean(_) => "boolean",
        }
    }
}

impl<'a, N: DataSourceNode<'a>> fmt::Display for XPathValue<N> {
    /// Coerces the XPath value to a string as per XPath 1.0 rules.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XPathValue::NodeSet(nodes) => write!(
                f,
                "{}",
                nodes.first().map(|n| n.string_value()).unwrap_or_default()
            ),
            XPathValue::String(s) => write!(f, "{}", s),
            XPathValue::Number(n) => write!(f, "{}", number_to_string(*n)),
            XPathValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// Converts a string to a number following XPath 1.0: optional whitespace, an
/// optional minus sign, digits with at most one decimal point. Anything else is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut seen_digit = false;
    let mut seen_dot = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return f64::NAN,
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// Converts a number to its XPath 1.0 string form: no exponent, no trailing `.0`.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

/// Looks up variables during evaluation.
pub trait VariableResolver<N> {
    fn resolve(&self, name: &str) -> Option<XPathValue<N>>;
}

impl<N: Clone> VariableResolver<N> for HashMap<String, XPathValue<N>> {
    fn resolve(&self, name: &str) -> Option<XPathValue<N>> {
        self.get(name).cloned()
    }
}

/// A container for all state needed during expression evaluation.
/// `'a` is the lifetime of the underlying tree.
/// `'d` is the lifetime of the evaluation context itself.
pub struct EvaluationContext<'a, 'd, N: DataSourceNode<'a>> {
    pub context_node: N,
    pub root_node: N,
    /// The node XSLT's `current()` returns; the context node outside predicates.
    pub current_node: N,
    pub functions: &'d FunctionRegistry,
    pub context_position: usize, // 1-based index
    pub context_size: usize,
    pub variables: &'d dyn VariableResolver<N>,
    pub namespaces: &'d NamespaceMap,
    /// Read-only access to the pre-computed key indexes.
    pub key_indexes: &'d KeyIndexes<N>,
    /// Formats declared with `xsl:decimal-format`, for `format-number()`.
    pub decimal_formats: Option<&'d DecimalFormats>,
    _marker: PhantomData<&'a ()>,
}

impl<'a, 'd, N: DataSourceNode<'a>> Clone for EvaluationContext<'a, 'd, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, 'd, N: DataSourceNode<'a>> Copy for EvaluationContext<'a, 'd, N> {}

impl<'a, 'd, N: DataSourceNode<'a>> EvaluationContext<'a, 'd, N> {
    pub fn new(
        context_node: N,
        root_node: N,
        functions: &'d FunctionRegistry,
        variables: &'d dyn VariableResolver<N>,
        namespaces: &'d NamespaceMap,
        key_indexes: &'d KeyIndexes<N>,
    ) -> Self {
        Self {
            context_node,
            root_node,
            current_node: context_node,
            functions,
            context_position: 1,
            context_size: 1,
            variables,
            namespaces,
            key_indexes,
            decimal_formats: None,
            _marker: PhantomData,
        }
    }

    pub fn with_decimal_formats(self, formats: &'d DecimalFormats) -> Self {
        Self {
            decimal_formats: Some(formats),
            ..self
        }
    }

    /// Moves the focus to `node` at `position` of `size`; `current()` follows along.
    pub fn with_focus(&self, node: N, position: usize, size: usize) -> Self {
        Self {
            context_node: node,
            current_node: node,
            context_position: position,
            context_size: size,
            ..*self
        }
    }

    /// Like [`with_focus`](Self::with_focus) but keeps `current()`, as predicates do.
    fn with_predicate_focus(&self, node: N, position: usize, size: usize) -> Self {
        Self {
            context_node: node,
            context_position: position,
            context_size: size,
            ..*self
        }
    }

    /// Resolves a prefix against the in-scope namespaces.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<&'d str, XPathError> {
        if prefix == "xml" {
            return Ok("http://www.w3.org/XML/1998/namespace");
        }
        self.namespaces
            .get(prefix)
            .map(String::as_str)
            .ok_or_else(|| XPathError::UnboundPrefix(prefix.to_string()))
    }
}

/// Evaluates a compiled expression and returns a concrete `XPathValue`.
pub fn evaluate<'a, N>(
    expr: &Expression,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    match expr {
        Expression::Literal(s) => Ok(XPathValue::String(s.clone())),
        Expression::Number(n) => Ok(XPathValue::Number(*n)),
        Expression::LocationPath(path) => {
            let nodes = evaluate_location_path(path, e_ctx)?;
            Ok(XPathValue::NodeSet(nodes))
        }
        Expression::Variable(name) => e_ctx
            .variables
            .resolve(name)
            .ok_or_else(|| XPathError::UnknownVariable(name.clone())),
        Expression::FunctionCall { name, args } => {
            let mut evaluated_args = Vec::with_capacity(args.len());
            for arg in args {
                evaluated_args.push(evaluate(arg, e_ctx)?);
            }
            functions::evaluate_function(name, evaluated_args, e_ctx)
        }
        Expression::Filter { base, predicates } => {
            let nodes = evaluate(base, e_ctx)?.into_nodes("a predicate")?;
            let filtered = apply_predicates(nodes, predicates, e_ctx)?;
            Ok(XPathValue::NodeSet(filtered))
        }
        Expression::BinaryOp { left, op, right } => {
            let left_val = evaluate(left, e_ctx)?;
            // `and`/`or` must not evaluate their right operand when the left decides.
            match op {
                BinaryOperator::And if !left_val.to_bool() => Ok(XPathValue::Boolean(false)),
                BinaryOperator::Or if left_val.to_bool() => Ok(XPathValue::Boolean(true)),
                _ => {
                    let right_val = evaluate(right, e_ctx)?;
                    operators::evaluate(*op, left_val, right_val)
                }
            }
        }
        Expression::UnaryOp { op, expr } => {
            let val = evaluate(expr, e_ctx)?;
            match op {
                UnaryOperator::Minus => Ok(XPathValue::Number(-val.to_number())),
            }
        }
    }
}

fn evaluate_location_path<'a, N>(
    path: &LocationPath,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let initial_context = if let Some(start_expr) = &path.start_point {
        evaluate(start_expr, e_ctx)?.into_nodes("a path step")?
    } else if path.is_absolute {
        vec![e_ctx.root_node]
    } else {
        vec![e_ctx.context_node]
    };

    let mut current_nodes = initial_context;
    for step in &path.steps {
        current_nodes = evaluate_step(step, &current_nodes, e_ctx)?;
    }
    Ok(current_nodes)
}

/// Evaluates a single step: for every context node, axis collection, node test and
/// predicates run in axis order, then the union is returned in document order.
fn evaluate_step<'a, N>(
    step: &Step,
    context_nodes: &[N],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut result = Vec::new();
    for &node in context_nodes {
        let axis_nodes = axes::collect(step.axis, node);
        let tested = filter_by_node_test(axis_nodes, &step.node_test, step.axis, e_ctx)?;
        result.extend(apply_predicates(tested, &step.predicates, e_ctx)?);
    }
    if context_nodes.len() > 1 || step.axis.is_reverse() {
        sort_document_order(&mut result);
    }
    Ok(result)
}

/// Sorts nodes into document order and removes duplicates.
pub fn sort_document_order<'a, N: DataSourceNode<'a>>(nodes: &mut Vec<N>) {
    nodes.sort();
    nodes.dedup();
}

/// A node test with its prefixes resolved against the in-scope namespaces.
enum ResolvedTest<'t> {
    Principal,
    Namespace(&'t str),
    Name(Option<&'t str>, &'t str),
    Type(NodeTypeTest),
    ProcessingInstruction(&'t str),
}

impl ResolvedTest<'_> {
    fn matches<'a, N: DataSourceNode<'a>>(&self, node: &N, principal: NodeType) -> bool {
        match self {
            ResolvedTest::Principal => node.node_type() == principal,
            ResolvedTest::Namespace(uri) => {
                node.node_type() == principal && node.namespace_uri() == Some(*uri)
            }
            ResolvedTest::Name(uri, local) => {
                node.node_type() == principal
                    && node.namespace_uri() == *uri
                    && node.name().is_some_and(|q| q.local_part == *local)
            }
            ResolvedTest::Type(ntt) => match ntt {
                NodeTypeTest::Text => node.node_type() == NodeType::Text,
                NodeTypeTest::Comment => node.node_type() == NodeType::Comment,
                NodeTypeTest::ProcessingInstruction => {
                    node.node_type() == NodeType::ProcessingInstruction
                }
                NodeTypeTest::Node => true,
            },
            ResolvedTest::ProcessingInstruction(target) => {
                node.node_type() == NodeType::ProcessingInstruction
                    && node.name().is_some_and(|q| q.local_part == *target)
            }
        }
    }
}

/// Filters nodes based on a `NodeTest`. Name tests only match the axis's principal
/// node type, so `child::x` never selects an attribute or processing instruction.
fn filter_by_node_test<'a, N>(
    nodes: Vec<N>,
    test: &NodeTest,
    axis: Axis,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let principal = if axis == Axis::Attribute {
        NodeType::Attribute
    } else {
        NodeType::Element
    };

    let resolved = match test {
        NodeTest::Wildcard => ResolvedTest::Principal,
        NodeTest::NamespaceWildcard(prefix) => ResolvedTest::Namespace(e_ctx.resolve_prefix(prefix)?),
        NodeTest::Name(qname) => match qname.split_once(':') {
            Some((prefix, local)) => ResolvedTest::Name(Some(e_ctx.resolve_prefix(prefix)?), local),
            None => ResolvedTest::Name(None, qname.as_str()),
        },
        NodeTest::NodeType(ntt) => ResolvedTest::Type(*ntt),
        NodeTest::ProcessingInstruction(target) => ResolvedTest::ProcessingInstruction(target),
    };

    Ok(nodes
        .into_iter()
        .filter(|n| resolved.matches(n, principal))
        .collect())
}

/// Filters a set of nodes by applying a series of predicates. Positions are
/// taken from the order of `nodes`.
fn apply_predicates<'a, N>(
    nodes: Vec<N>,
    predicates: &[Expression],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut final_nodes = nodes;
    for predicate in predicates {
        let context_size = final_nodes.len();
        let mut kept = Vec::with_capacity(context_size);
        for (i, node) in final_nodes.iter().enumerate() {
            let predicate_e_ctx = e_ctx.with_predicate_focus(*node, i + 1, context_size);
            let keep = match evaluate(predicate, &predicate_e_ctx)? {
                XPathValue::Number(n) => n == (i + 1) as f64,
                other => other.to_bool(),
            };
            if keep {
                kept.push(*node);
            }
        }
        final_nodes = kept;
    }
    Ok(final_nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::{MockNode, MockTree, create_test_tree};
    use crate::parser::parse_expression;

    fn eval_with<'a>(
        tree: &'a MockTree,
        vars: &HashMap<String, XPathValue<MockNode<'a>>>,
        expr: &str,
    ) -> Result<XPathValue<MockNode<'a>>, XPathError> {
        let namespaces = NamespaceMap::new();
        let keys = KeyIndexes::new();
        let root = tree.node(0);
        let e_ctx = EvaluationContext::new(
            root,
            root,
            FunctionRegistry::global(),
            vars,
            &namespaces,
            &keys,
        );
        evaluate(&parse_expression(expr)?, &e_ctx)
    }

    fn eval<'a>(tree: &'a MockTree, expr: &str) -> XPathValue<MockNode<'a>> {
        eval_with(tree, &HashMap::new(), expr).unwrap()
    }

    fn node_ids(value: XPathValue<MockNode<'_>>) -> Vec<usize> {
        match value {
            XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.id).collect(),
            other => panic!("Expected a NodeSet, got {:?}", other),
        }
    }

    #[test]
    fn test_predicate_by_attribute() {
        let tree = create_test_tree();
        assert_eq!(node_ids(eval(&tree, "catalog/cd[@id='c2']")), vec![9]);
    }

    #[test]
    fn test_positional_predicate_applies_per_context_node() {
        let tree = create_test_tree();
        // Each cd contributes its own first child.
        assert_eq!(node_ids(eval(&tree, "//cd/*[1]")), vec![5, 11]);
        assert_eq!(node_ids(eval(&tree, "(//cd/*)[1]")), vec![5]);
        assert_eq!(node_ids(eval(&tree, "//cd[last()]/title")), vec![11]);
    }

    #[test]
    fn test_reverse_axis_positions_count_backwards() {
        let tree = create_test_tree();
        assert_eq!(node_ids(eval(&tree, "//price[1]/ancestor::*[1]")), vec![3, 9]);
        assert_eq!(node_ids(eval(&tree, "//cd[2]/preceding-sibling::cd[1]")), vec![3]);
    }

    #[test]
    fn test_abbreviated_steps() {
        let tree = create_test_tree();
        assert_eq!(node_ids(eval(&tree, "//title/..")), vec![3, 9]);
        assert_eq!(node_ids(eval(&tree, "catalog/./@genre")), vec![2]);
        assert_eq!(node_ids(eval(&tree, "//comment()")), vec![15]);
    }

    #[test]
    fn test_union_is_in_document_order() {
        let tree = create_test_tree();
        assert_eq!(node_ids(eval(&tree, "//price | //title")), vec![5, 7, 11, 13]);
    }

    #[test]
    fn test_variable_evaluation() {
        let tree = create_test_tree();
        let mut vars = HashMap::new();
        vars.insert("cds".to_string(), XPathValue::NodeSet(vec![tree.node(3), tree.node(9)]));
        vars.insert("label".to_string(), XPathValue::String("x".to_string()));

        let titles = eval_with(&tree, &vars, "$cds[2]/title").unwrap();
        assert_eq!(titles.to_string(), "Hide your heart");
        assert_eq!(eval_with(&tree, &vars, "$label").unwrap().to_string(), "x");
        assert_eq!(
            eval_with(&tree, &vars, "$missing"),
            Err(XPathError::UnknownVariable("missing".to_string()))
        );
    }

    #[test]
    fn test_path_from_non_node_set_is_a_type_error() {
        let tree = create_test_tree();
        let mut vars = HashMap::new();
        vars.insert("s".to_string(), XPathValue::String("x".to_string()));
        assert!(matches!(
            eval_with(&tree, &vars, "$s/title"),
            Err(XPathError::TypeError(_))
        ));
    }

    #[test]
    fn test_unbound_prefix_is_reported() {
        let tree = create_test_tree();
        assert_eq!(
            eval_with(&tree, &HashMap::new(), "//svg:rect"),
            Err(XPathError::UnboundPrefix("svg".to_string()))
        );
    }

    #[test]
    fn test_number_string_conversions() {
        assert_eq!(number_to_string(10.9), "10.9");
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(string_to_number(" 12.5 "), 12.5);
        assert_eq!(string_to_number("-.5"), -0.5);
        assert!(string_to_number("1e3").is_nan());
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("").is_nan());
    }

    #[test]
    fn test_and_or_short_circuit() {
        let tree = create_test_tree();
        // The right operand would fail with an unknown variable if it were evaluated.
        assert_eq!(eval(&tree, "false() and $nope"), XPathValue::Boolean(false));
        assert_eq!(eval(&tree, "true() or $nope"), XPathValue::Boolean(true));
    }
}
