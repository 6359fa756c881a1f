//! A `nom`-based parser for the XPath 1.0 expression language.

use super::ast::*;
use crate::error::XPathError;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace0},
    combinator::{map, map_res, opt, peek},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
};

/// Deepest allowed nesting of parentheses, predicates and unary minus signs.
pub const MAX_NESTING: usize = 32;

/// Most operands one chain of same-precedence binary operators may have.
pub const MAX_CHAIN: usize = 512;

// --- Main Public Parser ---

pub fn parse_expression(input: &str) -> Result<Expression, XPathError> {
    check_nesting(input)?;
    match expression(input.trim()) {
        Ok(("", expr)) => Ok(expr),
        Ok((rem, _)) => Err(XPathError::XPathParse(
            input.to_string(),
            format!("unexpected input at '{}'", rem),
        )),
        Err(e) => Err(XPathError::XPathParse(input.to_string(), e.to_string())),
    }
}

/// Rejects text nested deeper than [`MAX_NESTING`] before the recursive grammar
/// sees it. Brackets inside string literals are not counted.
pub fn check_nesting(input: &str) -> Result<(), XPathError> {
    let mut depth = 0usize;
    let mut minus_run = 0usize;
    let mut quote = None;
    for c in input.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
        match c {
            '-' => minus_run += 1,
            c if c.is_whitespace() => {}
            _ => minus_run = 0,
        }
        if depth + minus_run > MAX_NESTING {
            return Err(XPathError::XPathParse(
                excerpt(input),
                format!("expression is nested deeper than {}", MAX_NESTING),
            ));
        }
    }
    Ok(())
}

fn excerpt(input: &str) -> String {
    match input.char_indices().nth(64) {
        Some((end, _)) => format!("{}...", &input[..end]),
        None => input.to_string(),
    }
}

// --- Combinators & Helpers ---

/// Runs `parser` and returns the slice of input it consumed.
fn consumed<'a, O, F>(mut parser: F) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str>
where
    F: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    move |input: &'a str| {
        let (rest, _) = parser.parse(input)?;
        Ok((rest, &input[..input.len() - rest.len()]))
    }
}

pub fn ws<'a, F, O, E>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
    E: nom::error::ParseError<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

fn build_binary_expr_parser<'a, F, G>(
    sub_expr_parser: F,
    op_parser: G,
) -> impl FnMut(&'a str) -> IResult<&'a str, Expression>
where
    F: Parser<&'a str, Output = Expression, Error = nom::error::Error<&'a str>> + Clone,
    G: Parser<&'a str, Output = BinaryOperator, Error = nom::error::Error<&'a str>> + Clone,
{
    move |input: &str| {
        let (input, mut left) = sub_expr_parser.clone().parse(input)?;
        let (input, remainder) =
            many0(pair(ws(op_parser.clone()), sub_expr_parser.clone())).parse(input)?;
        if remainder.len() >= MAX_CHAIN {
            return Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::TooLarge,
            )));
        }

        for (op, right) in remainder {
            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok((input, left))
    }
}

// --- Expression Parsers (in order of precedence) ---

/// The top-level expression grammar, exposed for embedding XPath inside other syntaxes.
pub fn expression(input: &str) -> IResult<&str, Expression> {
    or_expr(input)
}

fn or_op(input: &str) -> IResult<&str, BinaryOperator> {
    map(tag("or"), |_| BinaryOperator::Or).parse(input)
}

fn and_op(input: &str) -> IResult<&str, BinaryOperator> {
    map(tag("and"), |_| BinaryOperator::And).parse(input)
}

fn or_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(and_expr, or_op)(input)
}

fn and_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(equality_expr, and_op)(input)
}

fn equality_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(tag("="), |_| BinaryOperator::Equals),
        map(tag("!="), |_| BinaryOperator::NotEquals),
    ))
    .parse(input)
}

fn relational_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(tag("<="), |_| BinaryOperator::LessThanOrEqual),
        map(tag(">="), |_| BinaryOperator::GreaterThanOrEqual),
        map(tag("<"), |_| BinaryOperator::LessThan),
        map(tag(">"), |_| BinaryOperator::GreaterThan),
    ))
    .parse(input)
}

fn additive_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(char('+'), |_| BinaryOperator::Plus),
        map(char('-'), |_| BinaryOperator::Minus),
    ))
    .parse(input)
}

fn multiplicative_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(char('*'), |_| BinaryOperator::Multiply),
        map(tag("div"), |_| BinaryOperator::Divide),
        map(tag("mod"), |_| BinaryOperator::Modulo),
    ))
    .parse(input)
}

fn union_op(input: &str) -> IResult<&str, BinaryOperator> {
    map(char('|'), |_| BinaryOperator::Union).parse(input)
}

fn equality_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(relational_expr, equality_op)(input)
}

fn relational_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(additive_expr, relational_op)(input)
}

fn additive_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(multiplicative_expr, additive_op)(input)
}

fn multiplicative_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(unary_expr, multiplicative_op)(input)
}

fn unary_expr(input: &str) -> IResult<&str, Expression> {
    let (i, neg_op) = opt(ws(char('-'))).parse(input)?;
    if neg_op.is_some() {
        // `--x` is legal, so the operand is itself a unary expression.
        let (i, expr) = unary_expr(i)?;
        return Ok((
            i,
            Expression::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(expr),
            },
        ));
    }
    union_expr(i)
}

fn union_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(path_expr, union_op)(input)
}

fn path_separator(input: &str) -> IResult<&str, &str> {
    ws(alt((tag("//"), tag("/")))).parse(input)
}

/// Handles the ambiguity between location paths and filter expressions that
/// might be followed by further steps (`$var/foo`, `key('k', .)//bar`).
fn path_expr(input: &str) -> IResult<&str, Expression> {
    let (input, _) = multispace0(input)?;
    // Try filter expressions FIRST so `position()` is read as a call and not as a
    // step named `position`.
    let (i, start_expr) =
        alt((filter_expr, map(location_path, Expression::LocationPath))).parse(input)?;

    let (i, remainder_steps) = many0(pair(path_separator, step)).parse(i)?;

    if remainder_steps.is_empty() {
        return Ok((i, start_expr));
    }

    let (start_point, is_absolute, mut steps) = match start_expr {
        Expression::LocationPath(lp) => (lp.start_point, lp.is_absolute, lp.steps),
        other => (Some(Box::new(other)), false, vec![]),
    };
    push_steps(&mut steps, remainder_steps);

    Ok((
        i,
        Expression::LocationPath(LocationPath {
            start_point,
            is_absolute,
            steps,
        }),
    ))
}

fn push_steps(steps: &mut Vec<Step>, remainder: Vec<(&str, Step)>) {
    for (sep, next_step) in remainder {
        if sep == "//" {
            steps.push(Step::descendant_or_self());
        }
        steps.push(next_step);
    }
}

fn filter_expr(input: &str) -> IResult<&str, Expression> {
    let (i, base) = primary_expr(input)?;
    let (i, predicates) = many0(predicate).parse(i)?;
    if predicates.is_empty() {
        Ok((i, base))
    } else {
        Ok((
            i,
            Expression::Filter {
                base: Box::new(base),
                predicates,
            },
        ))
    }
}

fn primary_expr(input: &str) -> IResult<&str, Expression> {
    ws(alt((
        variable_reference,
        map(number_literal, Expression::Number),
        map(string_literal, Expression::Literal),
        function_call,
        delimited(ws(char('(')), expression, ws(char(')'))),
    )))
    .parse(input)
}

// --- Literal Parsers ---

/// `Digits ('.' Digits?)? | '.' Digits`. No sign and no exponent, unlike `nom`'s
/// float parsers, which would also read `inf` out of a name like `info`.
fn number_literal(input: &str) -> IResult<&str, f64> {
    map_res(
        alt((
            consumed(pair(digit1, opt(pair(char('.'), digit0)))),
            consumed(pair(char('.'), digit1)),
        )),
        |s: &str| s.parse::<f64>(),
    )
    .parse(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
        )),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

// --- Variable Reference Parser ---
fn variable_reference(input: &str) -> IResult<&str, Expression> {
    map(preceded(char('$'), q_name), Expression::Variable).parse(input)
}

// --- Name and NodeTest Parsers ---
pub fn nc_name(input: &str) -> IResult<&str, &str> {
    consumed(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '-' || c == '.'),
    ))
    .parse(input)
}

pub fn q_name(input: &str) -> IResult<&str, String> {
    map(
        consumed(pair(nc_name, opt(pair(tag(":"), nc_name)))),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

const NODE_TYPE_NAMES: [&str; 4] = ["text", "node", "comment", "processing-instruction"];

fn node_type_test(input: &str) -> IResult<&str, NodeTest> {
    map(
        terminated(
            alt((
                tag("text"),
                tag("node"),
                tag("comment"),
                tag("processing-instruction"),
            )),
            pair(ws(char('(')), char(')')),
        ),
        |node_type: &str| match node_type {
            "text" => NodeTest::NodeType(NodeTypeTest::Text),
            "comment" => NodeTest::NodeType(NodeTypeTest::Comment),
            "processing-instruction" => NodeTest::NodeType(NodeTypeTest::ProcessingInstruction),
            _ => NodeTest::NodeType(NodeTypeTest::Node),
        },
    )
    .parse(input)
}

fn pi_target_test(input: &str) -> IResult<&str, NodeTest> {
    map(
        preceded(
            pair(tag("processing-instruction"), ws(char('('))),
            terminated(string_literal, ws(char(')'))),
        ),
        NodeTest::ProcessingInstruction,
    )
    .parse(input)
}

pub fn node_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        map(tag("*"), |_| NodeTest::Wildcard),
        node_type_test,
        pi_target_test,
        map(terminated(nc_name, tag(":*")), |p: &str| {
            NodeTest::NamespaceWildcard(p.to_string())
        }),
        map(q_name, NodeTest::Name),
    ))
    .parse(input)
}

// --- Path Parsers ---
fn axis(input: &str) -> IResult<&str, Axis> {
    map(
        terminated(
            alt((
                tag("child"),
                tag("descendant-or-self"),
                tag("descendant"),
                tag("attribute"),
                tag("parent"),
                tag("ancestor-or-self"),
                tag("ancestor"),
                tag("self"),
                tag("following-sibling"),
                tag("preceding-sibling"),
                tag("following"),
                tag("preceding"),
                tag("namespace"),
            )),
            ws(tag("::")),
        ),
        |axis_str: &str| match axis_str {
            "descendant-or-self" => Axis::DescendantOrSelf,
            "descendant" => Axis::Descendant,
            "attribute" => Axis::Attribute,
            "parent" => Axis::Parent,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "ancestor" => Axis::Ancestor,
            "self" => Axis::SelfAxis,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            "following" => Axis::Following,
            "preceding" => Axis::Preceding,
            "namespace" => Axis::Namespace,
            _ => Axis::Child,
        },
    )
    .parse(input)
}

pub fn predicate(input: &str) -> IResult<&str, Expression> {
    delimited(ws(char('[')), expression, ws(char(']'))).parse(input)
}

fn step(input: &str) -> IResult<&str, Step> {
    let (i, (axis, node_test)) = alt((
        map(tag(".."), |_| {
            (Axis::Parent, NodeTest::NodeType(NodeTypeTest::Node))
        }),
        map(tag("."), |_| {
            (Axis::SelfAxis, NodeTest::NodeType(NodeTypeTest::Node))
        }),
        map(preceded(ws(char('@')), node_test), |nt| (Axis::Attribute, nt)),
        map(pair(opt(axis), node_test), |(ax, nt)| {
            (ax.unwrap_or(Axis::Child), nt)
        }),
    ))
    .parse(input)?;
    let (i, predicates) = many0(predicate).parse(i)?;
    Ok((
        i,
        Step {
            axis,
            node_test,
            predicates,
        },
    ))
}

pub fn location_path(input: &str) -> IResult<&str, LocationPath> {
    let (i, (is_absolute, mut steps)) =
        if let Ok((rem, _)) = tag::<&str, &str, nom::error::Error<&str>>("//")(input) {
            let (rem, step) = step(rem)?;
            (rem, (true, vec![Step::descendant_or_self(), step]))
        } else if let Ok((rem, _)) = tag::<&str, &str, nom::error::Error<&str>>("/")(input) {
            match step(rem) {
                Ok((rem, first_step)) => (rem, (true, vec![first_step])),
                // A lone "/" selects the root.
                Err(_) => (rem, (true, vec![])),
            }
        } else {
            let (rem, first_step) = step(input)?;
            (rem, (false, vec![first_step]))
        };

    // After the first step, subsequent steps MUST be preceded by / or //.
    let (i, remainder) = many0(pair(path_separator, step)).parse(i)?;
    push_steps(&mut steps, remainder);

    Ok((
        i,
        LocationPath {
            start_point: None,
            is_absolute,
            steps,
        },
    ))
}

// --- Function Call Parser ---
pub fn function_call(input: &str) -> IResult<&str, Expression> {
    // A function call must be a QName followed by '('. This lookahead avoids
    // parsing a simple step name (like 'foo' in 'foo/bar') as a function.
    let (i, name) = q_name(input)?;
    let (i, _) = peek(ws(char('('))).parse(i)?;

    // Node-type tests like text() are not functions. They are handled by the step parser.
    if NODE_TYPE_NAMES.contains(&name.as_str()) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }

    let (i, _) = multispace0(i)?;
    let (i, args) = delimited(
        char('('),
        separated_list0(ws(char(',')), expression),
        ws(char(')')),
    )
    .parse(i)?;

    Ok((i, Expression::FunctionCall { name, args }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(name: &str) -> Step {
        Step {
            axis: Axis::Child,
            node_test: NodeTest::Name(name.to_string()),
            predicates: vec![],
        }
    }

    #[test]
    fn test_parse_simple_path() {
        let result = parse_expression("catalog/cd").unwrap();
        assert_eq!(
            result,
            Expression::LocationPath(LocationPath {
                start_point: None,
                is_absolute: false,
                steps: vec![child("catalog"), child("cd")],
            })
        );
    }

    #[test]
    fn test_parse_double_slash_inserts_descendant_step() {
        let result = parse_expression("//cd").unwrap();
        assert_eq!(
            result,
            Expression::LocationPath(LocationPath {
                start_point: None,
                is_absolute: true,
                steps: vec![Step::descendant_or_self(), child("cd")],
            })
        );
    }

    #[test]
    fn test_parse_lone_slash_is_root() {
        let result = parse_expression("/").unwrap();
        assert_eq!(
            result,
            Expression::LocationPath(LocationPath {
                start_point: None,
                is_absolute: true,
                steps: vec![],
            })
        );
    }

    #[test]
    fn test_names_that_start_like_keywords() {
        // `info` must not be read as the float `inf` followed by garbage.
        assert_eq!(
            parse_expression("info").unwrap(),
            Expression::LocationPath(LocationPath {
                start_point: None,
                is_absolute: false,
                steps: vec![child("info")],
            })
        );
        assert!(parse_expression("order-by/text()").unwrap().is_location_path());
        assert!(parse_expression("div/p").unwrap().is_location_path());
    }

    #[test]
    fn test_parse_operator_precedence() {
        let result = parse_expression("1 + 2 * 3 = 7 and true()").unwrap();
        let Expression::BinaryOp { op, left, .. } = result else {
            panic!("expected binary op");
        };
        assert_eq!(op, BinaryOperator::And);
        let Expression::BinaryOp { op, left, .. } = *left else {
            panic!("expected equality");
        };
        assert_eq!(op, BinaryOperator::Equals);
        let Expression::BinaryOp { op, right, .. } = *left else {
            panic!("expected addition");
        };
        assert_eq!(op, BinaryOperator::Plus);
        assert!(matches!(
            *right,
            Expression::BinaryOp {
                op: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_function_with_spaces_and_nested_calls() {
        let result = parse_expression("concat( 'a' , substring-before(title, ' ') )").unwrap();
        let Expression::FunctionCall { name, args } = result else {
            panic!("expected function call");
        };
        assert_eq!(name, "concat");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0], Expression::Literal("a".to_string()));
    }

    #[test]
    fn test_parse_filter_expression_with_trailing_path() {
        let result = parse_expression("$items[2]/@id").unwrap();
        let Expression::LocationPath(path) = result else {
            panic!("expected location path");
        };
        assert!(matches!(
            path.start_point.as_deref(),
            Some(Expression::Filter { .. })
        ));
        assert_eq!(path.steps.len(), 1);
        assert_eq!(path.steps[0].axis, Axis::Attribute);
    }

    #[test]
    fn test_parse_axes_and_node_tests() {
        let result = parse_expression("ancestor-or-self::svg:*[1]/processing-instruction('x')").unwrap();
        let Expression::LocationPath(path) = result else {
            panic!("expected location path");
        };
        assert_eq!(path.steps[0].axis, Axis::AncestorOrSelf);
        assert_eq!(
            path.steps[0].node_test,
            NodeTest::NamespaceWildcard("svg".to_string())
        );
        assert_eq!(
            path.steps[1].node_test,
            NodeTest::ProcessingInstruction("x".to_string())
        );
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_expression(".5").unwrap(), Expression::Number(0.5));
        assert_eq!(parse_expression("10.90").unwrap(), Expression::Number(10.9));
        assert!(matches!(
            parse_expression("-3").unwrap(),
            Expression::UnaryOp { .. }
        ));
    }

    #[test]
    fn test_fractions_survive_at_any_position() {
        assert_eq!(parse_expression("2.75").unwrap(), Expression::Number(2.75));
        assert_eq!(parse_expression(" 1.5 ").unwrap(), Expression::Number(1.5));
        assert_eq!(parse_expression("3.").unwrap(), Expression::Number(3.0));

        let Expression::BinaryOp { right, .. } = parse_expression("price > 10.5").unwrap() else {
            panic!("expected comparison");
        };
        assert_eq!(*right, Expression::Number(10.5));

        let Expression::LocationPath(path) = parse_expression("//price[. > 10.5]").unwrap() else {
            panic!("expected location path");
        };
        let Expression::BinaryOp { right, .. } = &path.steps[1].predicates[0] else {
            panic!("expected comparison in predicate");
        };
        assert_eq!(**right, Expression::Number(10.5));
    }

    #[test]
    fn test_qualified_names_keep_both_parts() {
        assert_eq!(q_name("math:max(").unwrap(), ("(", "math:max".to_string()));
        assert_eq!(nc_name("order-by").unwrap(), ("", "order-by"));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let ok = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(parse_expression(&ok).unwrap(), Expression::Number(1.0));

        let parens = format!("{}1{}", "(".repeat(50_000), ")".repeat(50_000));
        assert!(matches!(parse_expression(&parens), Err(XPathError::XPathParse(..))));
        let predicates = format!("a{}", "[b".repeat(10_000));
        assert!(parse_expression(&predicates).is_err());
        assert!(parse_expression(&"-".repeat(10_000)).is_err());
        assert!(check_nesting("'(((((((((((((((((((((((((((((((((((((((('").is_ok());
    }

    #[test]
    fn test_long_operator_chains_are_rejected() {
        let short = vec!["1"; MAX_CHAIN - 1].join(" + ");
        assert!(parse_expression(&short).is_ok());
        let long = vec!["1"; 100_000].join(" + ");
        assert!(parse_expression(&long).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("foo[").is_err());
        assert!(parse_expression("concat('a'").is_err());
        assert!(parse_expression("1 +").is_err());
    }
}
