//! A dedicated engine for parsing and evaluating XSLT `match` patterns.
//!
//! Patterns are matched from the last step backwards: a node matches when it
//! passes the final step and some chain of parents (for `/`) or ancestors (for
//! `//`) passes the earlier ones.

use crate::error::XsltError;
use nom::IResult;
use nom::Parser;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::char;
use nom::combinator::{success, value};
use nom::multi::{many0, separated_list1};
use xform_dom::Name;
use xform_xpath1::parser::{self as xpath_parser, ws};
use xform_xpath1::{DataSourceNode, Expression, NamespaceMap, NodeTest, NodeType, NodeTypeTest, XPathError};
use std::fmt;

/// The axes relevant for match patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchAxis {
    Child,
    Attribute,
}

/// How a step relates to the step (or anchor) on its left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    Child,
    Descendant,
}

/// A node test with its prefix already resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum NameTest {
    /// `*`
    Any,
    /// `prefix:*`
    Namespace(String),
    Name {
        namespace: Option<String>,
        local: String,
    },
    Node,
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
}

impl NameTest {
    pub(crate) fn resolve(test: &NodeTest, namespaces: &NamespaceMap) -> Result<Self, String> {
        let lookup = |prefix: &str| {
            namespaces
                .get(prefix)
                .cloned()
                .ok_or_else(|| format!("undeclared namespace prefix '{}'", prefix))
        };
        Ok(match test {
            NodeTest::Wildcard => NameTest::Any,
            NodeTest::NamespaceWildcard(prefix) => NameTest::Namespace(lookup(prefix)?),
            NodeTest::Name(qname) => match qname.split_once(':') {
                Some((prefix, local)) => NameTest::Name {
                    namespace: Some(lookup(prefix)?),
                    local: local.to_string(),
                },
                None => NameTest::Name {
                    namespace: None,
                    local: qname.clone(),
                },
            },
            NodeTest::NodeType(NodeTypeTest::Node) => NameTest::Node,
            NodeTest::NodeType(NodeTypeTest::Text) => NameTest::Text,
            NodeTest::NodeType(NodeTypeTest::Comment) => NameTest::Comment,
            NodeTest::NodeType(NodeTypeTest::ProcessingInstruction) => {
                NameTest::ProcessingInstruction(None)
            }
            NodeTest::ProcessingInstruction(target) => {
                NameTest::ProcessingInstruction(Some(target.clone()))
            }
        })
    }

    /// Parses a whitespace separated `xsl:strip-space` list.
    pub(crate) fn parse_list(text: &str, namespaces: &NamespaceMap) -> Result<Vec<Self>, String> {
        text.split_whitespace()
            .map(|token| match xpath_parser::node_test(token) {
                Ok(("", test)) => Self::resolve(&test, namespaces),
                _ => Err(format!("invalid name test '{}'", token)),
            })
            .collect()
    }

    /// Default priority of a single step using this test, per XSLT 1.0 section 5.5.
    pub fn default_priority(&self) -> f64 {
        match self {
            NameTest::Name { .. } | NameTest::ProcessingInstruction(Some(_)) => 0.0,
            NameTest::Namespace(_) => -0.25,
            _ => -0.5,
        }
    }

    /// Matches an element name, for whitespace stripping.
    pub fn matches_name(&self, name: &Name) -> bool {
        match self {
            NameTest::Any => true,
            NameTest::Namespace(uri) => name.namespace.as_deref() == Some(uri.as_str()),
            NameTest::Name { namespace, local } => {
                name.local == *local && name.namespace == *namespace
            }
            _ => false,
        }
    }

    pub fn matches_node<'a, N: DataSourceNode<'a>>(&self, node: &N, axis: MatchAxis) -> bool {
        let node_type = node.node_type();
        let principal = match axis {
            MatchAxis::Child => NodeType::Element,
            MatchAxis::Attribute => NodeType::Attribute,
        };
        match axis {
            MatchAxis::Attribute if node_type != NodeType::Attribute => return false,
            MatchAxis::Child if matches!(node_type, NodeType::Attribute | NodeType::Root) => {
                return false;
            }
            _ => {}
        }
        match self {
            NameTest::Any => node_type == principal,
            NameTest::Namespace(uri) => {
                node_type == principal && node.namespace_uri() == Some(uri.as_str())
            }
            NameTest::Name { namespace, local } => {
                node_type == principal
                    && node.name().is_some_and(|q| q.local_part == local.as_str())
                    && node.namespace_uri() == namespace.as_deref()
            }
            NameTest::Node => true,
            NameTest::Text => node_type == NodeType::Text,
            NameTest::Comment => node_type == NodeType::Comment,
            NameTest::ProcessingInstruction(target) => {
                node_type == NodeType::ProcessingInstruction
                    && target
                        .as_ref()
                        .is_none_or(|t| node.name().is_some_and(|q| q.local_part == t.as_str()))
            }
        }
    }
}

/// Evaluation services a pattern needs for predicates and `id()`/`key()` anchors.
pub trait PatternContext<'a, N: DataSourceNode<'a>> {
    fn root(&self) -> N;

    /// Whether `predicate` holds for `node` at `position` of `size`.
    fn predicate(
        &self,
        predicate: &Expression,
        node: N,
        position: usize,
        size: usize,
    ) -> Result<bool, XPathError>;

    /// Evaluates an `id()` or `key()` call with `context` as the context node.
    fn select(&self, expr: &Expression, context: N) -> Result<Vec<N>, XPathError>;
}

#[derive(Debug, Clone, PartialEq)]
struct StepPattern {
    axis: MatchAxis,
    test: NameTest,
    predicates: Vec<Expression>,
    separator: Separator,
}

#[derive(Debug, Clone, PartialEq)]
enum Anchor {
    None,
    Root,
    IdOrKey(Expression),
}

/// A single location path within a pattern, e.g. "/doc/section/para".
#[derive(Debug, Clone, PartialEq)]
struct PathPattern {
    anchor: Anchor,
    steps: Vec<StepPattern>,
}

/// A compiled representation of an XSLT match pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// A pattern can be a union of multiple paths, e.g., "para|note".
    paths: Vec<PathPattern>,
    original_text: String,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original_text)
    }
}

impl Pattern {
    /// Evaluates if a given node matches this compiled pattern.
    pub fn matches<'a, N, C>(&self, node: N, ctx: &C) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a>,
        C: PatternContext<'a, N> + ?Sized,
    {
        for path in &self.paths {
            if path.matches(node, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Splits a union into its alternatives, which template rules treat as
    /// separate rules with their own default priority.
    pub fn alternatives(&self) -> Vec<Pattern> {
        self.paths
            .iter()
            .map(|path| Pattern {
                paths: vec![path.clone()],
                original_text: self.original_text.clone(),
            })
            .collect()
    }

    /// The XSLT 1.0 default priority. For a union this is the highest of the
    /// alternatives; rule selection uses [`alternatives`](Self::alternatives) instead.
    pub fn default_priority(&self) -> f64 {
        self.paths
            .iter()
            .map(PathPattern::default_priority)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

impl PathPattern {
    fn default_priority(&self) -> f64 {
        match (&self.anchor, self.steps.as_slice()) {
            (Anchor::None, [step]) if step.predicates.is_empty() => step.test.default_priority(),
            _ => 0.5,
        }
    }

    fn matches<'a, N, C>(&self, node: N, ctx: &C) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a>,
        C: PatternContext<'a, N> + ?Sized,
    {
        if self.steps.is_empty() {
            return match &self.anchor {
                Anchor::Root => Ok(node == ctx.root()),
                Anchor::IdOrKey(expr) => Ok(ctx.select(expr, node)?.contains(&node)),
                Anchor::None => Ok(false),
            };
        }
        self.match_step(self.steps.len() - 1, node, ctx)
    }

    fn match_step<'a, N, C>(&self, index: usize, node: N, ctx: &C) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a>,
        C: PatternContext<'a, N> + ?Sized,
    {
        let step = &self.steps[index];
        if !step.matches(node, ctx)? {
            return Ok(false);
        }
        let Some(parent) = node.parent() else {
            return Ok(false);
        };

        if index == 0 {
            return match &self.anchor {
                Anchor::None => Ok(true),
                Anchor::Root => Ok(step.separator == Separator::Descendant || parent == ctx.root()),
                Anchor::IdOrKey(expr) => {
                    let targets = ctx.select(expr, node)?;
                    match step.separator {
                        Separator::Child => Ok(targets.contains(&parent)),
                        Separator::Descendant => {
                            Ok(ancestors_or_self(parent).any(|a| targets.contains(&a)))
                        }
                    }
                }
            };
        }

        match step.separator {
            Separator::Child => self.match_step(index - 1, parent, ctx),
            Separator::Descendant => {
                for ancestor in ancestors_or_self(parent) {
                    if self.match_step(index - 1, ancestor, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

fn ancestors_or_self<'a, N: DataSourceNode<'a>>(node: N) -> impl Iterator<Item = N> {
    std::iter::successors(Some(node), |n| n.parent())
}

impl StepPattern {
    fn matches<'a, N, C>(&self, node: N, ctx: &C) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a>,
        C: PatternContext<'a, N> + ?Sized,
    {
        if !self.test.matches_node(&node, self.axis) {
            return Ok(false);
        }
        if self.predicates.is_empty() {
            return Ok(true);
        }
        let Some(parent) = node.parent() else {
            return Ok(false);
        };
        // Positions in predicates count among the siblings that pass the node test.
        let siblings = match self.axis {
            MatchAxis::Attribute => parent.attributes(),
            MatchAxis::Child => parent.children(),
        };
        let mut candidates: Vec<N> = siblings
            .filter(|n| self.test.matches_node(n, self.axis))
            .collect();
        for predicate in &self.predicates {
            let size = candidates.len();
            let mut kept = Vec::with_capacity(size);
            for (i, candidate) in candidates.into_iter().enumerate() {
                if ctx.predicate(predicate, candidate, i + 1, size)? {
                    kept.push(candidate);
                }
            }
            if !kept.contains(&node) {
                return Ok(false);
            }
            candidates = kept;
        }
        Ok(true)
    }
}

// --- Parser ---

/// A step as parsed, before its name test is resolved against the namespaces.
struct RawStep {
    axis: MatchAxis,
    test: NodeTest,
    predicates: Vec<Expression>,
    separator: Separator,
}

struct RawPath {
    anchor: Anchor,
    steps: Vec<RawStep>,
}

pub fn parse(text: &str, namespaces: &NamespaceMap) -> Result<Pattern, XsltError> {
    xpath_parser::check_nesting(text)
        .map_err(|e| XsltError::PatternParse(text.to_string(), e.to_string()))?;
    let raw = match pattern_parser(text.trim()) {
        Ok(("", paths)) => paths,
        Ok((rem, _)) => {
            return Err(XsltError::PatternParse(
                text.to_string(),
                format!("Unconsumed input in pattern: {}", rem),
            ));
        }
        Err(e) => return Err(XsltError::PatternParse(text.to_string(), e.to_string())),
    };

    let mut paths = Vec::with_capacity(raw.len());
    for path in raw {
        let mut steps = Vec::with_capacity(path.steps.len());
        for step in path.steps {
            let test = NameTest::resolve(&step.test, namespaces)
                .map_err(|msg| XsltError::PatternParse(text.to_string(), msg))?;
            steps.push(StepPattern {
                axis: step.axis,
                test,
                predicates: step.predicates,
                separator: step.separator,
            });
        }
        paths.push(PathPattern {
            anchor: path.anchor,
            steps,
        });
    }
    Ok(Pattern {
        paths,
        original_text: text.to_string(),
    })
}

fn separator(input: &str) -> IResult<&str, Separator> {
    alt((
        value(Separator::Descendant, ws(tag("//"))),
        value(Separator::Child, ws(tag("/"))),
    ))
    .parse(input)
}

fn step_parser(input: &str) -> IResult<&str, (MatchAxis, NodeTest, Vec<Expression>)> {
    let (i, axis) = alt((
        value(MatchAxis::Attribute, ws(char('@'))),
        value(MatchAxis::Attribute, ws(tag("attribute::"))),
        value(MatchAxis::Child, ws(tag("child::"))),
        success(MatchAxis::Child),
    ))
    .parse(input)?;
    let (i, test) = xpath_parser::node_test(i)?;
    let (i, predicates) = many0(xpath_parser::predicate).parse(i)?;
    Ok((i, (axis, test, predicates)))
}

fn relative_path(input: &str, first: Separator) -> IResult<&str, Vec<RawStep>> {
    let (mut i, (axis, test, predicates)) = step_parser(input)?;
    let mut steps = vec![RawStep {
        axis,
        test,
        predicates,
        separator: first,
    }];
    loop {
        match (separator, step_parser).parse(i) {
            Ok((rest, (separator, (axis, test, predicates)))) => {
                steps.push(RawStep {
                    axis,
                    test,
                    predicates,
                    separator,
                });
                i = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((i, steps))
}

fn id_or_key(input: &str) -> IResult<&str, Expression> {
    let (i, call) = ws(xpath_parser::function_call).parse(input)?;
    match &call {
        Expression::FunctionCall { name, .. } if name == "id" || name == "key" => Ok((i, call)),
        _ => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

fn path_parser(input: &str) -> IResult<&str, RawPath> {
    if let Ok((i, _)) = ws(tag::<&str, &str, nom::error::Error<&str>>("//")).parse(input) {
        let (i, steps) = relative_path(i, Separator::Descendant)?;
        return Ok((
            i,
            RawPath {
                anchor: Anchor::None,
                steps,
            },
        ));
    }
    if let Ok((i, _)) = ws(char::<&str, nom::error::Error<&str>>('/')).parse(input) {
        // An absolute path can be just `/` or have steps like `/*` or `/root/item`.
        return match relative_path(i, Separator::Child) {
            Ok((i, steps)) => Ok((
                i,
                RawPath {
                    anchor: Anchor::Root,
                    steps,
                },
            )),
            Err(nom::Err::Error(_)) => Ok((
                i,
                RawPath {
                    anchor: Anchor::Root,
                    steps: Vec::new(),
                },
            )),
            Err(e) => Err(e),
        };
    }
    if let Ok((i, call)) = id_or_key(input) {
        let anchor = Anchor::IdOrKey(call);
        return match separator(i) {
            Ok((rest, sep)) => {
                let (rest, steps) = relative_path(rest, sep)?;
                Ok((rest, RawPath { anchor, steps }))
            }
            Err(_) => Ok((
                i,
                RawPath {
                    anchor,
                    steps: Vec::new(),
                },
            )),
        };
    }
    let (i, steps) = relative_path(input, Separator::Child)?;
    Ok((
        i,
        RawPath {
            anchor: Anchor::None,
            steps,
        },
    ))
}

fn pattern_parser(input: &str) -> IResult<&str, Vec<RawPath>> {
    separated_list1(ws(char('|')), path_parser).parse(input)
}
