//! Defines the registry and built-in implementations for XPath 1.0 functions, the
//! functions XSLT 1.0 adds to the expression language, and a small EXSLT set.

use super::engine::{EvaluationContext, XPathValue, sort_document_order};
use crate::datasource::{DataSourceNode, NodeType};
use crate::error::XPathError;
use once_cell::sync::Lazy;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;

pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const EXSLT_COMMON: &str = "http://exslt.org/common";
pub const EXSLT_MATH: &str = "http://exslt.org/math";
pub const EXSLT_STRINGS: &str = "http://exslt.org/strings";

/// Longest string `str:padding()` builds, in characters.
pub const MAX_PADDING: usize = 1 << 20;

/// XSLT instructions `element-available()` reports.
const XSLT_INSTRUCTIONS: &[&str] = &[
    "apply-imports",
    "apply-templates",
    "attribute",
    "call-template",
    "choose",
    "comment",
    "copy",
    "copy-of",
    "element",
    "fallback",
    "for-each",
    "if",
    "message",
    "number",
    "processing-instruction",
    "text",
    "value-of",
    "variable",
];

/// How many arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSignature {
    pub min_args: usize,
    /// `None` means variadic.
    pub max_args: Option<usize>,
}

impl FunctionSignature {
    fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.is_none_or(|max| count <= max)
    }
}

static GLOBAL_REGISTRY: Lazy<FunctionRegistry> = Lazy::new(|| {
    let mut registry = FunctionRegistry::new();
    registry.register_core();
    registry.register_xslt();
    registry.register_exslt();
    log::debug!("XPath function registry initialised with {} functions", registry.len());
    registry
});

/// The set of functions an expression may call, keyed by expanded name.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionSignature>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry with every built-in and extension function. It is
    /// created on first use and lives for the rest of the process.
    pub fn global() -> &'static FunctionRegistry {
        &GLOBAL_REGISTRY
    }

    pub fn register(
        &mut self,
        namespace: Option<&str>,
        name: &str,
        min_args: usize,
        max_args: Option<usize>,
    ) {
        self.functions.insert(
            expanded_name(namespace, name),
            FunctionSignature { min_args, max_args },
        );
    }

    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<FunctionSignature> {
        self.functions.get(&expanded_name(namespace, name)).copied()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Verifies that a call to `name` with `arity` arguments would be accepted.
    pub fn check_call(
        &self,
        namespace: Option<&str>,
        name: &str,
        arity: usize,
    ) -> Result<(), XPathError> {
        let signature = self
            .get(namespace, name)
            .ok_or_else(|| XPathError::UnknownFunction(name.to_string()))?;
        if signature.accepts(arity) {
            Ok(())
        } else {
            Err(XPathError::function(
                name,
                format!("does not accept {} argument(s)", arity),
            ))
        }
    }

    fn register_core(&mut self) {
        for (name, min, max) in [
            ("last", 0, Some(0)),
            ("position", 0, Some(0)),
            ("count", 1, Some(1)),
            ("id", 1, Some(1)),
            ("local-name", 0, Some(1)),
            ("namespace-uri", 0, Some(1)),
            ("name", 0, Some(1)),
            ("string", 0, Some(1)),
            ("concat", 2, None),
            ("starts-with", 2, Some(2)),
            ("contains", 2, Some(2)),
            ("substring-before", 2, Some(2)),
            ("substring-after", 2, Some(2)),
            ("substring", 2, Some(3)),
            ("string-length", 0, Some(1)),
            ("normalize-space", 0, Some(1)),
            ("translate", 3, Some(3)),
            ("boolean", 1, Some(1)),
            ("not", 1, Some(1)),
            ("true", 0, Some(0)),
            ("false", 0, Some(0)),
            ("lang", 1, Some(1)),
            ("number", 0, Some(1)),
            ("sum", 1, Some(1)),
            ("floor", 1, Some(1)),
            ("ceiling", 1, Some(1)),
            ("round", 1, Some(1)),
        ] {
            self.register(None, name, min, max);
        }
    }

    fn register_xslt(&mut self) {
        for (name, min, max) in [
            ("current", 0, Some(0)),
            ("key", 2, Some(2)),
            ("generate-id", 0, Some(1)),
            ("format-number", 2, Some(3)),
            ("system-property", 1, Some(1)),
            ("function-available", 1, Some(1)),
            ("element-available", 1, Some(1)),
            ("unparsed-entity-uri", 1, Some(1)),
        ] {
            self.register(None, name, min, max);
        }
    }

    fn register_exslt(&mut self) {
        self.register(Some(EXSLT_MATH), "min", 1, Some(1));
        self.register(Some(EXSLT_MATH), "max", 1, Some(1));
        self.register(Some(EXSLT_MATH), "abs", 1, Some(1));
        self.register(Some(EXSLT_MATH), "sqrt", 1, Some(1));
        self.register(Some(EXSLT_MATH), "power", 2, Some(2));
        self.register(Some(EXSLT_STRINGS), "padding", 1, Some(2));
        self.register(Some(EXSLT_STRINGS), "concat", 1, Some(1));
        self.register(Some(EXSLT_COMMON), "object-type", 1, Some(1));
    }
}

/// Dispatches a function call to the correct implementation.
pub fn evaluate_function<'a, 'd, N: DataSourceNode<'a>>(
    name: &str,
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let (namespace, local) = match name.split_once(':') {
        Some((prefix, local)) => (Some(e_ctx.resolve_prefix(prefix)?), local),
        None => (None, name),
    };
    e_ctx.functions.check_call(namespace, local, args.len())?;

    match (namespace, local) {
        // Node-set
        (None, "last") => Ok(XPathValue::Number(e_ctx.context_size as f64)),
        (None, "position") => Ok(XPathValue::Number(e_ctx.context_position as f64)),
        (None, "count") => func_count(args),
        (None, "id") => func_id(args, e_ctx),
        (None, "local-name") => func_name_part(args, e_ctx, NamePart::Local),
        (None, "namespace-uri") => func_name_part(args, e_ctx, NamePart::Namespace),
        (None, "name") => func_name_part(args, e_ctx, NamePart::Qualified),

        // String
        (None, "string") => Ok(XPathValue::String(string_arg(&args, 0, e_ctx))),
        (None, "concat") => Ok(XPathValue::String(
            args.iter().map(|a| a.to_string()).collect(),
        )),
        (None, "starts-with") => Ok(XPathValue::Boolean(
            args[0].to_string().starts_with(&args[1].to_string()),
        )),
        (None, "contains") => Ok(XPathValue::Boolean(
            args[0].to_string().contains(&args[1].to_string()),
        )),
        (None, "substring-before") => {
            let (s, sep) = (args[0].to_string(), args[1].to_string());
            Ok(XPathValue::String(
                s.split_once(&sep).map(|(b, _)| b.to_string()).unwrap_or_default(),
            ))
        }
        (None, "substring-after") => {
            let (s, sep) = (args[0].to_string(), args[1].to_string());
            Ok(XPathValue::String(
                s.split_once(&sep).map(|(_, a)| a.to_string()).unwrap_or_default(),
            ))
        }
        (None, "substring") => func_substring(args),
        (None, "string-length") => Ok(XPathValue::Number(
            string_arg(&args, 0, e_ctx).chars().count() as f64,
        )),
        (None, "normalize-space") => Ok(XPathValue::String(
            string_arg(&args, 0, e_ctx)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        )),
        (None, "translate") => func_translate(args),

        // Boolean
        (None, "boolean") => Ok(XPathValue::Boolean(args[0].to_bool())),
        (None, "not") => Ok(XPathValue::Boolean(!args[0].to_bool())),
        (None, "true") => Ok(XPathValue::Boolean(true)),
        (None, "false") => Ok(XPathValue::Boolean(false)),
        (None, "lang") => func_lang(args, e_ctx),

        // Number
        (None, "number") => Ok(XPathValue::Number(match args.first() {
            Some(arg) => arg.to_number(),
            None => XPathValue::NodeSet(vec![e_ctx.context_node]).to_number(),
        })),
        (None, "sum") => {
            let nodes = first_nodes(args, "sum()")?;
            Ok(XPathValue::Number(
                nodes
                    .iter()
                    .map(|n| crate::engine::string_to_number(&n.string_value()))
                    .sum(),
            ))
        }
        (None, "floor") => Ok(XPathValue::Number(args[0].to_number().floor())),
        (None, "ceiling") => Ok(XPathValue::Number(args[0].to_number().ceil())),
        (None, "round") => Ok(XPathValue::Number(xpath_round(args[0].to_number()))),

        // XSLT additions
        (None, "current") => Ok(XPathValue::NodeSet(vec![e_ctx.current_node])),
        (None, "key") => func_key(args, e_ctx),
        (None, "generate-id") => func_generate_id(args, e_ctx),
        (None, "format-number") => func_format_number(args, e_ctx),
        // Source trees keep no unparsed entity declarations, so no name resolves.
        (None, "unparsed-entity-uri") => Ok(XPathValue::String(String::new())),
        (None, "system-property") => func_system_property(args, e_ctx),
        (None, "function-available") => {
            let requested = args[0].to_string();
            let available = match requested.split_once(':') {
                Some((prefix, local)) => e_ctx
                    .resolve_prefix(prefix)
                    .is_ok_and(|uri| e_ctx.functions.get(Some(uri), local).is_some()),
                None => e_ctx.functions.get(None, &requested).is_some(),
            };
            Ok(XPathValue::Boolean(available))
        }
        (None, "element-available") => {
            let requested = args[0].to_string();
            let available = requested.split_once(':').is_some_and(|(prefix, local)| {
                e_ctx.resolve_prefix(prefix) == Ok(XSLT_NAMESPACE)
                    && XSLT_INSTRUCTIONS.contains(&local)
            });
            Ok(XPathValue::Boolean(available))
        }

        // EXSLT
        (Some(EXSLT_MATH), "min") => func_math_extreme(args, f64::min),
        (Some(EXSLT_MATH), "max") => func_math_extreme(args, f64::max),
        (Some(EXSLT_MATH), "abs") => Ok(XPathValue::Number(args[0].to_number().abs())),
        (Some(EXSLT_MATH), "sqrt") => Ok(XPathValue::Number(args[0].to_number().sqrt())),
        (Some(EXSLT_MATH), "power") => Ok(XPathValue::Number(
            args[0].to_number().powf(args[1].to_number()),
        )),
        (Some(EXSLT_STRINGS), "padding") => {
            let length = args[0].to_number();
            let fill = args.get(1).map(|a| a.to_string()).unwrap_or_else(|| " ".to_string());
            if fill.is_empty() || length.is_nan() || length < 1.0 {
                return Ok(XPathValue::String(String::new()));
            }
            if length > MAX_PADDING as f64 {
                return Err(XPathError::function(
                    name,
                    format!("length {} exceeds the limit of {}", length, MAX_PADDING),
                ));
            }
            Ok(XPathValue::String(
                fill.chars().cycle().take(length as usize).collect(),
            ))
        }
        (Some(EXSLT_STRINGS), "concat") => {
            let nodes = first_nodes(args, "str:concat()")?;
            Ok(XPathValue::String(
                nodes.iter().map(|n| n.string_value()).collect(),
            ))
        }
        (Some(EXSLT_COMMON), "object-type") => {
            Ok(XPathValue::String(args[0].type_name().to_string()))
        }

        _ => Err(XPathError::UnknownFunction(name.to_string())),
    }
}

/// The string value of argument `index`, or of the context node when it is absent.
fn string_arg<'a, N: DataSourceNode<'a>>(
    args: &[XPathValue<N>],
    index: usize,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> String {
    match args.get(index) {
        Some(arg) => arg.to_string(),
        None => e_ctx.context_node.string_value(),
    }
}

fn first_nodes<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
    function: &str,
) -> Result<Vec<N>, XPathError> {
    args.remove(0).into_nodes(function)
}

/// XPath `round()`: halves go towards positive infinity.
fn xpath_round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        n
    } else {
        (n + 0.5).floor()
    }
}

// --- Node-Set Functions ---

fn func_count<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    let nodes = first_nodes(args, "count()")?;
    Ok(XPathValue::Number(nodes.len() as f64))
}

fn func_id<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError> {
    let id_string = match args.remove(0) {
        XPathValue::NodeSet(nodes) => nodes
            .iter()
            .map(|n| n.string_value())
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    };
    let ids_to_find: HashSet<_> = id_string.split_whitespace().collect();
    if ids_to_find.is_empty() {
        return Ok(XPathValue::NodeSet(vec![]));
    }

    // Without a DTD there are no declared ID attributes, so `id` and `xml:id` stand in.
    let mut results = Vec::new();
    let mut stack = vec![e_ctx.root_node];
    while let Some(node) = stack.pop() {
        if node.node_type() == NodeType::Element {
            let is_match = node.attributes().any(|attr| {
                attr.name().is_some_and(|q| {
                    q.local_part == "id" && (q.prefix.is_none() || q.prefix == Some("xml"))
                }) && ids_to_find.contains(attr.string_value().as_str())
            });
            if is_match {
                results.push(node);
            }
        }
        stack.extend(node.children());
    }
    sort_document_order(&mut results);
    Ok(XPathValue::NodeSet(results))
}

enum NamePart {
    Local,
    Namespace,
    Qualified,
}

fn func_name_part<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
    part: NamePart,
) -> Result<XPathValue<N>, XPathError> {
    let node = match args.into_iter().next() {
        Some(arg) => arg.into_nodes("name functions")?.first().copied(),
        None => Some(e_ctx.context_node),
    };
    let value = node
        .and_then(|n| {
            let q = n.name()?;
            Some(match part {
                NamePart::Local => q.local_part.to_string(),
                NamePart::Namespace => n.namespace_uri().unwrap_or_default().to_string(),
                NamePart::Qualified => q.qualified(),
            })
        })
        .unwrap_or_default();
    Ok(XPathValue::String(value))
}

// --- String Functions ---

fn func_substring<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    let s = args[0].to_string();
    let start = xpath_round(args[1].to_number());
    let end = match args.get(2) {
        Some(len) => start + xpath_round(len.to_number()),
        None => f64::INFINITY,
    };
    // Positions are 1-based; NaN bounds compare false and select nothing.
    let result = s
        .chars()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && p < end
        })
        .map(|(_, c)| c)
        .collect();
    Ok(XPathValue::String(result))
}

fn func_translate<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    let s = args[0].to_string();
    let from: Vec<char> = args[1].to_string().chars().collect();
    let to: Vec<char> = args[2].to_string().chars().collect();
    let result = s
        .chars()
        .filter_map(|c| match from.iter().position(|&f| f == c) {
            Some(i) => to.get(i).copied(),
            None => Some(c),
        })
        .collect();
    Ok(XPathValue::String(result))
}

// --- Boolean Functions ---

fn func_lang<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError> {
    let wanted = args[0].to_string().to_lowercase();
    let mut current = Some(e_ctx.context_node);
    while let Some(node) = current {
        let lang = node.attributes().find(|a| {
            a.name().is_some_and(|q| q.local_part == "lang")
                && (a.namespace_uri() == Some(XML_NAMESPACE)
                    || a.name().is_some_and(|q| q.prefix == Some("xml")))
        });
        if let Some(attr) = lang {
            let actual = attr.string_value().to_lowercase();
            let matches = actual == wanted
                || actual
                    .strip_prefix(&wanted)
                    .is_some_and(|rest| rest.starts_with('-'));
            return Ok(XPathValue::Boolean(matches));
        }
        current = node.parent();
    }
    Ok(XPathValue::Boolean(false))
}

// --- XSLT Functions ---

fn func_key<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError> {
    let key_name = args[0].to_string();
    let index = e_ctx
        .key_indexes
        .get(&key_name)
        .ok_or_else(|| XPathError::function("key", format!("no key named '{}'", key_name)))?;

    let lookup_values: Vec<String> = match args.remove(1) {
        XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.string_value()).collect(),
        other => vec![other.to_string()],
    };
    let mut results = Vec::new();
    for value in &lookup_values {
        if let Some(nodes) = index.get(value) {
            results.extend(nodes.iter().copied());
        }
    }
    sort_document_order(&mut results);
    Ok(XPathValue::NodeSet(results))
}

fn func_generate_id<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError> {
    let node = match args.into_iter().next() {
        Some(arg) => arg.into_nodes("generate-id()")?.first().copied(),
        None => Some(e_ctx.context_node),
    };
    Ok(XPathValue::String(match node {
        Some(n) => {
            let mut hasher = DefaultHasher::new();
            n.hash(&mut hasher);
            format!("id{:x}", hasher.finish())
        }
        None => String::new(),
    }))
}

fn func_system_property<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError> {
    let requested = args[0].to_string();
    let Some((prefix, local)) = requested.split_once(':') else {
        return Ok(XPathValue::String(String::new()));
    };
    if e_ctx.resolve_prefix(prefix)? != XSLT_NAMESPACE {
        return Ok(XPathValue::String(String::new()));
    }
    Ok(match local {
        "version" => XPathValue::Number(1.0),
        "vendor" => XPathValue::String("xform".to_string()),
        _ => XPathValue::String(String::new()),
    })
}

/// The symbols `format-number()` reads a pattern with and writes a number with,
/// as declared by `xsl:decimal-format`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecimalFormat {
    pub decimal_separator: char,
    pub grouping_separator: char,
    pub infinity: String,
    pub minus_sign: char,
    pub nan: String,
    pub percent: char,
    pub per_mille: char,
    pub zero_digit: char,
    pub digit: char,
    pub pattern_separator: char,
}

impl Default for DecimalFormat {
    fn default() -> Self {
        DecimalFormat {
            decimal_separator: '.',
            grouping_separator: ',',
            infinity: "Infinity".to_string(),
            minus_sign: '-',
            nan: "NaN".to_string(),
            percent: '%',
            per_mille: '\u{2030}',
            zero_digit: '0',
            digit: '#',
            pattern_separator: ';',
        }
    }
}

/// Declared decimal formats by expanded name; `None` is the default format.
pub type DecimalFormats = HashMap<Option<String>, DecimalFormat>;

static DEFAULT_DECIMAL_FORMAT: Lazy<DecimalFormat> = Lazy::new(DecimalFormat::default);

/// `{uri}local` for a name in a namespace, `local` otherwise.
pub fn expanded_name(namespace: Option<&str>, local: &str) -> String {
    match namespace {
        Some(uri) => format!("{{{}}}{}", uri, local),
        None => local.to_string(),
    }
}

fn func_format_number<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError> {
    let declared = |key: &Option<String>| e_ctx.decimal_formats.and_then(|f| f.get(key));
    let format = match args.get(2) {
        Some(name) => {
            let name = name.to_string();
            let key = match name.trim().split_once(':') {
                Some((prefix, local)) => expanded_name(Some(e_ctx.resolve_prefix(prefix)?), local),
                None => name.trim().to_string(),
            };
            declared(&Some(key)).ok_or_else(|| {
                XPathError::function(
                    "format-number",
                    format!("decimal format '{}' is not declared", name),
                )
            })?
        }
        None => declared(&None).unwrap_or(&*DEFAULT_DECIMAL_FORMAT),
    };
    Ok(XPathValue::String(format_number_with(
        args[0].to_number(),
        &args[1].to_string(),
        format,
    )))
}

/// Formats a number with a JDK-style decimal pattern such as `#,##0.00` or `0%`,
/// using the default decimal format.
pub fn format_number(value: f64, pattern: &str) -> String {
    format_number_with(value, pattern, &*DEFAULT_DECIMAL_FORMAT)
}

/// Formats a number with a pattern written in the symbols of `format`.
pub fn format_number_with(value: f64, pattern: &str, format: &DecimalFormat) -> String {
    let (positive, negative) = match pattern.split_once(format.pattern_separator) {
        Some((p, n)) => (p, Some(n)),
        None => (pattern, None),
    };
    if value.is_nan() {
        return format.nan.clone();
    }
    let is_negative = value < 0.0;
    let sub = match (is_negative, negative) {
        (true, Some(n)) => DecimalPattern::parse(n, format),
        _ => DecimalPattern::parse(positive, format),
    };
    let body = if value.is_infinite() {
        format.infinity.clone()
    } else {
        sub.format_magnitude(value.abs(), format)
    };
    let mut out = String::new();
    if is_negative && negative.is_none() {
        out.push(format.minus_sign);
    }
    out.push_str(sub.prefix);
    out.push_str(&body);
    out.push_str(sub.suffix);
    out
}

struct DecimalPattern<'p> {
    prefix: &'p str,
    suffix: &'p str,
    min_int: usize,
    grouping: Option<usize>,
    min_frac: usize,
    max_frac: usize,
    multiplier: f64,
}

impl<'p> DecimalPattern<'p> {
    fn parse(pattern: &'p str, format: &DecimalFormat) -> Self {
        let is_digit = |c: char| c == format.digit || c == format.zero_digit;
        let is_body = |c: char| {
            is_digit(c) || c == format.grouping_separator || c == format.decimal_separator
        };
        let start = pattern.find(is_body).unwrap_or(pattern.len());
        let end = pattern
            .char_indices()
            .rev()
            .find(|&(_, c)| is_body(c))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(start)
            .max(start);
        let (prefix, body, suffix) = (&pattern[..start], &pattern[start..end], &pattern[end..]);

        let affixes_contain = |c: char| prefix.contains(c) || suffix.contains(c);
        let multiplier = if affixes_contain(format.percent) {
            100.0
        } else if affixes_contain(format.per_mille) {
            1000.0
        } else {
            1.0
        };
        let (int_part, frac_part) = body
            .split_once(format.decimal_separator)
            .unwrap_or((body, ""));
        let grouping = int_part
            .rfind(format.grouping_separator)
            .map(|i| {
                int_part[i + format.grouping_separator.len_utf8()..]
                    .chars()
                    .filter(|&c| is_digit(c))
                    .count()
            })
            .filter(|size| *size > 0);

        DecimalPattern {
            prefix,
            suffix,
            min_int: int_part.chars().filter(|&c| c == format.zero_digit).count(),
            grouping,
            min_frac: frac_part.chars().filter(|&c| c == format.zero_digit).count(),
            max_frac: frac_part.chars().filter(|&c| is_digit(c)).count(),
            multiplier,
        }
    }

    fn format_magnitude(&self, value: f64, format: &DecimalFormat) -> String {
        let fixed = format!("{:.*}", self.max_frac, value * self.multiplier);
        let (int_digits, frac_digits) = fixed.split_once('.').unwrap_or((&fixed, ""));

        let mut frac = frac_digits.to_string();
        while frac.len() > self.min_frac && frac.ends_with('0') {
            frac.pop();
        }

        let mut int = int_digits.trim_start_matches('0').to_string();
        while int.len() < self.min_int {
            int.insert(0, '0');
        }
        if int.is_empty() && frac.is_empty() {
            int.push('0');
        }

        // `int` and `frac` hold ASCII digits; map them to the format's symbols.
        let digit = |c: char| {
            let offset = c.to_digit(10).unwrap_or(0);
            char::from_u32(format.zero_digit as u32 + offset).unwrap_or(c)
        };
        let mut out = String::with_capacity(int.len() + frac.len() + 8);
        for (i, c) in int.chars().enumerate() {
            if let Some(size) = self.grouping
                && i > 0
                && (int.len() - i) % size == 0
            {
                out.push(format.grouping_separator);
            }
            out.push(digit(c));
        }
        if !frac.is_empty() {
            out.push(format.decimal_separator);
            out.extend(frac.chars().map(digit));
        }
        out
    }
}

// --- EXSLT ---

fn func_math_extreme<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    pick: fn(f64, f64) -> f64,
) -> Result<XPathValue<N>, XPathError> {
    let nodes = first_nodes(args, "math:min()/math:max()")?;
    let mut numbers = nodes
        .iter()
        .map(|n| crate::engine::string_to_number(&n.string_value()));
    let Some(first) = numbers.next() else {
        return Ok(XPathValue::Number(f64::NAN));
    };
    let mut acc = first;
    for n in numbers {
        if n.is_nan() || acc.is_nan() {
            acc = f64::NAN;
        } else {
            acc = pick(acc, n);
        }
    }
    Ok(XPathValue::Number(acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::{MockNode, MockTree, create_test_tree};
    use crate::engine::{KeyIndexes, NamespaceMap, evaluate};
    use crate::parser::parse_expression;

    fn eval_ns<'a>(
        tree: &'a MockTree,
        namespaces: &NamespaceMap,
        keys: &KeyIndexes<MockNode<'a>>,
        expr: &str,
    ) -> Result<XPathValue<MockNode<'a>>, XPathError> {
        let vars: HashMap<String, XPathValue<MockNode<'a>>> = HashMap::new();
        let root = tree.node(0);
        let e_ctx = EvaluationContext::new(
            root,
            root,
            FunctionRegistry::global(),
            &vars,
            namespaces,
            keys,
        );
        evaluate(&parse_expression(expr)?, &e_ctx)
    }

    fn eval_str(tree: &MockTree, expr: &str) -> String {
        eval_ns(tree, &NamespaceMap::new(), &KeyIndexes::new(), expr)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_string_functions() {
        let tree = create_test_tree();
        assert_eq!(eval_str(&tree, "concat('a', 1, true())"), "a1true");
        assert_eq!(eval_str(&tree, "substring('12345', 1.5, 2.6)"), "234");
        assert_eq!(eval_str(&tree, "substring('12345', 0, 3)"), "12");
        assert_eq!(eval_str(&tree, "substring('12345', 0 div 0, 3)"), "");
        assert_eq!(eval_str(&tree, "substring-after('2024-01-02', '-')"), "01-02");
        assert_eq!(eval_str(&tree, "substring-before('2024-01-02', '/')"), "");
        assert_eq!(eval_str(&tree, "normalize-space('  a \n b  ')"), "a b");
        assert_eq!(eval_str(&tree, "translate('bar', 'abc', 'ABC')"), "BAr");
        assert_eq!(eval_str(&tree, "translate('--aaa--', 'a-', 'A')"), "AAA");
        assert_eq!(eval_str(&tree, "string-length(//cd[1]/title)"), "16");
    }

    #[test]
    fn test_node_set_and_number_functions() {
        let tree = create_test_tree();
        assert_eq!(eval_str(&tree, "count(//cd)"), "2");
        assert_eq!(eval_str(&tree, "round(sum(//price) * 10)"), "208");
        assert_eq!(eval_str(&tree, "round(2.5)"), "3");
        assert_eq!(eval_str(&tree, "round(-2.5)"), "-2");
        assert_eq!(eval_str(&tree, "floor(-1.5)"), "-2");
        assert_eq!(eval_str(&tree, "name(//cd[2]/@id)"), "id");
        assert_eq!(eval_str(&tree, "local-name(/*)"), "catalog");
        assert_eq!(eval_str(&tree, "id('c2')/title"), "Hide your heart");
        assert_eq!(eval_str(&tree, "number('abc')"), "NaN");
    }

    #[test]
    fn test_count_rejects_non_node_set() {
        let tree = create_test_tree();
        let res = eval_ns(&tree, &NamespaceMap::new(), &KeyIndexes::new(), "count('x')");
        assert!(matches!(res, Err(XPathError::TypeError(_))));
    }

    #[test]
    fn test_unknown_function_and_bad_arity() {
        let tree = create_test_tree();
        let res = eval_ns(&tree, &NamespaceMap::new(), &KeyIndexes::new(), "frobnicate()");
        assert_eq!(res, Err(XPathError::UnknownFunction("frobnicate".to_string())));
        let res = eval_ns(&tree, &NamespaceMap::new(), &KeyIndexes::new(), "concat('a')");
        assert!(matches!(res, Err(XPathError::FunctionError { .. })));
    }

    #[test]
    fn test_key_lookup_uses_indexes() {
        let tree = create_test_tree();
        let mut by_price = HashMap::new();
        by_price.insert("9.90".to_string(), vec![tree.node(9)]);
        let mut keys = KeyIndexes::new();
        keys.insert("by-price".to_string(), by_price);

        let res = eval_ns(&tree, &NamespaceMap::new(), &keys, "key('by-price', '9.90')/title");
        assert_eq!(res.unwrap().to_string(), "Hide your heart");
        let missing = eval_ns(&tree, &NamespaceMap::new(), &keys, "key('nope', 'x')");
        assert!(missing.is_err());
    }

    #[test]
    fn test_exslt_functions_need_their_namespace() {
        let tree = create_test_tree();
        let mut ns = NamespaceMap::new();
        ns.insert("math".to_string(), EXSLT_MATH.to_string());
        ns.insert("str".to_string(), EXSLT_STRINGS.to_string());
        let keys = KeyIndexes::new();
        let eval = |e: &str| eval_ns(&tree, &ns, &keys, e).unwrap().to_string();
        assert_eq!(eval("math:max(//price)"), "10.9");
        assert_eq!(eval("math:min(//price)"), "9.9");
        assert_eq!(eval("math:power(2, 10)"), "1024");
        assert_eq!(eval("str:padding(5, 'ab')"), "ababa");
        assert_eq!(eval("str:padding(2.5)"), "  ");
        assert_eq!(eval("str:padding(-1 div 0)"), "");
        assert_eq!(eval("str:concat(//title)"), "Empire BurlesqueHide your heart");
        assert_eq!(eval("function-available('math:sqrt')"), "true");
        assert_eq!(eval("function-available('math:cbrt')"), "false");

        let unbound = eval_ns(&tree, &NamespaceMap::new(), &keys, "math:max(//price)");
        assert_eq!(unbound, Err(XPathError::UnboundPrefix("math".to_string())));
    }

    #[test]
    fn test_padding_length_is_bounded() {
        let tree = create_test_tree();
        let mut ns = NamespaceMap::new();
        ns.insert("str".to_string(), EXSLT_STRINGS.to_string());
        let keys = KeyIndexes::new();
        for expr in ["str:padding(100000000000000)", "str:padding(1 div 0, 'x')"] {
            let res = eval_ns(&tree, &ns, &keys, expr);
            assert!(
                matches!(res, Err(XPathError::FunctionError { .. })),
                "{} gave {:?}",
                expr,
                res
            );
        }
        let at_limit = format!("string-length(str:padding({}))", MAX_PADDING);
        assert_eq!(
            eval_ns(&tree, &ns, &keys, &at_limit).unwrap().to_string(),
            MAX_PADDING.to_string()
        );
    }

    #[test]
    fn test_system_property_and_element_available() {
        let tree = create_test_tree();
        let mut ns = NamespaceMap::new();
        ns.insert("xsl".to_string(), XSLT_NAMESPACE.to_string());
        let keys = KeyIndexes::new();
        let eval = |e: &str| eval_ns(&tree, &ns, &keys, e).unwrap().to_string();
        assert_eq!(eval("system-property('xsl:version')"), "1");
        assert_eq!(eval("system-property('xsl:vendor')"), "xform");
        assert_eq!(eval("element-available('xsl:for-each')"), "true");
        assert_eq!(eval("element-available('xsl:evaluate')"), "false");
        assert_eq!(eval("unparsed-entity-uri('logo')"), "");
        assert_eq!(eval("function-available('unparsed-entity-uri')"), "true");
        assert_eq!(eval("function-available('document')"), "false");
    }

    #[test]
    fn test_format_number_patterns() {
        assert_eq!(format_number(1234.5, "#,##0.00"), "1,234.50");
        assert_eq!(format_number(0.25, "0%"), "25%");
        assert_eq!(format_number(-3.0, "0.0"), "-3.0");
        assert_eq!(format_number(-3.0, "0.0;(0.0)"), "(3.0)");
        assert_eq!(format_number(7.0, "000"), "007");
        assert_eq!(format_number(0.5, "#.##"), ".5");
        assert_eq!(format_number(f64::NAN, "0"), "NaN");
        assert_eq!(format_number(1234567.0, "$#,###"), "$1,234,567");
        assert_eq!(format_number(0.0, "#"), "0");
        assert_eq!(format_number(0.004, "0.0\u{2030}"), "4.0\u{2030}");
    }

    #[test]
    fn test_format_number_with_declared_symbols() {
        let european = DecimalFormat {
            decimal_separator: ',',
            grouping_separator: '.',
            nan: "n/a".to_string(),
            infinity: "\u{221e}".to_string(),
            minus_sign: '\u{2212}',
            ..DecimalFormat::default()
        };
        assert_eq!(format_number_with(1234567.891, "#.##0,00", &european), "1.234.567,89");
        assert_eq!(format_number_with(-2.5, "0,0", &european), "\u{2212}2,5");
        assert_eq!(format_number_with(f64::NAN, "0", &european), "n/a");
        assert_eq!(format_number_with(f64::INFINITY, "0", &european), "\u{221e}");

        let arabic = DecimalFormat {
            zero_digit: '\u{660}',
            ..DecimalFormat::default()
        };
        assert_eq!(
            format_number_with(305.0, "\u{660}\u{660}\u{660}\u{660}", &arabic),
            "\u{660}\u{663}\u{660}\u{665}"
        );
    }

    #[test]
    fn test_format_number_looks_up_named_formats() {
        let tree = create_test_tree();
        let mut formats = DecimalFormats::new();
        formats.insert(
            Some("de".to_string()),
            DecimalFormat {
                decimal_separator: ',',
                grouping_separator: '.',
                ..DecimalFormat::default()
            },
        );
        let vars: HashMap<String, XPathValue<MockNode<'_>>> = HashMap::new();
        let ns = NamespaceMap::new();
        let keys = KeyIndexes::new();
        let root = tree.node(0);
        let e_ctx = EvaluationContext::new(root, root, FunctionRegistry::global(), &vars, &ns, &keys)
            .with_decimal_formats(&formats);
        let eval = |text: &str| evaluate(&parse_expression(text).unwrap(), &e_ctx);

        assert_eq!(
            eval("format-number(1234.5, '#.##0,00', 'de')").unwrap().to_string(),
            "1.234,50"
        );
        assert_eq!(
            eval("format-number(1234.5, '#,##0.00')").unwrap().to_string(),
            "1,234.50"
        );
        assert!(matches!(
            eval("format-number(1, '0', 'fr')"),
            Err(XPathError::FunctionError { .. })
        ));
    }

    #[test]
    fn test_generate_id_is_stable_and_distinct() {
        let tree = create_test_tree();
        let a = eval_str(&tree, "generate-id(//cd[1])");
        let b = eval_str(&tree, "generate-id(//cd[2])");
        assert_eq!(a, eval_str(&tree, "generate-id(//cd[1])"));
        assert_ne!(a, b);
        assert!(a.starts_with("id"));
        assert_eq!(eval_str(&tree, "generate-id(//nothing)"), "");
    }
}
