//! Attribute value templates and small name helpers shared by the compiler and executor.

use crate::ast::{AttributeValueTemplate, AvtPart};
use crate::error::XsltError;
use nom::IResult;
use nom::Parser;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag};
use nom::character::complete::char;
use nom::combinator::{map, value};
use nom::multi::many0;
use nom::sequence::delimited;
use xform_xpath1::parser as xpath_parser;

fn avt_part(input: &str) -> IResult<&str, AvtPart> {
    alt((
        value(AvtPart::Static("{".to_string()), tag("{{")),
        value(AvtPart::Static("}".to_string()), tag("}}")),
        map(
            delimited(char('{'), xpath_parser::expression, char('}')),
            AvtPart::Dynamic,
        ),
        map(is_not("{}"), |s: &str| AvtPart::Static(s.to_string())),
    ))
    .parse(input)
}

/// Parses an attribute value template such as `item-{@id}`. `{{` and `}}` stand
/// for literal braces.
pub fn parse_avt(text: &str) -> Result<AttributeValueTemplate, XsltError> {
    xpath_parser::check_nesting(text)?;
    let (rest, parts) = many0(avt_part)
        .parse(text)
        .map_err(|e| XsltError::Compilation(format!("invalid attribute value template '{}': {}", text, e)))?;
    if !rest.is_empty() {
        return Err(XsltError::Compilation(format!(
            "invalid attribute value template '{}': unbalanced brace at '{}'",
            text, rest
        )));
    }

    // Merge neighbouring static parts so literal values stay a single part.
    let mut merged: Vec<AvtPart> = Vec::with_capacity(parts.len());
    for part in parts {
        match (merged.last_mut(), part) {
            (Some(AvtPart::Static(prev)), AvtPart::Static(s)) => prev.push_str(&s),
            (_, part) => merged.push(part),
        }
    }
    Ok(AttributeValueTemplate(merged))
}

/// Splits `prefix:local` into its parts.
pub fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// Whether `name` is a syntactically valid QName.
pub fn is_qname(name: &str) -> bool {
    let (prefix, local) = split_qname(name);
    prefix.is_none_or(is_ncname) && is_ncname(local)
}

pub fn is_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avt_with_expressions_and_escapes() {
        let avt = parse_avt("a{{b}}-{@id}-{concat('}', 'x')}").unwrap();
        assert_eq!(avt.0.len(), 4);
        assert_eq!(avt.0[0], AvtPart::Static("a{b}-".to_string()));
        assert!(matches!(avt.0[1], AvtPart::Dynamic(_)));
        assert_eq!(avt.0[2], AvtPart::Static("-".to_string()));
        assert!(matches!(avt.0[3], AvtPart::Dynamic(_)));
    }

    #[test]
    fn test_static_avt() {
        assert_eq!(parse_avt("plain").unwrap().as_static().as_deref(), Some("plain"));
        assert_eq!(parse_avt("").unwrap().as_static().as_deref(), Some(""));
        assert!(parse_avt("{@id}").unwrap().as_static().is_none());
    }

    #[test]
    fn test_unbalanced_braces_are_rejected() {
        assert!(parse_avt("{@id").is_err());
        assert!(parse_avt("a}b").is_err());
    }

    #[test]
    fn test_deeply_nested_avt_is_rejected() {
        let text = format!("{{{}1{}}}", "(".repeat(40_000), ")".repeat(40_000));
        assert!(matches!(parse_avt(&text), Err(XsltError::XPath(_))));
        assert!(parse_avt("{((1.5))}").is_ok());
    }

    #[test]
    fn test_qnames() {
        assert!(is_qname("td"));
        assert!(is_qname("svg:rect"));
        assert!(!is_qname("1td"));
        assert!(!is_qname("a:b:c"));
        assert!(!is_qname(""));
        assert_eq!(split_qname("x:y"), (Some("x"), "y"));
    }
}
