//! `xsl:number`: counting source nodes and formatting the result.

use crate::ast::{NumberInstruction, NumberLevel};
use crate::error::ExecutionError;
use crate::executor::{Focus, TemplateExecutor, document_nodes};
use crate::output::OutputBuilder;
use crate::pattern::Pattern;
use xform_xpath1::{DataSourceNode, NodeType, XPathError, number_to_string};

pub(crate) fn handle_number<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    instruction: &NumberInstruction,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let numbers = match &instruction.value {
        Some(expr) => {
            let n = executor.evaluate(expr, focus)?.to_number();
            match counter_value(n) {
                Some(value) => vec![value],
                None => {
                    let text = if n >= 0.5 { (n + 0.5).floor() } else { n };
                    builder.add_text(&number_to_string(text), false);
                    return Ok(());
                }
            }
        }
        None => Counter {
            executor: &*executor,
            count: instruction.count.as_ref(),
            from: instruction.from.as_ref(),
            current: focus.node,
        }
        .count(instruction.level)?,
    };
    let format = executor.evaluate_avt(&instruction.format, focus)?;
    builder.add_text(&format_numbers(&numbers, &format), false);
    Ok(())
}

/// Rounds a `value` to a counter. Values that are not positive or do not fit in
/// a `u64` have no counter form and are written as plain numbers.
fn counter_value(n: f64) -> Option<u64> {
    if !n.is_finite() || n < 0.5 {
        return None;
    }
    let rounded = (n + 0.5).floor();
    (rounded < u64::MAX as f64).then_some(rounded as u64)
}

struct Counter<'e, 's, 'a, N: DataSourceNode<'a>> {
    executor: &'e TemplateExecutor<'s, 'a, N>,
    count: Option<&'e Pattern>,
    from: Option<&'e Pattern>,
    current: N,
}

impl<'s, 'a, N: DataSourceNode<'a> + 'a> Counter<'_, 's, 'a, N> {
    fn count(&self, level: NumberLevel) -> Result<Vec<u64>, XPathError> {
        match level {
            NumberLevel::Single => {
                let counted = self.counted_ancestors()?;
                match counted.first() {
                    Some(&node) => Ok(vec![self.sibling_number(node)?]),
                    None => Ok(Vec::new()),
                }
            }
            NumberLevel::Multiple => {
                let mut numbers = Vec::new();
                for node in self.counted_ancestors()?.into_iter().rev() {
                    numbers.push(self.sibling_number(node)?);
                }
                Ok(numbers)
            }
            NumberLevel::Any => self.any_number(),
        }
    }

    /// Without a `count` pattern, nodes of the same kind and name as the current
    /// node are counted.
    fn counts(&self, node: N) -> Result<bool, XPathError> {
        match self.count {
            Some(pattern) => pattern.matches(node, self.executor),
            None => Ok(node.node_type() == self.current.node_type()
                && node.name().map(|q| q.local_part) == self.current.name().map(|q| q.local_part)
                && node.namespace_uri() == self.current.namespace_uri()),
        }
    }

    fn stops_at(&self, node: N) -> Result<bool, XPathError> {
        match self.from {
            Some(pattern) => pattern.matches(node, self.executor),
            None => Ok(false),
        }
    }

    /// Ancestor-or-self nodes that are counted, nearest first, up to the `from` boundary.
    fn counted_ancestors(&self) -> Result<Vec<N>, XPathError> {
        let mut out = Vec::new();
        let mut node = Some(self.current);
        while let Some(n) = node {
            if self.stops_at(n)? {
                break;
            }
            if self.counts(n)? {
                out.push(n);
            }
            node = n.parent();
        }
        Ok(out)
    }

    fn sibling_number(&self, node: N) -> Result<u64, XPathError> {
        if node.node_type() == NodeType::Attribute {
            return Ok(1);
        }
        let Some(parent) = node.parent() else {
            return Ok(1);
        };
        let mut number = 1;
        for sibling in parent.children() {
            if sibling == node {
                break;
            }
            if self.counts(sibling)? {
                number += 1;
            }
        }
        Ok(number)
    }

    fn any_number(&self) -> Result<Vec<u64>, XPathError> {
        let mut number = 0;
        for node in document_nodes(self.executor.root) {
            if self.stops_at(node)? {
                number = 0;
            }
            if self.counts(node)? {
                number += 1;
            }
            if node == self.current {
                break;
            }
        }
        Ok(if number == 0 { Vec::new() } else { vec![number] })
    }
}

/// Formats a list of numbers with an `xsl:number` format string such as `1.`,
/// `(a)`, `i` or `01-1`.
pub(crate) fn format_numbers(numbers: &[u64], format: &str) -> String {
    let mut runs: Vec<(bool, String)> = Vec::new();
    for c in format.chars() {
        let alnum = c.is_alphanumeric();
        match runs.last_mut() {
            Some((kind, run)) if *kind == alnum => run.push(c),
            _ => runs.push((alnum, c.to_string())),
        }
    }
    let mut prefix = String::new();
    let mut suffix = String::new();
    if let Some((false, _)) = runs.first() {
        prefix = runs.remove(0).1;
    }
    if let Some((false, _)) = runs.last()
        && let Some((_, run)) = runs.pop()
    {
        suffix = run;
    }
    let mut tokens = Vec::new();
    let mut separators = Vec::new();
    for (alnum, run) in runs {
        if alnum {
            tokens.push(run);
        } else {
            separators.push(run);
        }
    }
    if tokens.is_empty() {
        tokens.push("1".to_string());
    }

    let mut out = prefix;
    for (i, &n) in numbers.iter().enumerate() {
        if i > 0 {
            let separator = separators
                .get(i - 1)
                .or(separators.last())
                .map(String::as_str)
                .unwrap_or(".");
            out.push_str(separator);
        }
        let token = tokens.get(i).or(tokens.last()).map(String::as_str).unwrap_or("1");
        out.push_str(&format_token(n, token));
    }
    out.push_str(&suffix);
    out
}

fn format_token(n: u64, token: &str) -> String {
    match token {
        "a" => alphabetic(n, b'a'),
        "A" => alphabetic(n, b'A'),
        "i" => roman(n).to_lowercase(),
        "I" => roman(n),
        _ if is_padded_decimal(token) => format!("{:0width$}", n, width = token.len()),
        _ => n.to_string(),
    }
}

/// `01`, `001` and so on.
fn is_padded_decimal(token: &str) -> bool {
    token.len() > 1
        && token.ends_with('1')
        && token[..token.len() - 1].chars().all(|c| c == '0')
}

fn alphabetic(mut n: u64, base: u8) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push((base + (n % 26) as u8) as char);
        n /= 26;
    }
    letters.iter().rev().collect()
}

fn roman(n: u64) -> String {
    if n == 0 || n >= 4000 {
        return n.to_string();
    }
    const NUMERALS: [(u64, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut rest = n;
    let mut out = String::new();
    for (value, numeral) in NUMERALS {
        while rest >= value {
            out.push_str(numeral);
            rest -= value;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tokens() {
        assert_eq!(format_numbers(&[3], "1"), "3");
        assert_eq!(format_numbers(&[3], "01"), "03");
        assert_eq!(format_numbers(&[28], "a"), "ab");
        assert_eq!(format_numbers(&[4], "A"), "D");
        assert_eq!(format_numbers(&[1994], "I"), "MCMXCIV");
        assert_eq!(format_numbers(&[9], "i"), "ix");
    }

    #[test]
    fn test_counter_values() {
        assert_eq!(counter_value(2.5), Some(3));
        assert_eq!(counter_value(0.4), None);
        assert_eq!(counter_value(f64::NAN), None);
        assert_eq!(counter_value(f64::INFINITY), None);
        assert_eq!(counter_value(1e21), None);
        assert_eq!(counter_value(1e15), Some(1_000_000_000_000_000));
    }

    #[test]
    fn test_format_with_punctuation_and_levels() {
        assert_eq!(format_numbers(&[2], "(1) "), "(2) ");
        assert_eq!(format_numbers(&[1, 2, 3], "1.a"), "1.b.c");
        assert_eq!(format_numbers(&[1, 2], "1"), "1.2");
        assert_eq!(format_numbers(&[], "1."), ".");
    }
}
