//! Stylesheet parameters.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name/value pairs bound to top-level `xsl:param`s.
///
/// Each value is an XPath expression, evaluated with the source document root as
/// context node; use [`ParameterList::push_string`] to pass literal text. When a
/// name occurs more than once, the last binding wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterList {
    entries: Vec<(String, String)>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to an XPath expression.
    pub fn push(&mut self, name: impl Into<String>, expression: impl Into<String>) {
        self.entries.push((name.into(), expression.into()));
    }

    /// Binds `name` to a literal string.
    pub fn push_string(&mut self, name: impl Into<String>, value: &str) {
        self.entries.push((name.into(), quote_string(value)));
    }

    /// Builder form of [`ParameterList::push`].
    pub fn with(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.push(name, expression);
        self
    }

    /// Builder form of [`ParameterList::push_string`].
    pub fn with_string(mut self, name: impl Into<String>, value: &str) -> Self {
        self.push_string(name, value);
        self
    }

    /// Converts an alternating `[name, value, name, value, ...]` list.
    pub fn from_flat<S: AsRef<str>>(flat: &[S]) -> Result<Self, Error> {
        if flat.len() % 2 != 0 {
            return Err(Error::InvalidArgument("odd number of parameters".to_string()));
        }
        Ok(flat
            .chunks_exact(2)
            .map(|pair| (pair[0].as_ref().to_string(), pair[1].as_ref().to_string()))
            .collect())
    }

    /// Reads parameters from a JSON object. Strings become literal strings, numbers
    /// and booleans become the matching XPath values.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(json)?;
        let Value::Object(map) = value else {
            return Err(Error::InvalidArgument(
                "parameters must be a JSON object".to_string(),
            ));
        };
        let mut params = Self::new();
        for (name, value) in map {
            match value {
                Value::String(s) => params.push_string(name, &s),
                Value::Number(n) => params.push(name, n.to_string()),
                Value::Bool(b) => params.push(name, if b { "true()" } else { "false()" }),
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "parameter '{}' must be a string, number or boolean, not {}",
                        name, other
                    )));
                }
            }
        }
        Ok(params)
    }

    /// The expression bound to `name`, honouring last-wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub(crate) fn as_pairs(&self) -> &[(String, String)] {
        &self.entries
    }
}

impl FromIterator<(String, String)> for ParameterList {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<(String, String)>> for ParameterList {
    fn from(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }
}

/// Writes `value` as an XPath string literal. XPath 1.0 has no escapes, so a
/// value containing both quote characters is built with `concat()`.
fn quote_string(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{}'", value);
    }
    if !value.contains('"') {
        return format!("\"{}\"", value);
    }
    let parts: Vec<String> = value
        .split('\'')
        .map(|part| format!("'{}'", part))
        .collect();
    format!("concat({})", parts.join(", \"'\", "))
}
