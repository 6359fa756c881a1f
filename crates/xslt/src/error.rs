use thiserror::Error;
use xform_dom::DomError;
use xform_xpath1::XPathError;

#[derive(Error, Debug)]
pub enum XsltError {
    #[error("XML parsing error: {0}")]
    Dom(#[from] DomError),

    #[error("XPath error: {0}")]
    XPath(#[from] XPathError),

    #[error("Pattern parse error in '{0}': {1}")]
    PatternParse(String, String),

    #[error("Template compilation error: {0}")]
    Compilation(String),

    #[error("Template structure error in <{element}>: {message}")]
    TemplateStructure { element: String, message: String },

    #[error("Cannot load stylesheet module '{href}': {message}")]
    Module { href: String, message: String },

    #[error("Invalid parameter '{name}': {source}")]
    Parameter {
        name: String,
        #[source]
        source: XPathError,
    },

    #[error("Template execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl XsltError {
    pub(crate) fn structure(element: impl Into<String>, message: impl Into<String>) -> Self {
        XsltError::TemplateStructure {
            element: element.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while a compiled stylesheet runs.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("{0}")]
    XPath(#[from] XPathError),

    #[error("Terminated by xsl:message: {0}")]
    Terminated(String),

    #[error("Template recursion exceeded the maximum depth of {0}")]
    RecursionLimit(usize),

    #[error("{0}")]
    Runtime(String),
}
