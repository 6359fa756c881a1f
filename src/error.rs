// src/error.rs
use thiserror::Error;
use xform_executor::ExecutorError;
use xform_xslt::{ExecutionError, XsltError};

/// Classifies an [`Error`] without matching on its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    XmlParse,
    HtmlParse,
    XsltParse,
    Transform,
    InvalidArgument,
    Dispatch,
}

impl ErrorKind {
    /// The fixed text every message of this kind starts with.
    pub fn marker(self) -> &'static str {
        match self {
            ErrorKind::XmlParse => "Failed to parse XML",
            ErrorKind::HtmlParse => "Failed to parse HTML",
            ErrorKind::XsltParse => "Failed to parse XSLT",
            ErrorKind::Transform => "Failed to apply stylesheet",
            ErrorKind::InvalidArgument => "Invalid argument",
            ErrorKind::Dispatch => "Failed to dispatch operation",
        }
    }
}

/// The error type shared by every blocking and non-blocking operation.
///
/// A file that cannot be read is reported in the parse category of the kind of
/// document that was being loaded.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to parse XML: {0}")]
    XmlParse(String),

    #[error("Failed to parse HTML: {0}")]
    HtmlParse(String),

    #[error("Failed to parse XSLT: {0}")]
    XsltParse(#[source] XsltError),

    #[error("Failed to apply stylesheet: {0}")]
    Transform(#[source] XsltError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to dispatch operation: {0}")]
    Dispatch(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::XmlParse(_) => ErrorKind::XmlParse,
            Error::HtmlParse(_) => ErrorKind::HtmlParse,
            Error::XsltParse(_) => ErrorKind::XsltParse,
            Error::Transform(_) => ErrorKind::Transform,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Dispatch(_) => ErrorKind::Dispatch,
        }
    }

    /// Turns a panic payload caught on a worker into an error of `kind`.
    pub(crate) fn from_panic(kind: ErrorKind, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let detail = format!("engine panicked: {}", message);
        match kind {
            ErrorKind::XmlParse => Error::XmlParse(detail),
            ErrorKind::HtmlParse => Error::HtmlParse(detail),
            ErrorKind::XsltParse => Error::XsltParse(XsltError::Compilation(detail)),
            ErrorKind::Transform => {
                Error::Transform(XsltError::Execution(ExecutionError::Runtime(detail)))
            }
            ErrorKind::InvalidArgument => Error::InvalidArgument(detail),
            ErrorKind::Dispatch => Error::Dispatch(detail),
        }
    }
}

impl From<ExecutorError> for Error {
    fn from(e: ExecutorError) -> Self {
        Error::Dispatch(e.message)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidArgument(format!("parameters are not valid JSON: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_start_with_their_marker() {
        let errors = [
            Error::XmlParse("x".into()),
            Error::HtmlParse("x".into()),
            Error::XsltParse(XsltError::Compilation("x".into())),
            Error::Transform(XsltError::Compilation("x".into())),
            Error::InvalidArgument("x".into()),
            Error::Dispatch("x".into()),
        ];
        for error in errors {
            assert!(error.to_string().starts_with(error.kind().marker()), "{}", error);
        }
    }

    #[test]
    fn test_panic_payloads_are_reported() {
        let err = Error::from_panic(ErrorKind::Transform, Box::new("boom"));
        assert_eq!(err.kind(), ErrorKind::Transform);
        assert!(err.to_string().contains("boom"));
        assert!(matches!(
            err,
            Error::Transform(XsltError::Execution(ExecutionError::Runtime(_)))
        ));
        let err = Error::from_panic(ErrorKind::XsltParse, Box::new("bad"));
        assert!(matches!(err, Error::XsltParse(XsltError::Compilation(_))));
        let err = Error::from_panic(ErrorKind::XmlParse, Box::new(String::from("owned")));
        assert!(err.to_string().contains("owned"));
        let err = Error::from_panic(ErrorKind::HtmlParse, Box::new(7u8));
        assert!(err.to_string().contains("unknown panic"));
    }
}
