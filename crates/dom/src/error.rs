use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomError {
    #[error("{0}")]
    Xml(#[from] roxmltree::Error),

    #[error("document is empty")]
    EmptyDocument,

    #[error("elements are nested deeper than {0} levels")]
    TooDeep(usize),
}
