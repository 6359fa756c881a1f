//! Applying a stylesheet to a document.

use crate::document::{SourceDocument, Stylesheet};
use crate::error::Error;
use crate::params::ParameterList;
use std::time::Instant;
use xform_dom::Tree;
use xform_xslt::XsltTemplate;

/// Applies `stylesheet` to `document` and returns the serialized result.
///
/// Neither input is modified, and the same inputs always produce the same text.
pub fn transform<D: SourceDocument + ?Sized>(
    stylesheet: &Stylesheet,
    document: &D,
    params: &ParameterList,
) -> Result<String, Error> {
    apply(stylesheet.template(), document.tree(), params)
}

pub(crate) fn apply(
    template: &XsltTemplate,
    tree: &Tree,
    params: &ParameterList,
) -> Result<String, Error> {
    let start = Instant::now();
    let output = template
        .execute(tree, params.as_pairs())
        .map_err(Error::Transform)?;
    log::debug!(
        "transformed {} nodes into {} bytes in {:?}",
        tree.len(),
        output.len(),
        start.elapsed()
    );
    Ok(output)
}
