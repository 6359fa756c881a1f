//! XSLT 1.0 processor.
//!
//! A stylesheet is compiled once with [`XsltParser`] into an [`XsltTemplate`],
//! which is immutable and can be applied to many source trees, concurrently if
//! needed. Applying it runs the [`executor`] over an [`xform_dom::Tree`] and
//! writes the result tree with the [`serializer`].

pub mod ast;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod output;
pub mod parser;
pub mod pattern;
pub mod processor;
pub mod result_tree;
pub mod serializer;
pub mod util;

mod compiler_handlers;
mod executor_handlers;

pub use ast::{CompiledStylesheet, OutputMethod, OutputSettings};
pub use error::{ExecutionError, XsltError};
pub use processor::{XsltParser, XsltTemplate};
pub use result_tree::ResultFragment;
