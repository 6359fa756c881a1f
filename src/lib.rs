//! XML, HTML and XSLT 1.0 document transformation.
//!
//! Load documents and stylesheets with the functions in [`loader`], then apply a
//! stylesheet with [`transform()`]. Every operation also has a non-blocking form
//! on [`Dispatcher`], which runs it on a worker pool.
//!
//! ```ignore
//! let stylesheet = xform::read_xslt_file("catalog.xsl")?;
//! let document = xform::read_xml_file("catalog.xml")?;
//! let params = xform::ParameterList::new().with_string("title", "My CDs");
//! let html = xform::transform(&stylesheet, &document, &params)?;
//! ```

pub mod dispatch;
pub mod document;
pub mod engine;
pub mod error;
pub mod loader;
pub mod params;
pub mod transform;

pub use dispatch::{Dispatcher, DispatcherBuilder, Pending};
pub use document::{HtmlDocument, SourceDocument, Stylesheet, XmlDocument};
pub use engine::Engine;
pub use error::{Error, ErrorKind};
pub use loader::{
    read_html_file, read_html_string, read_xml_file, read_xml_string, read_xslt_file,
    read_xslt_string,
};
pub use params::ParameterList;
pub use transform::transform;
pub use xform_executor::{ExecutorImpl, SyncExecutor};
#[cfg(feature = "rayon-executor")]
pub use xform_executor::RayonExecutor;
pub use xform_xslt::OutputMethod;
