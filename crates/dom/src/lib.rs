//! The document tree shared by XML sources, HTML sources and compiled stylesheets.
//!
//! Trees are built once by a front end ([`parse_xml`] or [`parse_html`]) and are
//! immutable afterwards, so they can be shared across threads behind an `Arc`.
//! [`XmlNode`] is the navigable handle the XPath engine works with.

pub mod error;
pub mod html;
pub mod node;
pub mod tree;
pub mod xml;

pub use error::DomError;
pub use html::parse_html;
pub use node::XmlNode;
pub use tree::{DocumentKind, MAX_DEPTH, Name, NodeData, NodeId, NodeKind, Tree, TreeBuilder};
pub use xml::parse_xml;
