//! Defines the `OutputBuilder` trait, which decouples the XSLT executor
//! from the concrete result tree it writes into.

use xform_dom::Name;

/// A trait that describes the semantic actions of building the output tree,
/// without exposing the underlying concrete node types.
pub trait OutputBuilder {
    fn start_element(&mut self, name: &Name);
    fn end_element(&mut self);

    /// Declares a namespace binding on the currently open element.
    fn add_namespace(&mut self, prefix: Option<&str>, uri: &str);

    /// Sets an attribute on the currently open element.
    fn set_attribute(&mut self, name: &Name, value: &str);

    fn add_text(&mut self, text: &str, disable_escaping: bool);
    fn add_comment(&mut self, text: &str);
    fn add_processing_instruction(&mut self, target: &str, data: &str);
}
