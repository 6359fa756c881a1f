//! XPath 1.0 for xform.
//!
//! The engine is written against the [`DataSourceNode`] trait so that any read-only
//! tree can be queried. Expressions are parsed once with [`parse_expression`] and
//! evaluated many times with [`evaluate`].

pub mod ast;
pub mod axes;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod functions;
pub mod operators;
pub mod parser;

pub use ast::{Axis, BinaryOperator, Expression, LocationPath, NodeTest, NodeTypeTest, Step};
pub use datasource::{DataSourceNode, NodeType, QName};
pub use engine::{
    EvaluationContext, KeyIndexes, NamespaceMap, VariableResolver, XPathValue, evaluate,
    number_to_string, string_to_number,
};
pub use functions::{DecimalFormat, DecimalFormats, FunctionRegistry, FunctionSignature};

// Mock tree used by unit tests here and in downstream crates.
pub use datasource::tests;
pub use error::XPathError;
pub use parser::parse_expression;
