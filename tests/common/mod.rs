#![allow(dead_code)]

use std::path::PathBuf;
use xform::{Stylesheet, XmlDocument};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Enables log output for a test run; repeated calls are harmless.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Path of a file under `tests/data`.
pub fn data_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn cd_catalog() -> (Stylesheet, XmlDocument) {
    let stylesheet = xform::read_xslt_file(data_path("cdcatalog.xsl")).expect("cdcatalog.xsl compiles");
    let document = xform::read_xml_file(data_path("cdcatalog.xml")).expect("cdcatalog.xml parses");
    (stylesheet, document)
}

/// A stylesheet with `body` inside `xsl:stylesheet`.
pub fn stylesheet(body: &str) -> String {
    format!(
        r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{}</xsl:stylesheet>"#,
        body
    )
}
