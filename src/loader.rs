//! Parsing documents and compiling stylesheets, from strings or files.
//!
//! These are the blocking entry points. [`crate::Dispatcher`] runs the same
//! functions on its worker pool.

use crate::document::{HtmlDocument, Stylesheet, XmlDocument};
use crate::error::Error;
use std::fs;
use std::path::Path;
use std::time::Instant;
use xform_dom::{Tree, parse_html, parse_xml};
use xform_xslt::XsltParser;

const UTF8_BOM: &str = "\u{feff}";

/// Parses well-formed XML.
pub fn read_xml_string(text: &str) -> Result<XmlDocument, Error> {
    parse_xml_tree(text).map(XmlDocument::new)
}

/// Reads and parses an XML file. A file that cannot be read, or is not UTF-8,
/// is an XML parse failure.
pub fn read_xml_file(path: impl AsRef<Path>) -> Result<XmlDocument, Error> {
    let text = read_xml_text(path.as_ref())?;
    read_xml_string(&text)
}

/// Parses HTML, repairing malformed markup. Only blank input fails.
pub fn read_html_string(text: &str) -> Result<HtmlDocument, Error> {
    let start = Instant::now();
    let tree = parse_html(text).map_err(|e| Error::HtmlParse(e.to_string()))?;
    log::debug!("parsed HTML ({} nodes) in {:?}", tree.len(), start.elapsed());
    Ok(HtmlDocument::new(tree))
}

/// Reads and parses an HTML file. Invalid UTF-8 is replaced rather than rejected.
pub fn read_html_file(path: impl AsRef<Path>) -> Result<HtmlDocument, Error> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| Error::HtmlParse(file_error(path, &e)))?;
    let text = String::from_utf8_lossy(&bytes);
    read_html_string(text.strip_prefix(UTF8_BOM).unwrap_or(&text))
}

/// Compiles a stylesheet. Text that is not XML fails as an XML parse failure;
/// XML that is not a valid stylesheet fails as an XSLT parse failure.
///
/// Relative `xsl:include`/`xsl:import` locations resolve against the current
/// directory.
pub fn read_xslt_string(text: &str) -> Result<Stylesheet, Error> {
    compile_xslt(text, None)
}

/// Reads and compiles a stylesheet file. The file is read as XML first, so a
/// missing file is an XML parse failure. Modules it includes or imports are
/// found relative to the file.
pub fn read_xslt_file(path: impl AsRef<Path>) -> Result<Stylesheet, Error> {
    let path = path.as_ref();
    let text = read_xml_text(path)?;
    compile_xslt(&text, Some(path))
}

fn compile_xslt(text: &str, location: Option<&Path>) -> Result<Stylesheet, Error> {
    let tree = parse_xml_tree(text)?;
    let start = Instant::now();
    let template = XsltParser::compile_at(&tree, location).map_err(Error::XsltParse)?;
    log::debug!("compiled stylesheet in {:?}", start.elapsed());
    Ok(Stylesheet::new(template))
}

fn parse_xml_tree(text: &str) -> Result<Tree, Error> {
    let start = Instant::now();
    let tree = parse_xml(text.strip_prefix(UTF8_BOM).unwrap_or(text))
        .map_err(|e| Error::XmlParse(e.to_string()))?;
    log::debug!("parsed XML ({} nodes) in {:?}", tree.len(), start.elapsed());
    Ok(tree)
}

fn read_xml_text(path: &Path) -> Result<String, Error> {
    let bytes = fs::read(path).map_err(|e| Error::XmlParse(file_error(path, &e)))?;
    String::from_utf8(bytes).map_err(|e| {
        Error::XmlParse(format!("{}: content is not UTF-8: {}", path.display(), e))
    })
}

fn file_error(path: &Path, error: &std::io::Error) -> String {
    format!("cannot read '{}': {}", path.display(), error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_xml_errors_are_classified() {
        let err = read_xml_string("<unclosed>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::XmlParse);
        assert!(err.to_string().starts_with("Failed to parse XML"));
        assert!(read_xml_string("").is_err());
    }

    #[test]
    fn test_bom_is_skipped() {
        let doc = read_xml_string("\u{feff}<root/>").unwrap();
        assert_eq!(doc.root_name(), Some("root"));
    }

    #[test]
    fn test_html_is_lenient_but_not_blank() {
        let doc = read_html_string("<p>unclosed <b>tags").unwrap();
        assert_eq!(doc.root_name(), Some("html"));
        let err = read_html_string("  \n ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HtmlParse);
    }

    #[test]
    fn test_xslt_failures_are_distinguishable() {
        let not_xml = read_xslt_string("this is not xml").unwrap_err();
        let not_xslt = read_xslt_string("<catalog/>").unwrap_err();
        assert_eq!(not_xml.kind(), ErrorKind::XmlParse);
        assert_eq!(not_xslt.kind(), ErrorKind::XsltParse);
        assert!(not_xslt.to_string().starts_with("Failed to parse XSLT"));
        assert_ne!(not_xml.to_string(), not_xslt.to_string());
    }

    #[test]
    fn test_stylesheet_modules_resolve_next_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("common.xsl"),
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                 <xsl:template name="greet">hello</xsl:template>
               </xsl:stylesheet>"#,
        )
        .unwrap();
        let main = dir.path().join("main.xsl");
        fs::write(
            &main,
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                 <xsl:include href="common.xsl"/>
                 <xsl:template match="/"><xsl:call-template name="greet"/></xsl:template>
               </xsl:stylesheet>"#,
        )
        .unwrap();
        assert!(read_xslt_file(&main).is_ok());

        let text = fs::read_to_string(&main).unwrap();
        let err = read_xslt_string(&text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::XsltParse);
        assert!(err.to_string().contains("common.xsl"));
    }

    #[test]
    fn test_missing_files_fold_into_parse_categories() {
        let path = Path::new("/definitely/not/here.xml");
        assert_eq!(read_xml_file(path).unwrap_err().kind(), ErrorKind::XmlParse);
        assert_eq!(read_xslt_file(path).unwrap_err().kind(), ErrorKind::XmlParse);
        let err = read_html_file(path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HtmlParse);
        assert!(err.to_string().contains("/definitely/not/here.xml"));
    }
}
