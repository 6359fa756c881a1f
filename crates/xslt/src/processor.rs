use crate::ast::{CompiledStylesheet, OutputSettings};
use crate::compiler;
use crate::error::{ExecutionError, XsltError};
use crate::executor::{Focus, TemplateExecutor};
use crate::result_tree::ResultFragment;
use crate::serializer::serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use xform_dom::{Tree, parse_xml};
use xform_xpath1::{Expression, parse_expression};

/// Stack given to the thread that runs a transformation. Deeply recursive
/// stylesheets need far more than a default thread provides.
const EXECUTION_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Compiles XSLT 1.0 stylesheets.
pub struct XsltParser;

impl XsltParser {
    /// Parses and compiles stylesheet text.
    pub fn parse(source: &str) -> Result<XsltTemplate, XsltError> {
        let tree = parse_xml(source)?;
        Self::compile(&tree)
    }

    /// Compiles an already parsed stylesheet document. Modules it includes or
    /// imports are found relative to the current directory.
    pub fn compile(tree: &Tree) -> Result<XsltTemplate, XsltError> {
        Self::compile_at(tree, None)
    }

    /// Compiles a stylesheet document that was read from `location`, so that
    /// modules it includes or imports are found relative to it.
    pub fn compile_at(tree: &Tree, location: Option<&Path>) -> Result<XsltTemplate, XsltError> {
        let compiled = compiler::compile_module(tree, location)?;
        Ok(XsltTemplate {
            compiled: Arc::new(compiled),
        })
    }
}

/// A compiled stylesheet, ready to be applied any number of times from any thread.
#[derive(Debug, Clone)]
pub struct XsltTemplate {
    compiled: Arc<CompiledStylesheet>,
}

impl XsltTemplate {
    pub fn stylesheet(&self) -> &CompiledStylesheet {
        &self.compiled
    }

    pub fn output(&self) -> &OutputSettings {
        &self.compiled.output
    }

    /// Applies the stylesheet to `source` and serializes the result.
    ///
    /// Each parameter value is an XPath expression evaluated with the source root
    /// as context node; a name given twice takes its last value.
    pub fn execute(&self, source: &Tree, params: &[(String, String)]) -> Result<String, XsltError> {
        let params = params
            .iter()
            .map(|(name, text)| {
                parse_expression(text)
                    .map(|expr| (name.clone(), expr))
                    .map_err(|source| XsltError::Parameter {
                        name: name.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let stripped;
        let source = if self.compiled.has_space_rules() {
            stripped = source.strip_whitespace(|name| self.compiled.strips_whitespace_in(name));
            &stripped
        } else {
            source
        };

        let fragment = run_on_large_stack(|| self.run(source, &params))??;
        Ok(serialize(&fragment, &self.compiled.output))
    }

    fn run(&self, source: &Tree, params: &[(String, Expression)]) -> Result<ResultFragment, XsltError> {
        let root = source.root();
        let mut executor = TemplateExecutor::new(&self.compiled, root)?;
        let mut values = HashMap::new();
        for (name, expr) in params {
            let value = executor
                .evaluate_xpath(expr, Focus::single(root))
                .map_err(|source| XsltError::Parameter {
                    name: name.clone(),
                    source,
                })?;
            values.insert(name.clone(), value);
        }
        executor.initialize_globals(values)?;
        Ok(executor.run()?)
    }
}

/// Runs `f` on a scoped thread with a large stack. A panic in `f` resumes on
/// the calling thread.
fn run_on_large_stack<T, F>(f: F) -> Result<T, XsltError>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("xform-transform".to_string())
            .stack_size(EXECUTION_STACK_SIZE)
            .spawn_scoped(scope, f)
            .map_err(|e| {
                XsltError::Execution(ExecutionError::Runtime(format!(
                    "could not start the transformation thread: {}",
                    e
                )))
            })?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use xform_dom::parse_html;

    const CD_CATALOG_XSLT: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
<xsl:template match="/">
  <html>
  <body>
  <h2>My CD Collection</h2>
  <table border="1">
    <tr bgcolor="#9acd32">
      <th>Title</th>
      <th>Artist</th>
    </tr>
    <xsl:for-each select="catalog/cd">
    <tr>
      <td><xsl:value-of select="title"/></td>
      <td><xsl:value-of select="artist"/></td>
    </tr>
    </xsl:for-each>
  </table>
  </body>
  </html>
</xsl:template>
</xsl:stylesheet>"##;

    const CD_CATALOG_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<catalog>
  <cd>
    <title>Empire Burlesque</title>
    <artist>Bob Dylan</artist>
    <country>USA</country>
    <company>Columbia</company>
    <price>10.90</price>
    <year>1985</year>
  </cd>
</catalog>"#;

    fn transform(xslt: &str, xml: &str, params: &[(&str, &str)]) -> Result<String, XsltError> {
        let template = XsltParser::parse(xslt)?;
        let source = parse_xml(xml)?;
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        template.execute(&source, &params)
    }

    fn stylesheet(body: &str) -> String {
        format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{}</xsl:stylesheet>"#,
            body
        )
    }

    #[test]
    fn test_cd_catalog_produces_table_rows() {
        let out = transform(CD_CATALOG_XSLT, CD_CATALOG_XML, &[]).unwrap();
        assert!(out.contains("<td>Bob Dylan</td>"), "{}", out);
        assert!(out.contains("<td>Empire Burlesque</td>"));
        assert!(out.contains("<tr bgcolor=\"#9acd32\">"));
    }

    #[test]
    fn test_transform_is_deterministic() {
        let a = transform(CD_CATALOG_XSLT, CD_CATALOG_XML, &[]).unwrap();
        let b = transform(CD_CATALOG_XSLT, CD_CATALOG_XML, &[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parameters_bind_global_params() {
        let xslt = stylesheet(
            r#"<xsl:output method="text"/>
               <xsl:param name="greeting" select="'hello'"/>
               <xsl:param name="count" select="0"/>
               <xsl:template match="/"><xsl:value-of select="concat($greeting, ':', $count + 1)"/></xsl:template>"#,
        );
        assert_eq!(transform(&xslt, "<r/>", &[]).unwrap(), "hello:1");
        assert_eq!(
            transform(&xslt, "<r/>", &[("greeting", "'hi'"), ("count", "41"), ("unused", "1")])
                .unwrap(),
            "hi:42"
        );
        assert_eq!(
            transform(&xslt, "<r/>", &[("count", "1"), ("count", "2")]).unwrap(),
            "hello:3"
        );
    }

    #[test]
    fn test_parameter_expressions_see_the_source() {
        let xslt = stylesheet(
            r#"<xsl:output method="text"/>
               <xsl:param name="n"/>
               <xsl:template match="/"><xsl:value-of select="$n"/></xsl:template>"#,
        );
        assert_eq!(transform(&xslt, "<r>text</r>", &[("n", "/r")]).unwrap(), "text");
    }

    #[test]
    fn test_invalid_parameter_expression_fails() {
        let xslt = stylesheet(r#"<xsl:param name="n"/><xsl:template match="/"/>"#);
        let err = transform(&xslt, "<r/>", &[("n", "1 +")]).unwrap_err();
        assert!(matches!(err, XsltError::Parameter { ref name, .. } if name == "n"));
    }

    #[test]
    fn test_message_terminate_fails_the_transform() {
        let xslt = stylesheet(
            r#"<xsl:template match="/"><xsl:message terminate="yes">stop <xsl:value-of select="name(*)"/></xsl:message></xsl:template>"#,
        );
        let err = transform(&xslt, "<halt/>", &[]).unwrap_err();
        assert!(
            matches!(err, XsltError::Execution(ExecutionError::Terminated(ref m)) if m == "stop halt")
        );
    }

    #[test]
    fn test_sort_keys_and_number() {
        let xslt = stylesheet(
            r#"<xsl:output method="text"/>
               <xsl:template match="/">
                 <xsl:for-each select="//p">
                   <xsl:sort select="@age" data-type="number" order="descending"/>
                   <xsl:value-of select="position()"/>.<xsl:value-of select="@name"/><xsl:text>;</xsl:text>
                 </xsl:for-each>
                 <xsl:apply-templates select="//p"/>
               </xsl:template>
               <xsl:template match="p"><xsl:number format="(a)"/></xsl:template>"#,
        );
        let xml = r#"<people><p name="ann" age="9"/><p name="bob" age="30"/><p name="cy" age="12"/></people>"#;
        assert_eq!(transform(&xslt, xml, &[]).unwrap(), "1.bob;2.cy;3.ann;(a)(b)(c)");
    }

    #[test]
    fn test_number_values_beyond_counter_range_print_as_decimals() {
        let xslt = stylesheet(
            r#"<xsl:output method="text"/>
               <xsl:template match="/">
                 <xsl:number value="1000000000000000000000" format="I"/>|<xsl:number value="1 div 0" format="a"/>|<xsl:number value="3999.6" format="I"/>|<xsl:number value="4000" format="I"/>
               </xsl:template>"#,
        );
        assert_eq!(
            transform(&xslt, "<r/>", &[]).unwrap().trim(),
            "1000000000000000000000|Infinity|4000|4000"
        );
    }

    #[test]
    fn test_decimal_literals_and_parameters() {
        let xslt = stylesheet(
            r#"<xsl:output method="text"/>
               <xsl:param name="rate" select="0"/>
               <xsl:template match="/"><xsl:value-of select="$rate"/>|<xsl:value-of select="count(//price[. &gt; 10.5])"/>|<xsl:value-of select="2.75"/></xsl:template>"#,
        );
        let xml = "<r><price>10.90</price><price>9.90</price></r>";
        assert_eq!(transform(&xslt, xml, &[("rate", "1.5")]).unwrap(), "1.5|1|2.75");
    }

    #[test]
    fn test_decimal_format_declarations() {
        let xslt = stylesheet(
            r#"<xsl:output method="text"/>
               <xsl:decimal-format decimal-separator="," grouping-separator="."/>
               <xsl:decimal-format name="plain" NaN="n/a" infinity="inf"/>
               <xsl:template match="/"><xsl:value-of select="format-number(1234567.891, '#.##0,00')"/>|<xsl:value-of select="format-number('x', '0', 'plain')"/>|<xsl:value-of select="format-number(1 div 0, '0', 'plain')"/></xsl:template>"#,
        );
        assert_eq!(transform(&xslt, "<r/>", &[]).unwrap(), "1.234.567,89|n/a|inf");

        let undeclared = stylesheet(
            r#"<xsl:template match="/"><xsl:value-of select="format-number(1, '0', 'nope')"/></xsl:template>"#,
        );
        assert!(transform(&undeclared, "<r/>", &[]).is_err());

        let conflicting = stylesheet(
            r#"<xsl:decimal-format decimal-separator=","/><xsl:decimal-format decimal-separator="."/>"#,
        );
        assert!(XsltParser::parse(&conflicting).is_err());
        let too_long = stylesheet(r#"<xsl:decimal-format zero-digit="00"/>"#);
        assert!(XsltParser::parse(&too_long).is_err());
    }

    #[test]
    fn test_namespace_alias_rewrites_literal_elements() {
        let xslt = r#"<xsl:stylesheet version="1.0"
                xmlns:xsl="http://www.w3.org/1999/XSL/Transform"
                xmlns:axsl="urn:alias">
            <xsl:namespace-alias stylesheet-prefix="axsl" result-prefix="xsl"/>
            <xsl:output omit-xml-declaration="yes"/>
            <xsl:template match="/">
              <axsl:stylesheet version="1.0"><axsl:template match="{name(*)}"/></axsl:stylesheet>
            </xsl:template>
        </xsl:stylesheet>"#;
        let out = transform(xslt, "<doc/>", &[]).unwrap();
        assert!(
            out.starts_with(r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform""#),
            "{}",
            out
        );
        assert!(out.contains(r#"<xsl:template match="doc"/>"#), "{}", out);
        assert!(!out.contains("urn:alias"), "{}", out);

        let undeclared = stylesheet(
            r#"<xsl:namespace-alias stylesheet-prefix="missing" result-prefix="xsl"/>"#,
        );
        assert!(XsltParser::parse(&undeclared).is_err());
    }

    #[test]
    fn test_imported_rules_rank_below_and_apply_imports_reaches_them() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("base.xsl"),
            stylesheet(
                r#"<xsl:template match="item">(<xsl:value-of select="."/>)</xsl:template>
                   <xsl:template match="note">base-note</xsl:template>
                   <xsl:variable name="label" select="'base'"/>"#,
            ),
        )
        .unwrap();
        let main_path = dir.path().join("main.xsl");
        std::fs::write(
            &main_path,
            stylesheet(
                r#"<xsl:import href="base.xsl"/>
                   <xsl:output method="text"/>
                   <xsl:variable name="label" select="'main'"/>
                   <xsl:template match="/"><xsl:value-of select="$label"/>:<xsl:apply-templates select="//item | //note"/></xsl:template>
                   <xsl:template match="item">[<xsl:apply-imports/>]</xsl:template>"#,
            ),
        )
        .unwrap();

        let tree = parse_xml(&std::fs::read_to_string(&main_path).unwrap()).unwrap();
        let template = XsltParser::compile_at(&tree, Some(&main_path)).unwrap();
        let source = parse_xml("<r><item>a</item><note/><item>b</item></r>").unwrap();
        assert_eq!(
            template.execute(&source, &[]).unwrap(),
            "main:[(a)]base-note[(b)]"
        );

        // Without the file's location the relative href cannot be found.
        assert!(matches!(
            XsltParser::compile(&tree),
            Err(XsltError::Module { .. })
        ));
    }

    #[test]
    fn test_apply_imports_falls_back_to_built_in_rules() {
        let xslt = stylesheet(
            r#"<xsl:output method="text"/>
               <xsl:template match="item">&lt;<xsl:apply-imports/>&gt;</xsl:template>"#,
        );
        assert_eq!(
            transform(&xslt, "<r><item>x<b>y</b></item></r>", &[]).unwrap(),
            "<xy>"
        );
    }

    #[test]
    fn test_keys_and_modes() {
        let xslt = stylesheet(
            r#"<xsl:output method="text"/>
               <xsl:key name="by-id" match="item" use="@id"/>
               <xsl:template match="/"><xsl:apply-templates select="key('by-id', 'b')" mode="show"/></xsl:template>
               <xsl:template match="item" mode="show">[<xsl:value-of select="."/>]</xsl:template>
               <xsl:template match="item">wrong</xsl:template>"#,
        );
        let xml = r#"<list><item id="a">A</item><item id="b">B</item></list>"#;
        assert_eq!(transform(&xslt, xml, &[]).unwrap(), "[B]");
    }

    #[test]
    fn test_result_tree_fragment_is_copied_with_markup() {
        let xslt = stylesheet(
            r#"<xsl:output omit-xml-declaration="yes"/>
               <xsl:variable name="frag"><b>bold</b></xsl:variable>
               <xsl:template match="/"><out><xsl:copy-of select="$frag"/>|<xsl:value-of select="$frag"/></out></xsl:template>"#,
        );
        assert_eq!(
            transform(&xslt, "<r/>", &[]).unwrap(),
            "<out><b>bold</b>|bold</out>\n"
        );
    }

    #[test]
    fn test_identity_transform_with_attribute_sets() {
        let xslt = stylesheet(
            r#"<xsl:output omit-xml-declaration="yes"/>
               <xsl:attribute-set name="marked"><xsl:attribute name="seen">yes</xsl:attribute></xsl:attribute-set>
               <xsl:template match="@*|node()">
                 <xsl:copy use-attribute-sets="marked"><xsl:apply-templates select="@*|node()"/></xsl:copy>
               </xsl:template>"#,
        );
        assert_eq!(
            transform(&xslt, r#"<a x="1"><b/></a>"#, &[]).unwrap(),
            "<a seen=\"yes\" x=\"1\"><b seen=\"yes\"/></a>\n"
        );
    }

    #[test]
    fn test_simplified_stylesheet() {
        let xslt = r#"<html xsl:version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><body><xsl:value-of select="/doc/@title"/></body></html>"#;
        let out = transform(xslt, r#"<doc title="Hi"/>"#, &[]).unwrap();
        assert!(out.contains("<body>Hi</body>"), "{}", out);
    }

    #[test]
    fn test_strip_space_removes_whitespace_text() {
        let xslt = stylesheet(
            r#"<xsl:output method="text"/>
               <xsl:strip-space elements="*"/>
               <xsl:template match="/"><xsl:value-of select="count(/r/node())"/></xsl:template>"#,
        );
        assert_eq!(transform(&xslt, "<r>\n  <a/>\n  <b/>\n</r>", &[]).unwrap(), "2");
    }

    #[test]
    fn test_html_source_can_be_transformed() {
        let template = XsltParser::parse(&stylesheet(
            r#"<xsl:output method="text"/>
               <xsl:template match="/"><xsl:value-of select="//p/b"/></xsl:template>"#,
        ))
        .unwrap();
        let source = parse_html("<p>Hello <b>world").unwrap();
        assert_eq!(template.execute(&source, &[]).unwrap(), "world");
    }

    #[test]
    fn test_compile_errors() {
        let cases = [
            r#"<xsl:template match="/"><xsl:when test="1"/></xsl:template>"#,
            r#"<xsl:template match="/"><xsl:choose/></xsl:template>"#,
            r#"<xsl:template match="/"><xsl:call-template name="missing"/></xsl:template>"#,
            r#"<xsl:template match="/"><xsl:value-of select="no-such-function()"/></xsl:template>"#,
            r#"<xsl:template match="/"><xsl:frobnicate/></xsl:template>"#,
            r#"<xsl:template match="/"><xsl:value-of/></xsl:template>"#,
            r#"<xsl:template match="a[">x</xsl:template>"#,
            r#"<xsl:import href="definitely-missing-module.xsl"/>"#,
            r#"<xsl:template match="/"/><xsl:import href="x.xsl"/>"#,
        ];
        for body in cases {
            assert!(XsltParser::parse(&stylesheet(body)).is_err(), "accepted: {}", body);
        }
        assert!(XsltParser::parse("<notxslt/>").is_err());
    }

    #[test]
    fn test_forwards_compatible_fallback() {
        let xslt = r#"<xsl:stylesheet version="2.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
            <xsl:output method="text"/>
            <xsl:template match="/"><xsl:future-thing><xsl:fallback>old</xsl:fallback></xsl:future-thing></xsl:template>
        </xsl:stylesheet>"#;
        assert_eq!(transform(xslt, "<r/>", &[]).unwrap(), "old");
    }
}
