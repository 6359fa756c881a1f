//! Transform throughput benchmarks
//!
//! Measures applying a compiled stylesheet with varying:
//! - Catalog sizes (1, 10, 100, 1000 records)
//! - Worker configurations for batch transforms (1, 2, 4, 8)
//!
//! Run benchmarks: `cargo bench --bench transform_throughput`

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use xform::{DispatcherBuilder, ParameterList, XmlDocument};

const CATALOG_XSLT: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:param name="currency" select="'$'"/>
  <xsl:template match="/">
    <html><body><table>
      <xsl:for-each select="catalog/cd">
        <xsl:sort select="artist"/>
        <tr>
          <td><xsl:value-of select="title"/></td>
          <td><xsl:value-of select="artist"/></td>
          <td><xsl:value-of select="concat($currency, format-number(price, '0.00'))"/></td>
        </tr>
      </xsl:for-each>
    </table></body></html>
  </xsl:template>
</xsl:stylesheet>"#;

/// Generate a catalog with `count` records
fn generate_catalog(count: usize) -> String {
    let mut xml = String::from("<catalog>");
    for i in 0..count {
        xml.push_str(&format!(
            "<cd><title>Album {}</title><artist>Artist {}</artist><price>{}.99</price></cd>",
            i,
            count - i,
            i % 30
        ));
    }
    xml.push_str("</catalog>");
    xml
}

fn bench_record_counts(c: &mut Criterion) {
    let stylesheet = xform::read_xslt_string(CATALOG_XSLT).expect("stylesheet compiles");
    let params = ParameterList::new();
    let mut group = c.benchmark_group("record_count");

    for count in [1, 10, 100, 1000] {
        let document = xform::read_xml_string(&generate_catalog(count)).expect("catalog parses");
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &document, |b, doc| {
            b.iter(|| black_box(xform::transform(&stylesheet, doc, &params).expect("transform")));
        });
    }
    group.finish();
}

fn bench_parse_and_compile(c: &mut Criterion) {
    let catalog = generate_catalog(100);
    c.bench_function("compile_stylesheet", |b| {
        b.iter(|| black_box(xform::read_xslt_string(CATALOG_XSLT).expect("compiles")))
    });
    c.bench_function("parse_xml_100", |b| {
        b.iter(|| black_box(xform::read_xml_string(&catalog).expect("parses")))
    });
}

fn bench_worker_scaling(c: &mut Criterion) {
    let stylesheet = xform::read_xslt_string(CATALOG_XSLT).expect("stylesheet compiles");
    let documents: Vec<XmlDocument> = (0..64)
        .map(|_| xform::read_xml_string(&generate_catalog(100)).expect("catalog parses"))
        .collect();
    let params = ParameterList::new();
    let mut group = c.benchmark_group("worker_scaling");
    group.throughput(Throughput::Elements(documents.len() as u64));

    for workers in [1, 2, 4, 8] {
        let dispatcher = DispatcherBuilder::new()
            .with_worker_count(workers)
            .build()
            .expect("worker pool starts");
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| black_box(dispatcher.transform_all(&stylesheet, &documents, &params)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_record_counts,
    bench_parse_and_compile,
    bench_worker_scaling
);
criterion_main!(benches);
