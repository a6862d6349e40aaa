//! Benchmarks for link extraction and filtering.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use linkharvest::prelude::*;
use std::collections::BTreeSet;
use url::Url;

fn sample_page(links: usize) -> String {
    let mut html = String::from("<html><body>");
    for i in 0..links {
        html.push_str(&format!(
            r#"<p>Item {i}</p><a href="/section/{}/article-{i}">a</a><a href="https://cdn{}.test/asset/{i}">b</a>"#,
            i % 7,
            i % 3
        ));
    }
    html.push_str("</body></html>");
    html
}

fn extraction_benchmark(c: &mut Criterion) {
    let source = Url::parse("https://bench.test/index.html").unwrap();
    let page = sample_page(500);

    c.bench_function("extract_links_500", |b| {
        b.iter(|| black_box(extract_links(black_box(&page), &source)))
    });
}

fn filter_benchmark(c: &mut Criterion) {
    let links: BTreeSet<String> = (0..5_000)
        .map(|i| format!("https://site{}.test/news/{i}?ref=ads{}", i % 50, i % 11))
        .collect();
    let filters = FilterSet::new()
        .with_include(KeywordSet::parse("news, sport"))
        .with_exclude(KeywordSet::parse("ads3, ads7"));

    c.bench_function("filter_5000", |b| {
        b.iter(|| black_box(filters.apply(black_box(&links))))
    });
}

criterion_group!(benches, extraction_benchmark, filter_benchmark);
criterion_main!(benches);
