//! HTML link extraction built on `scraper`.

use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

use crate::address::{is_fetchable, NormalizationPolicy};

// Literal selectors; parsing them cannot fail at runtime.
#[allow(clippy::expect_used)]
fn link_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| {
        Selector::parse("a[href], area[href]").expect("link selector is a valid CSS selector")
    })
}

// Literal selectors; parsing them cannot fail at runtime.
#[allow(clippy::expect_used)]
fn base_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| {
        Selector::parse("base[href]").expect("base selector is a valid CSS selector")
    })
}

/// Extracts absolute, fetchable links from HTML documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkExtractor {
    policy: NormalizationPolicy,
}

impl LinkExtractor {
    /// Creates an extractor applying `policy` to every discovered link.
    #[must_use]
    pub fn new(policy: NormalizationPolicy) -> Self {
        Self { policy }
    }

    /// Returns the normalization policy.
    #[must_use]
    pub fn policy(&self) -> NormalizationPolicy {
        self.policy
    }

    /// Returns every valid outbound address found in `body`.
    ///
    /// References resolve against the document's `<base href>` when it is a
    /// fetchable address, otherwise against `source`. References that cannot
    /// be resolved, or resolve to a non-http(s) address, are skipped.
    #[must_use]
    pub fn extract_links(&self, body: &str, source: &Url) -> BTreeSet<String> {
        let document = Html::parse_document(body);
        let base = document_base(&document, source);

        let mut links = BTreeSet::new();
        let mut skipped = 0usize;
        for element in document.select(link_selector()) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };

            match base.join(href.trim()) {
                Ok(resolved) if is_fetchable(&resolved) => {
                    links.insert(self.policy.apply(resolved));
                }
                Ok(_) => skipped += 1,
                Err(err) => {
                    debug!(source = %source, href = %href, error = %err, "Skipping unresolvable link");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            debug!(source = %source, skipped, kept = links.len(), "Skipped non-fetchable links");
        }

        links
    }
}

fn document_base(document: &Html, source: &Url) -> Url {
    document
        .select(base_selector())
        .next()
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| source.join(href.trim()).ok())
        .filter(is_fetchable)
        .unwrap_or_else(|| source.clone())
}

/// Extracts links with the default (preserving) normalization policy.
#[must_use]
pub fn extract_links(body: &str, source: &Url) -> BTreeSet<String> {
    LinkExtractor::default().extract_links(body, source)
}
