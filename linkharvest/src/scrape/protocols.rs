//! Protocol traits for page retrieval.
//!
//! The engine only needs "address in, body bytes out"; hosts can plug in any
//! transport by implementing [`Fetcher`].

use async_trait::async_trait;
use std::borrow::Cow;
use url::Url;

use crate::errors::FetchError;

/// Raw page content returned by a [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetchedBody {
    /// Final URL after redirects; relative links resolve against it.
    pub final_url: Url,
    /// HTTP status code.
    pub status_code: u16,
    /// Content type from headers.
    pub content_type: Option<String>,
    /// Response body bytes.
    pub body: Vec<u8>,
    /// Time taken to fetch in milliseconds.
    pub duration_ms: f64,
}

impl FetchedBody {
    /// Builds a 200 response carrying an HTML body.
    #[must_use]
    pub fn html(final_url: Url, body: impl Into<String>) -> Self {
        Self {
            final_url,
            status_code: 200,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.into().into_bytes(),
            duration_ms: 0.0,
        }
    }

    /// Whether the body may contain markup worth parsing.
    ///
    /// Responses without a content type are assumed to be markup.
    #[must_use]
    pub fn is_markup(&self) -> bool {
        self.content_type.as_deref().map_or(true, |ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("html") || ct.contains("xml") || ct.starts_with("text/")
        })
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Protocol for retrieving page content.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches a URL, failing on transport errors and non-2xx statuses.
    async fn fetch(&self, url: &Url) -> Result<FetchedBody, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_is_markup() {
        let page = FetchedBody::html(url("https://a.test/"), "<html></html>");
        assert!(page.is_markup());

        let xhtml = FetchedBody {
            content_type: Some("application/xhtml+xml".to_string()),
            ..page.clone()
        };
        assert!(xhtml.is_markup());

        let unknown = FetchedBody {
            content_type: None,
            ..page.clone()
        };
        assert!(unknown.is_markup());

        let image = FetchedBody {
            content_type: Some("image/png".to_string()),
            ..page
        };
        assert!(!image.is_markup());
    }

    #[test]
    fn test_text_is_lossy() {
        let page = FetchedBody {
            body: vec![b'o', b'k', 0xff],
            ..FetchedBody::html(url("https://a.test/"), "")
        };
        assert_eq!(page.text(), "ok\u{fffd}");
    }
}
