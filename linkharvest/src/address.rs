//! Address validation and normalization.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// Schemes the engine is willing to fetch.
pub const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Returns true when `candidate` is a well-formed, fetchable address.
///
/// The candidate must spell out `scheme://authority`, the scheme must be
/// `http` or `https`, and the parsed host must be non-empty. Malformed input
/// is simply invalid; this never fails.
#[must_use]
pub fn is_valid_address(candidate: &str) -> bool {
    parse_address(candidate).is_some()
}

/// Parses `candidate` into a [`Url`] when it is a valid address.
#[must_use]
pub fn parse_address(candidate: &str) -> Option<Url> {
    let (scheme, rest) = candidate.split_once("://")?;
    if !ALLOWED_SCHEMES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(scheme))
    {
        return None;
    }

    // `Url` skips extra slashes for special schemes, so `http:///x` would
    // otherwise pick `x` as its host.
    if rest.is_empty() || rest.starts_with(['/', '\\']) {
        return None;
    }

    Url::parse(candidate).ok().filter(is_fetchable)
}

/// Returns true when an already-parsed URL is fetchable.
#[must_use]
pub fn is_fetchable(url: &Url) -> bool {
    ALLOWED_SCHEMES.contains(&url.scheme()) && url.host_str().is_some_and(|host| !host.is_empty())
}

/// Candidates split into fetchable addresses and rejected strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressList {
    /// Valid addresses in input order, without duplicates.
    pub valid: Vec<Url>,
    /// Candidates that failed validation, in input order.
    pub rejected: Vec<String>,
}

impl AddressList {
    /// Partitions raw candidates, trimming whitespace and dropping blanks.
    #[must_use]
    pub fn from_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        let mut seen = HashSet::new();
        for candidate in candidates {
            let candidate = candidate.as_ref().trim();
            if candidate.is_empty() {
                continue;
            }
            match parse_address(candidate) {
                Some(url) => {
                    if seen.insert(url.clone()) {
                        list.valid.push(url);
                    }
                }
                None => list.rejected.push(candidate.to_string()),
            }
        }
        list
    }

    /// Whether no valid address remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }
}

/// Splits uploaded text into one candidate per line and validates them.
#[must_use]
pub fn parse_address_list(text: &str) -> AddressList {
    AddressList::from_candidates(text.lines())
}

/// Policy applied to discovered links before deduplication.
///
/// Both rules are off by default, so `https://a.test/x` and
/// `https://a.test/x/#top` remain distinct entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationPolicy {
    /// Drop `#fragment` suffixes.
    #[serde(default)]
    pub strip_fragment: bool,
    /// Drop a trailing `/` from non-root paths.
    #[serde(default)]
    pub strip_trailing_slash: bool,
}

impl NormalizationPolicy {
    /// Policy that keeps addresses exactly as resolved.
    #[must_use]
    pub fn preserve() -> Self {
        Self::default()
    }

    /// Enables fragment stripping.
    #[must_use]
    pub fn with_strip_fragment(mut self, enabled: bool) -> Self {
        self.strip_fragment = enabled;
        self
    }

    /// Enables trailing-slash stripping.
    #[must_use]
    pub fn with_strip_trailing_slash(mut self, enabled: bool) -> Self {
        self.strip_trailing_slash = enabled;
        self
    }

    /// Applies the policy and returns the serialized address.
    #[must_use]
    pub fn apply(&self, mut url: Url) -> String {
        if self.strip_fragment {
            url.set_fragment(None);
        }

        if self.strip_trailing_slash {
            let path = url.path();
            if path.len() > 1 && path.ends_with('/') {
                let trimmed = path.trim_end_matches('/').to_string();
                let trimmed = if trimmed.is_empty() { "/".to_string() } else { trimmed };
                url.set_path(&trimmed);
            }
        }

        url.into()
    }
}
