//! Response body rewriting
//!
//! Rules are literal byte substitutions applied in order over the whole
//! buffered body. The rewriter knows nothing about the payload's encoding or
//! structure: a token is replaced wherever it occurs, including inside JSON
//! string values.

use hyper::body::Bytes;
use serde::Deserialize;

/// A single literal substitution
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RewriteRule {
    /// Token to search for (must not be empty)
    pub from: String,
    /// Replacement token
    pub to: String,
}

impl RewriteRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Applies an ordered list of [`RewriteRule`]s to response bodies
#[derive(Debug, Clone, Default)]
pub struct BodyRewriter {
    rules: Vec<RewriteRule>,
}

impl BodyRewriter {
    /// Rules with an empty `from` token are dropped
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        let rules = rules.into_iter().filter(|r| !r.from.is_empty()).collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, body: Bytes) -> Bytes {
        self.rules.iter().fold(body, |body, rule| {
            match replace_all(&body, rule.from.as_bytes(), rule.to.as_bytes()) {
                Some(rewritten) => Bytes::from(rewritten),
                None => body,
            }
        })
    }
}

/// Replace every non-overlapping occurrence of `from`, scanning left to right
///
/// Returns `None` when `from` does not occur (or is empty).
fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Option<Vec<u8>> {
    let mut pos = find(haystack, from, 0)?;
    let mut out = Vec::with_capacity(haystack.len());
    let mut last = 0;

    loop {
        out.extend_from_slice(&haystack[last..pos]);
        out.extend_from_slice(to);
        last = pos + from.len();
        match find(haystack, from, last) {
            Some(next) => pos = next,
            None => break,
        }
    }

    out.extend_from_slice(&haystack[last..]);
    Some(out)
}

fn find(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if needle.is_empty() || start >= haystack.len() {
        return None;
    }
    haystack[start..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| start + i)
}
