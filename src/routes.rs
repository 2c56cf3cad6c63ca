//! Route table mapping path prefixes to groups of backend base URLs
//!
//! The table is immutable once built and safe to share between connection
//! tasks without synchronization. Matching is prefix based: a request path
//! matches a route when it starts with the route's prefix, and the longest
//! matching prefix wins.

use std::collections::BTreeMap;

/// Error building a route table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteTableError {
    #[error("route prefix must not be empty")]
    EmptyPrefix,
}

/// A path prefix and its backends in registration order, duplicates included
#[derive(Debug, Clone, PartialEq, Eq)]
struct Route {
    prefix: String,
    backends: Vec<String>,
}

/// Result of a successful route lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    /// Position of the route in the table, stable for the table's lifetime
    pub index: usize,
    pub prefix: &'a str,
    /// Never empty
    pub backends: &'a [String],
}

/// Immutable prefix -> backends mapping
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    // Sorted by descending prefix length so the first hit is the longest match
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build a table from `(prefix, backends)` pairs
    ///
    /// A prefix given more than once keeps its last backend list. Entries with
    /// an empty backend list are kept but never match.
    pub fn new<I, P, B>(entries: I) -> Result<Self, RouteTableError>
    where
        I: IntoIterator<Item = (P, Vec<B>)>,
        P: Into<String>,
        B: Into<String>,
    {
        let mut by_prefix = BTreeMap::new();
        for (prefix, backends) in entries {
            let prefix = prefix.into();
            if prefix.is_empty() {
                return Err(RouteTableError::EmptyPrefix);
            }
            let backends: Vec<String> = backends.into_iter().map(Into::into).collect();
            by_prefix.insert(prefix, backends);
        }

        let mut routes: Vec<Route> = by_prefix
            .into_iter()
            .map(|(prefix, backends)| Route { prefix, backends })
            .collect();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Ok(Self { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the route serving `path`
    ///
    /// Returns `None` when no prefix matches, or when the longest matching
    /// prefix has no backends.
    pub fn find(&self, path: &str) -> Option<RouteMatch<'_>> {
        let (index, route) = self
            .routes
            .iter()
            .enumerate()
            .find(|(_, route)| path.starts_with(&route.prefix))?;

        if route.backends.is_empty() {
            return None;
        }

        Some(RouteMatch {
            index,
            prefix: &route.prefix,
            backends: &route.backends,
        })
    }
}
