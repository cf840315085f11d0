//! Path routing table
//!
//! Maps request paths to upstream targets through a prefix tree over
//! `/`-delimited segments. Each configured pattern is a sequence of literal
//! segments and `*` wildcards (a wildcard matches exactly one segment).
//!
//! # Lookup
//!
//! ```text
//! patterns:  ""        -> A
//!            v1/*      -> B
//!            v1/*/chat -> C
//!
//! "/v1/models"          root(A) → v1 → *(B)          = B
//! "/v1/models/chat"     root(A) → v1 → *(B) → chat(C) = C
//! "/v1/models/chat/x"   ... → chat(C), "x" unconsumed = C
//! "/v2"                 root(A), no child "v2"        = A
//! ```
//!
//! Literal children always win over the wildcard child, and the walk never
//! backtracks: once a branch is taken the alternative is not retried. The
//! deepest node carrying a value along the walk is the result.

use std::collections::HashMap;

/// Segment that matches any single path segment
pub const WILDCARD: &str = "*";

/// Split a pattern or request path into its segments.
///
/// A single leading `/` is stripped, so `/foo` and `foo` are the same path.
/// An empty remainder yields no segments (the root).
fn segments(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Route Node
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RouteNode<V> {
    literals: HashMap<String, RouteNode<V>>,
    wildcard: Option<Box<RouteNode<V>>>,
    value: Option<V>,
}

impl<V> Default for RouteNode<V> {
    fn default() -> Self {
        Self {
            literals: HashMap::new(),
            wildcard: None,
            value: None,
        }
    }
}

impl<V> RouteNode<V> {
    fn child_mut(&mut self, segment: &str) -> &mut RouteNode<V> {
        if segment == WILDCARD {
            self.wildcard.get_or_insert_with(Box::default)
        } else {
            self.literals.entry(segment.to_string()).or_default()
        }
    }

    fn child(&self, segment: &str) -> Option<&RouteNode<V>> {
        self.literals
            .get(segment)
            .or_else(|| self.wildcard.as_deref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Route Table
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable routing table built once from configuration
///
/// Read-only after construction, so it can be shared across request tasks
/// behind an `Arc` without locking.
#[derive(Debug, Clone)]
pub struct RouteTable<V> {
    root: RouteNode<V>,
    len: usize,
}

impl<V> RouteTable<V> {
    /// Build a table from `(pattern, value)` pairs.
    ///
    /// Duplicate patterns are not an error; the last one inserted wins.
    pub fn build<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = (P, V)>,
        P: AsRef<str>,
    {
        let mut root = RouteNode::default();
        let mut len = 0;

        for (pattern, value) in patterns {
            let mut node = &mut root;
            for segment in segments(pattern.as_ref()) {
                node = node.child_mut(segment);
            }
            if node.value.replace(value).is_none() {
                len += 1;
            }
        }

        Self { root, len }
    }

    /// Resolve a request path to the value of its deepest matching pattern.
    ///
    /// Returns `None` when no node on the walk carries a value.
    pub fn resolve(&self, path: &str) -> Option<&V> {
        let mut node = &self.root;
        let mut best = node.value.as_ref();

        for segment in segments(path) {
            match node.child(segment) {
                Some(next) => {
                    node = next;
                    if let Some(value) = node.value.as_ref() {
                        best = Some(value);
                    }
                }
                None => break,
            }
        }

        best
    }

    /// Number of distinct patterns carrying a value
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no pattern was configured
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<P: AsRef<str>, V> FromIterator<(P, V)> for RouteTable<V> {
    fn from_iter<I: IntoIterator<Item = (P, V)>>(iter: I) -> Self {
        Self::build(iter)
    }
}
