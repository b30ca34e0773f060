//! Dotted-path field resolution over JSON resources.
//!
//! A path is a `.`-separated list of segments. A segment made only of ASCII
//! digits indexes into an array; any other segment is an object key:
//!
//! ```rust
//! use helios_conformance::path::{resolve, Resolved};
//! use serde_json::json;
//!
//! let patient = json!({"name": [{"family": "Smith"}]});
//! assert_eq!(resolve(&patient, "name.0.family"), Resolved::Found(&json!("Smith")));
//! assert_eq!(resolve(&json!({}), "name.0.family"), Resolved::Missing);
//! ```
//!
//! There are no wildcards or filters. Resolution never mutates the document.

use serde_json::Value;

/// Outcome of resolving a path.
///
/// `Missing` is distinct from a JSON `null`: `{"a": null}` resolves `a` to
/// `Found(Value::Null)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    /// The path led to a value.
    Found(&'a Value),
    /// Some segment along the path was absent.
    Missing,
}

impl<'a> Resolved<'a> {
    /// Returns the resolved value, if any.
    pub fn value(self) -> Option<&'a Value> {
        match self {
            Resolved::Found(value) => Some(value),
            Resolved::Missing => None,
        }
    }

    /// Returns true if resolution stopped at an absent segment.
    pub fn is_missing(self) -> bool {
        matches!(self, Resolved::Missing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'p> {
    Index(usize),
    Key(&'p str),
}

impl<'p> Segment<'p> {
    fn parse(raw: &'p str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = raw.parse() {
                return Segment::Index(index);
            }
        }
        Segment::Key(raw)
    }
}

/// Resolves `path` against `document`.
///
/// An empty path resolves to the document itself.
pub fn resolve<'a>(document: &'a Value, path: &str) -> Resolved<'a> {
    if path.is_empty() {
        return Resolved::Found(document);
    }

    let mut current = document;
    for raw in path.split('.') {
        let next = match (Segment::parse(raw), current) {
            (Segment::Index(index), Value::Array(items)) => items.get(index),
            (Segment::Key(key), Value::Object(fields)) => fields.get(key),
            (Segment::Index(_), _) | (Segment::Key(_), _) => None,
        };

        match next {
            Some(value) => current = value,
            None => return Resolved::Missing,
        }
    }

    Resolved::Found(current)
}
