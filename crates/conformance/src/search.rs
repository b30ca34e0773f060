//! Search parameter serialization.
//!
//! A [`SearchSpec`] is an ordered list of [`SearchParam`]s. [`build`] turns it
//! into a query string (without the leading `?`):
//!
//! - modifiers go on the key: `name:exact=Smith`
//! - prefixes go on each value: `birthdate=ge2020-01-01`
//! - several values of one parameter are ORed: `code=a,b`
//! - several parameters are ANDed with `&`, in insertion order
//!
//! Chained (`subject.name`) and reverse-chained (`_has:Observation:subject:code`)
//! names are passed through as given. The builder does not interpret chains.
//!
//! Names and values are percent-encoded. Only bytes that would break the
//! query grammar are escaped (space, `&`, `=`, `+`, `,`, `#`, `%`, controls
//! and non-ASCII), so `:`, `/`, `|` and `$` stay literal:
//! `code=http://loinc.org|8867-4`.

use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Comparison prefix for ordered parameter types (date, number, quantity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Starts after.
    Sa,
    /// Ends before.
    Eb,
    /// Approximately.
    Ap,
}

impl Prefix {
    /// Returns the FHIR code string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Prefix::Eq => "eq",
            Prefix::Ne => "ne",
            Prefix::Gt => "gt",
            Prefix::Lt => "lt",
            Prefix::Ge => "ge",
            Prefix::Le => "le",
            Prefix::Sa => "sa",
            Prefix::Eb => "eb",
            Prefix::Ap => "ap",
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search parameter modifier, appended to the key as `:modifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    /// `:exact`
    Exact,
    /// `:contains`
    Contains,
    /// `:missing`
    Missing,
    /// `:not`
    Not,
    /// `:text`
    Text,
    /// `:above`
    Above,
    /// `:below`
    Below,
    /// `:in`
    In,
    /// `:not-in`
    NotIn,
    /// `:of-type`
    OfType,
    /// `:identifier`
    Identifier,
    /// Reference type restriction, e.g. `subject:Patient`.
    Type(String),
    /// Any modifier not listed above.
    Other(String),
}

impl Modifier {
    /// Returns the modifier text as it appears after the colon.
    pub fn as_str(&self) -> &str {
        match self {
            Modifier::Exact => "exact",
            Modifier::Contains => "contains",
            Modifier::Missing => "missing",
            Modifier::Not => "not",
            Modifier::Text => "text",
            Modifier::Above => "above",
            Modifier::Below => "below",
            Modifier::In => "in",
            Modifier::NotIn => "not-in",
            Modifier::OfType => "of-type",
            Modifier::Identifier => "identifier",
            Modifier::Type(resource_type) => resource_type,
            Modifier::Other(other) => other,
        }
    }
}

/// One `(name, modifier, values, prefix)` entry of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParam {
    /// Parameter name, possibly chained (`subject.name`) or `_has:...`.
    pub name: String,
    /// Optional modifier.
    pub modifier: Option<Modifier>,
    /// Values, ORed together.
    pub values: Vec<String>,
    /// Optional comparison prefix applied to every value.
    pub prefix: Option<Prefix>,
}

impl SearchParam {
    /// Creates a parameter with one value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::any_of(name, [value])
    }

    /// Creates a parameter matching any of the given values.
    pub fn any_of<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            modifier: None,
            values: values.into_iter().map(Into::into).collect(),
            prefix: None,
        }
    }

    /// Sets the modifier.
    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = Some(modifier);
        self
    }

    /// Sets the prefix.
    pub fn with_prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Returns the encoded key (`name` or `name:modifier`).
    pub fn encoded_key(&self) -> String {
        let mut key = encode_component(&self.name);
        if let Some(modifier) = &self.modifier {
            key.push(':');
            key.push_str(&encode_component(modifier.as_str()));
        }
        key
    }

    /// Returns the encoded, comma-joined value list.
    pub fn encoded_values(&self) -> String {
        let prefix = self.prefix.map(|p| p.as_str()).unwrap_or_default();
        self.values
            .iter()
            .map(|value| format!("{}{}", prefix, encode_component(value)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Ordered search criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchSpec {
    params: Vec<SearchParam>,
}

impl SearchSpec {
    /// Creates an empty search.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `name=value`.
    pub fn param(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entry(SearchParam::new(name, value))
    }

    /// Adds `name=v1,v2,...`.
    pub fn param_any<I, V>(self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.entry(SearchParam::any_of(name, values))
    }

    /// Adds `name:modifier=value`.
    pub fn modified(
        self,
        name: impl Into<String>,
        modifier: Modifier,
        value: impl Into<String>,
    ) -> Self {
        self.entry(SearchParam::new(name, value).with_modifier(modifier))
    }

    /// Adds `name=<prefix>value`.
    pub fn prefixed(self, name: impl Into<String>, prefix: Prefix, value: impl Into<String>) -> Self {
        self.entry(SearchParam::new(name, value).with_prefix(prefix))
    }

    /// Adds a fully specified parameter.
    pub fn entry(mut self, param: SearchParam) -> Self {
        self.params.push(param);
        self
    }

    /// Appends a parameter in place.
    pub fn push(&mut self, param: SearchParam) {
        self.params.push(param);
    }

    /// Returns true if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns the parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SearchParam> {
        self.params.iter()
    }

    /// Serializes to a query string without the leading `?`.
    pub fn to_query_string(&self) -> String {
        build(self)
    }

    /// Serializes for use in an `If-None-Exist` header.
    pub fn to_criteria(&self) -> String {
        build(self)
    }
}

impl<K, V> FromIterator<(K, V)> for SearchSpec
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(SearchSpec::new(), |spec, (name, value)| spec.param(name, value))
    }
}

/// Builds the query string for `spec`.
///
/// An empty spec yields an empty string; callers then omit the `?`.
pub fn build(spec: &SearchSpec) -> String {
    spec.iter()
        .map(|param| format!("{}={}", param.encoded_key(), param.encoded_values()))
        .collect::<Vec<_>>()
        .join("&")
}

/// Bytes escaped inside a query component. `:` `/` `@` `?` stay literal.
const COMPONENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b',')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'`');

fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, COMPONENT).to_string()
}
