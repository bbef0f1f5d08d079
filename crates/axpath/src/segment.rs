//! Path value types: one [`Segment`] per hop, collected into an [`ElementPath`].
//!
//! Paths are plain values. They hold no reference into any live tree and can
//! be cloned, compared and sent across threads freely.

use crate::errors::SyntaxError;
use crate::serializer::escape_value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// The prefix every path starts with unless configured otherwise.
pub const DEFAULT_PREFIX: &str = "macos://ui/";

/// Characters that end a role in path text or are rejected inside one.
const ROLE_RESERVED: [char; 8] = ['/', '#', '[', ']', '"', '@', '=', '\\'];

/// Whether `role` can be written into path text and parsed back unchanged.
pub fn is_valid_role(role: &str) -> bool {
    !role.is_empty()
        && role
            .chars()
            .all(|c| !c.is_whitespace() && !ROLE_RESERVED.contains(&c))
}

/// An `attribute = value` filter attached to a segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Predicate {
    /// Attribute name exactly as written. Normalization happens at match time.
    pub name: String,
    pub value: String,
}

impl Predicate {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[@{}=\"{}\"]", self.name, escape_value(&self.value))
    }
}

/// One hop of a path: a role, an optional 1-based index and predicates that
/// must all hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub index: Option<NonZeroUsize>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub predicates: Vec<Predicate>,
}

impl Segment {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            index: None,
            predicates: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: NonZeroUsize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_predicate(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.predicates.push(Predicate::new(name, value));
        self
    }

    /// Value of the first predicate whose name satisfies `is_name`.
    pub fn predicate_value(&self, mut is_name: impl FnMut(&str) -> bool) -> Option<&str> {
        self.predicates
            .iter()
            .find(|p| is_name(&p.name))
            .map(|p| p.value.as_str())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.role)?;
        if let Some(index) = self.index {
            write!(f, "#{index}")?;
        }
        for predicate in &self.predicates {
            write!(f, "{predicate}")?;
        }
        Ok(())
    }
}

/// A parsed element path. Always holds at least one segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ElementPath {
    prefix: String,
    segments: Vec<Segment>,
}

impl ElementPath {
    /// Fails when there are no segments or when a role could not be written
    /// into path text. The error offset points at the offending segment as
    /// it would appear in the rendered path.
    pub fn new(prefix: impl Into<String>, segments: Vec<Segment>) -> Result<Self, SyntaxError> {
        let prefix = prefix.into();
        let mut offset = prefix.chars().count();
        if segments.is_empty() {
            return Err(SyntaxError::new(offset, "a path needs at least one segment"));
        }
        for segment in &segments {
            if !is_valid_role(&segment.role) {
                return Err(SyntaxError::new(
                    offset,
                    format!("invalid role {:?}", segment.role),
                ));
            }
            offset += segment.to_string().chars().count() + 1;
        }
        Ok(Self { prefix, segments })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first(&self) -> &Segment {
        &self.segments[0]
    }

    pub fn last(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }
}

impl fmt::Display for ElementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for ElementPath {
    type Err = SyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::parser::parse(s)
    }
}
