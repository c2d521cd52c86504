//! Field paths addressing leaves inside an entity's JSON form.
//!
//! A [`FieldPath`] is a sequence of [`Segment`]s. `Key` steps into a JSON
//! object by field name; `Item` steps into a keyed array (components) by the
//! element's id. Paths order lexicographically by segment, so a path always
//! sorts before every path it is a prefix of.
//!
//! # Text form
//!
//! Paths are written JSON-pointer style and are used as map keys in stored
//! records:
//!
//! ```text
//! /components/@c1/health
//! ```
//!
//! Item segments carry a leading `@`. Inside a segment `~` is written `~0`,
//! `/` is written `~1` and `@` is written `~2`. The empty string is the root.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    /// Object field by name.
    Key(String),
    /// Keyed-array element by its `"id"`.
    Item(String),
}

// ---------------------------------------------------------------------------
// PathError
// ---------------------------------------------------------------------------

/// Error parsing the text form of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed field path '{path}': {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: &'static str,
}

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

/// Address of a value inside an entity's JSON form.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    /// The empty path, addressing the whole value.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build from segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    /// The path's segments, outermost first.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Returns `true` for the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Extend by an object key.
    pub fn key(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Key(name.to_owned()));
        next
    }

    /// Extend by a keyed-array item.
    pub fn item(&self, id: &str) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Item(id.to_owned()));
        next
    }

    /// Returns `true` if `self` equals `other` or is an ancestor of it.
    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Parse the text form.
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let malformed = |reason| PathError {
            path: text.to_owned(),
            reason,
        };
        if text.is_empty() {
            return Ok(Self::root());
        }
        let rest = text
            .strip_prefix('/')
            .ok_or_else(|| malformed("path must start with '/'"))?;

        let mut segments = Vec::new();
        for raw in rest.split('/') {
            let segment = match raw.strip_prefix('@') {
                Some(id) => Segment::Item(unescape(id).ok_or_else(|| malformed("bad escape"))?),
                None => Segment::Key(unescape(raw).ok_or_else(|| malformed("bad escape"))?),
            };
            segments.push(segment);
        }
        Ok(Self(segments))
    }
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '~' => out.push_str("~0"),
            '/' => out.push_str("~1"),
            '@' => out.push_str("~2"),
            other => out.push(other),
        }
    }
}

/// `None` on a dangling or unknown escape, or an unescaped `@`.
fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '~' => match chars.next()? {
                '0' => out.push('~'),
                '1' => out.push('/'),
                '2' => out.push('@'),
                _ => return None,
            },
            '@' => return None,
            other => out.push(other),
        }
    }
    Some(out)
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for segment in &self.0 {
            out.push('/');
            match segment {
                Segment::Key(name) => escape_into(&mut out, name),
                Segment::Item(id) => {
                    out.push('@');
                    escape_into(&mut out, id);
                }
            }
        }
        f.write_str(&out)
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn component_field_text_form() {
        let path = FieldPath::root().key("components").item("c1").key("health");
        assert_eq!(path.to_string(), "/components/@c1/health");
        assert_eq!(FieldPath::parse("/components/@c1/health").unwrap(), path);
    }

    #[test]
    fn root_is_empty_string() {
        assert_eq!(FieldPath::root().to_string(), "");
        assert!(FieldPath::parse("").unwrap().is_root());
    }

    #[test]
    fn special_characters_are_escaped() {
        let path = FieldPath::root().key("a/b~c").item("@weird/id");
        let text = path.to_string();
        assert_eq!(text, "/a~1b~0c/@~2weird~1id");
        assert_eq!(FieldPath::parse(&text).unwrap(), path);
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert!(FieldPath::parse("components").is_err());
        assert!(FieldPath::parse("/bad~9escape").is_err());
        assert!(FieldPath::parse("/dangling~").is_err());
        assert!(FieldPath::parse("/in@side").is_err());
    }

    #[test]
    fn prefix_sorts_first() {
        let parent = FieldPath::root().key("components").item("c1");
        let child = parent.key("health");
        assert!(parent < child);
        assert!(parent.is_prefix_of(&child));
        assert!(!child.is_prefix_of(&parent));
    }

    #[test]
    fn serializes_as_json_string() {
        let path = FieldPath::root().key("tags");
        assert_eq!(serde_json::to_value(&path).unwrap(), serde_json::json!("/tags"));
        let err = serde_json::from_value::<FieldPath>(serde_json::json!("tags"));
        assert!(err.is_err());
    }

    fn segment_strategy() -> impl Strategy<Value = Segment> {
        prop_oneof![
            "[a-z~/@_]{0,6}".prop_map(Segment::Key),
            "[a-z0-9~/@]{0,6}".prop_map(Segment::Item),
        ]
    }

    proptest! {
        #[test]
        fn text_form_is_unambiguous(segments in prop::collection::vec(segment_strategy(), 0..5)) {
            let path = FieldPath::from_segments(segments);
            prop_assert_eq!(FieldPath::parse(&path.to_string()).unwrap(), path);
        }
    }
}
