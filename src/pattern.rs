//! Legacy label patterns and the composite classifier built from them.
//!
//! Every legacy label becomes one named group in a single alternation:
//! `^(?:(?P<Guide>how[- ]?to)|(?P<Meta>meta))`. The match is anchored at the
//! start of the flair text, so a label only applies when the flair begins with
//! one of its spellings.

use crate::emoji::strip_emoji;
use regex::{Regex, RegexBuilder};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("legacy label map is empty")]
    Empty,
    #[error("invalid legacy label name {label:?}: must be letters, digits or '_' and not start with a digit")]
    InvalidLabel { label: String },
    #[error("invalid pattern for legacy label {label:?}: {source}")]
    InvalidFragment {
        label: String,
        #[source]
        source: regex::Error,
    },
    #[error("composite flair pattern failed to compile: {0}")]
    Composite(#[source] regex::Error),
}

/// Ordered `label -> regex fragment` entries.
///
/// Inserting an existing label replaces its fragment but keeps its original
/// position, which is also how duplicate keys in the config file resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyLabelMap {
    entries: Vec<(String, String)>,
}

impl LegacyLabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, fragment: impl Into<String>) {
        let label = label.into();
        let fragment = fragment.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = fragment,
            None => self.entries.push((label, fragment)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(l, f)| (l.as_str(), f.as_str()))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<L: Into<String>, F: Into<String>> FromIterator<(L, F)> for LegacyLabelMap {
    fn from_iter<I: IntoIterator<Item = (L, F)>>(iter: I) -> Self {
        let mut map = LegacyLabelMap::new();
        for (label, fragment) in iter {
            map.insert(label, fragment);
        }
        map
    }
}

impl<'de> Deserialize<'de> for LegacyLabelMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LabelMapVisitor;

        impl<'de> Visitor<'de> for LabelMapVisitor {
            type Value = LegacyLabelMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping legacy label names to regex fragments")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = LegacyLabelMap::new();
                while let Some((label, fragment)) = access.next_entry::<String, String>()? {
                    map.insert(label, fragment);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(LabelMapVisitor)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    pub case_insensitive: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self { case_insensitive: true }
    }
}

/// One regex holding every legacy label as a named alternative.
#[derive(Debug, Clone)]
pub struct CompositePattern {
    regex: Regex,
    labels: Vec<String>,
}

impl CompositePattern {
    pub fn compile(map: &LegacyLabelMap, options: &MatchOptions) -> Result<Self, PatternError> {
        if map.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut alternatives = Vec::with_capacity(map.len());
        for (label, fragment) in map.iter() {
            if !is_group_name(label) {
                return Err(PatternError::InvalidLabel { label: label.to_string() });
            }
            // Compile each fragment alone first so errors name the entry and
            // a fragment cannot break out of its own group.
            Regex::new(fragment).map_err(|source| PatternError::InvalidFragment {
                label: label.to_string(),
                source,
            })?;
            alternatives.push(format!("(?P<{label}>{fragment})"));
        }

        let source = format!("^(?:{})", alternatives.join("|"));
        let regex = RegexBuilder::new(&source)
            .case_insensitive(options.case_insensitive)
            .build()
            .map_err(PatternError::Composite)?;

        Ok(Self {
            regex,
            labels: map.labels().map(str::to_string).collect(),
        })
    }

    /// Classifies already-normalized text.
    ///
    /// Label groups are scanned in declared order and the first one that took
    /// part in the match wins. Labels are the only top-level alternatives, so
    /// at most one of them can participate.
    pub fn classify(&self, normalized: &str) -> Option<&str> {
        let caps = self.regex.captures(normalized)?;
        self.labels
            .iter()
            .find(|label| caps.name(label).is_some())
            .map(String::as_str)
    }

    /// Strips emoji (and the whitespace they leave at the edges) from raw
    /// flair text and classifies the rest.
    pub fn classify_flair(&self, raw: &str) -> Option<&str> {
        self.classify(strip_emoji(raw).trim())
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

fn is_group_name(label: &str) -> bool {
    let mut chars = label.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
