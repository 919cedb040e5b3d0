use crate::pattern::CompositePattern;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A link flair template as returned by `/r/{sub}/api/link_flair_v2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlairTemplate {
    pub text: String,
    pub id: String,
    #[serde(default)]
    pub css_class: Option<String>,
}

/// What to do with a template whose text matches no legacy label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedTemplates {
    #[default]
    Error,
    Skip,
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("flair template {id} ({text:?}) does not match any legacy label")]
    UnclassifiableTemplate { id: String, text: String },
}

/// Legacy label to new flair template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateIndex {
    by_label: BTreeMap<String, FlairTemplate>,
}

impl TemplateIndex {
    /// Classifies each template's text and records it under its label.
    /// Later templates replace earlier ones that share a label.
    pub fn build(
        templates: &[FlairTemplate],
        pattern: &CompositePattern,
        unmatched: UnmatchedTemplates,
    ) -> Result<Self, IndexError> {
        let mut by_label = BTreeMap::new();
        for template in templates {
            match pattern.classify_flair(&template.text) {
                Some(label) => {
                    by_label.insert(label.to_string(), template.clone());
                }
                None if unmatched == UnmatchedTemplates::Skip => {
                    warn!(
                        "Skipping flair template {} ({:?}): no legacy label matches",
                        template.id, template.text
                    );
                }
                None => {
                    return Err(IndexError::UnclassifiableTemplate {
                        id: template.id.clone(),
                        text: template.text.clone(),
                    })
                }
            }
        }
        Ok(Self { by_label })
    }

    pub fn get(&self, label: &str) -> Option<&FlairTemplate> {
        self.by_label.get(label)
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlairTemplate)> {
        self.by_label.iter().map(|(l, t)| (l.as_str(), t))
    }

    /// Labels of the pattern that no template was indexed under. Submissions
    /// classified to one of these cannot be migrated.
    pub fn missing_labels<'a>(&self, pattern: &'a CompositePattern) -> Vec<&'a str> {
        pattern
            .labels()
            .iter()
            .filter(|label| !self.by_label.contains_key(label.as_str()))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{LegacyLabelMap, MatchOptions};

    fn template(text: &str, id: &str) -> FlairTemplate {
        FlairTemplate {
            text: text.to_string(),
            id: id.to_string(),
            css_class: None,
        }
    }

    fn pattern() -> CompositePattern {
        let map: LegacyLabelMap = [("Guide", "how[- ]?to"), ("Meta", "meta")].into_iter().collect();
        CompositePattern::compile(&map, &MatchOptions::default()).unwrap()
    }

    #[test]
    fn test_build_index() {
        let templates = vec![template("How-To", "t1"), template("Meta Discussion", "t2")];
        let index = TemplateIndex::build(&templates, &pattern(), UnmatchedTemplates::Error).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("Guide").unwrap().id, "t1");
        assert_eq!(index.get("Meta").unwrap().id, "t2");
        assert!(index.missing_labels(&pattern()).is_empty());
    }

    #[test]
    fn test_later_template_overrides() {
        let templates = vec![template("How-To", "t1"), template("how to (new)", "t3")];
        let index = TemplateIndex::build(&templates, &pattern(), UnmatchedTemplates::Error).unwrap();
        assert_eq!(index.get("Guide").unwrap().id, "t3");
        assert_eq!(index.missing_labels(&pattern()), vec!["Meta"]);
    }

    #[test]
    fn test_build_is_deterministic() {
        let templates = vec![
            template("Meta", "t2"),
            template("\u{1F4D6} How to", "t1"),
            template("meta (old)", "t4"),
        ];
        let first = TemplateIndex::build(&templates, &pattern(), UnmatchedTemplates::Error).unwrap();
        let second = TemplateIndex::build(&templates, &pattern(), UnmatchedTemplates::Error).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get("Meta").unwrap().id, "t4");
        assert_eq!(first.get("Guide").unwrap().id, "t1");
    }

    #[test]
    fn test_unclassifiable_template_is_error() {
        let templates = vec![template("How-To", "t1"), template("Announcement", "t9")];
        let err = TemplateIndex::build(&templates, &pattern(), UnmatchedTemplates::Error).unwrap_err();
        match err {
            IndexError::UnclassifiableTemplate { id, text } => {
                assert_eq!(id, "t9");
                assert_eq!(text, "Announcement");
            }
        }
    }

    #[test]
    fn test_unclassifiable_template_skipped() {
        let templates = vec![template("How-To", "t1"), template("Announcement", "t9")];
        let index = TemplateIndex::build(&templates, &pattern(), UnmatchedTemplates::Skip).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.iter().all(|(_, t)| t.id != "t9"));
    }

    #[test]
    fn test_nothing_classifiable_leaves_empty_index() {
        let templates = vec![template("Announcement", "t9"), template("Mod Post", "t8")];
        let index = TemplateIndex::build(&templates, &pattern(), UnmatchedTemplates::Skip).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.iter().count(), 0);
        assert_eq!(index.missing_labels(&pattern()), vec!["Guide", "Meta"]);
    }

    #[test]
    fn test_template_deserialize() {
        let json = r#"[
            {"text": "How-To", "id": "t1", "css_class": "guide", "text_editable": false, "type": "text"},
            {"text": "Meta", "id": "t2", "css_class": null}
        ]"#;
        let templates: Vec<FlairTemplate> = serde_json::from_str(json).unwrap();
        assert_eq!(templates[0].css_class.as_deref(), Some("guide"));
        assert_eq!(templates[1].css_class, None);
    }

    #[test]
    fn test_unmatched_policy_deserialize() {
        let skip: UnmatchedTemplates = serde_json::from_str(r#""skip""#).unwrap();
        assert_eq!(skip, UnmatchedTemplates::Skip);
        assert_eq!(UnmatchedTemplates::default(), UnmatchedTemplates::Error);
    }
}
