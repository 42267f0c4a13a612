//! The indexable unit handed to a search index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tokens and metadata for one indexed item.
///
/// Handlers fill in the part-level fields; the extraction front end adds
/// subject, content, sender tokens, filename and version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Space-separated address tokens of the creator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Extra handler-specific fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl IndexDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_skips_empty_fields() {
        let mut doc = IndexDocument::new();
        doc.content = "hello".into();
        doc.version = Some(3);
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"content":"hello","version":3}"#);
    }
}
