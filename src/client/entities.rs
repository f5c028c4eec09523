//! Entity tags.

use serde::{Deserialize, Serialize};

/// Tags New Relic attaches to every entity. They are never managed by the provider.
pub const DEFAULT_TAGS: [&str; 5] = ["account", "accountId", "language", "trustedAccountId", "guid"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggingTag {
    pub key: String,
    pub values: Vec<String>,
}

impl TaggingTag {
    pub fn new<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_default(&self) -> bool {
        DEFAULT_TAGS.contains(&self.key.as_str())
    }

    /// True when every value in `values` is present on this tag.
    pub fn has_values(&self, values: &[String]) -> bool {
        values.iter().all(|v| self.values.contains(v))
    }
}

/// Find a tag by key.
pub fn find_tag<'a>(tags: &'a [TaggingTag], key: &str) -> Option<&'a TaggingTag> {
    tags.iter().find(|t| t.key == key)
}
