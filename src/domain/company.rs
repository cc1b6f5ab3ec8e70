//! # Company value objects
//!
//! A `CompanyTarget` is one normalized input entry. Its `CompanyId` (the URL
//! slug) keys the checkpoint, the output directory and every log event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Company identifier (review-site URL slug) with strong typing
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(String);

impl CompanyId {
    #[must_use]
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CompanyId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for CompanyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One company to harvest, as produced by the input loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyTarget {
    pub id: CompanyId,
    pub display_name: String,
    pub review_url: String,
}

impl CompanyTarget {
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, review_url: impl Into<String>) -> Self {
        Self {
            id: CompanyId::new(id),
            display_name: display_name.into(),
            review_url: review_url.into(),
        }
    }

    /// Target whose display name and URL are derived from the slug alone
    #[must_use]
    pub fn from_slug(slug: &str) -> Self {
        Self::new(slug, slug, format!("https://www.ambitionbox.com/reviews/{slug}-reviews"))
    }
}
