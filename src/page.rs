//! The records this crate fetches, and the key they are fetched by.

use serde::{Deserialize, Serialize};

/// Numeric identifier of a page within one language edition.
pub type PageId = u32;

/// Metadata about a single Wikipedia article. A `WikiPage` is only ever
/// produced by decoding an upstream response; callers receive it by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WikiPage {
    pub id: PageId,
    pub title: String,
    /// The plain-text introduction of the article.
    #[serde(rename = "abstract")]
    pub abstract_text: String,
}

impl WikiPage {
    pub fn new(id: PageId, title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            abstract_text: abstract_text.into(),
        }
    }
}
