use chrono::{DateTime, Utc};

use crate::text::ellipsize;

/// Maximum summary length, in characters, kept on a display item.
pub const DISPLAY_SUMMARY_CHARS: usize = 150;

/// A single discovered article
#[derive(Debug, Clone, PartialEq)]
pub struct NewsItem {
    pub id: String, // feed GUID, or the link when the feed has none
    pub title: String,
    pub link: String,
    pub summary: String,
    pub source: String,
    pub published: DateTime<Utc>,
}

/// Simplified shape used when rendering a digest
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayItem {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub source: String,
    pub time: String,
}

impl From<&NewsItem> for DisplayItem {
    fn from(item: &NewsItem) -> Self {
        DisplayItem {
            title: item.title.clone(),
            link: item.link.clone(),
            summary: ellipsize(&item.summary, DISPLAY_SUMMARY_CHARS),
            source: item.source.clone(),
            time: item.published.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}
