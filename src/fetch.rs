use chrono::{DateTime, Duration, Utc};
use feed_rs::parser;
use reqwest::blocking::Client;
use tracing::{debug, error, info, warn};

use crate::config::SourceConfig;
use crate::error::{RadarError, Result};
use crate::item::{DisplayItem, NewsItem};
use crate::text::{strip_html, truncate_chars};

/// Entries taken from each feed per run.
pub const MAX_ENTRIES_PER_SOURCE: usize = 20;

/// Summary length, in characters, kept on a fetched item.
pub const SUMMARY_CHARS: usize = 200;

const USER_AGENT: &str = "ai-news-radar/0.1";
const FETCH_TIMEOUT_SECS: u64 = 10;

/// One entry as it came out of a feed, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// Retrieves raw entries for a feed URL.
pub trait FeedSource {
    fn fetch(&self, url: &str) -> Result<Vec<RawEntry>>;
}

/// Fetches over HTTP and parses RSS/Atom with feed-rs.
pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

impl FeedSource for HttpFeedSource {
    fn fetch(&self, url: &str) -> Result<Vec<RawEntry>> {
        let resp = self.client.get(url).send()?;
        if !resp.status().is_success() {
            return Err(RadarError::Http(format!("HTTP error {}", resp.status())));
        }

        let bytes = resp.bytes()?;
        parse_entries(&bytes[..])
    }
}

/// Parse feed bytes into raw entries.
pub fn parse_entries(bytes: &[u8]) -> Result<Vec<RawEntry>> {
    // Entries without a GUID are keyed by their link, not a generated hash
    let parsed = parser::Builder::new()
        .id_generator(|links, _title, _base| {
            links.first().map(|l| l.href.clone()).unwrap_or_default()
        })
        .build()
        .parse(bytes)
        .map_err(|e| RadarError::Feed(format!("failed to parse feed: {}", e)))?;

    let entries = parsed
        .entries
        .into_iter()
        .map(|entry| RawEntry {
            id: Some(entry.id).filter(|id| !id.trim().is_empty()),
            title: entry.title.map(|t| t.content),
            link: entry.links.first().map(|l| l.href.clone()),
            summary: entry
                .summary
                .map(|t| t.content)
                .or_else(|| entry.content.and_then(|c| c.body)),
            published: entry.published,
            updated: entry.updated,
        })
        .collect();

    Ok(entries)
}

/// Turns configured sources into a filtered, newest-first item list.
pub struct NewsFetcher<S> {
    source: S,
    sources: Vec<SourceConfig>,
    keywords: Vec<String>,
}

impl<S: FeedSource> NewsFetcher<S> {
    /// Disabled sources are dropped here and never fetched.
    pub fn new(source: S, sources: Vec<SourceConfig>, keywords: Vec<String>) -> Self {
        let sources = sources.into_iter().filter(|s| s.enabled).collect();
        let keywords = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            source,
            sources,
            keywords,
        }
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// Items from every source published within the last `hours`, newest first.
    pub fn fetch_all(&self, hours: u32) -> Vec<NewsItem> {
        self.fetch_all_at(hours, Utc::now())
    }

    pub fn fetch_all_at(&self, hours: u32, now: DateTime<Utc>) -> Vec<NewsItem> {
        let cutoff = now - Duration::hours(i64::from(hours));
        let mut all_items = Vec::new();

        for source in &self.sources {
            if !source.is_rss() {
                warn!(
                    "skipping {}: unsupported source type '{}'",
                    source.name, source.kind
                );
                continue;
            }

            let items = self.fetch_source(source, now);
            all_items.extend(items.into_iter().filter(|item| item.published >= cutoff));
        }

        sort_items_newest_first(&mut all_items);

        info!("{} matching item(s) across all sources", all_items.len());
        all_items
    }

    /// Fetch one source; failures are logged and yield nothing.
    fn fetch_source(&self, source: &SourceConfig, now: DateTime<Utc>) -> Vec<NewsItem> {
        info!("fetching {}", source.name);

        let entries = match self.source.fetch(&source.url) {
            Ok(entries) => entries,
            Err(err) => {
                error!("failed to fetch {}: {}", source.name, err);
                return Vec::new();
            }
        };

        let mut items = Vec::new();
        for entry in entries.into_iter().take(MAX_ENTRIES_PER_SOURCE) {
            match normalize_entry(entry, &source.name, now) {
                Ok(item) => {
                    if self.matches_keywords(&item) {
                        items.push(item);
                    }
                }
                Err(err) => warn!("skipping entry from {}: {}", source.name, err),
            }
        }

        info!("{} matching item(s) from {}", items.len(), source.name);
        items
    }

    /// True when no keywords are configured or any keyword appears in the
    /// title or summary (case-insensitive).
    pub fn matches_keywords(&self, item: &NewsItem) -> bool {
        if self.keywords.is_empty() {
            return true;
        }

        let text = format!("{} {}", item.title, item.summary).to_lowercase();
        let matched = self.keywords.iter().any(|k| text.contains(k.as_str()));
        if !matched {
            debug!("no keyword in '{}'", item.title);
        }
        matched
    }
}

/// Build a [`NewsItem`] from a raw entry. The publish time falls back to
/// `updated`, then to `now`.
pub fn normalize_entry(entry: RawEntry, source: &str, now: DateTime<Utc>) -> Result<NewsItem> {
    let title = entry
        .title
        .map(|t| strip_html(&t))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RadarError::Feed("entry has no title".to_string()))?;

    let link = entry
        .link
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    let id = entry.id.or_else(|| link.clone()).ok_or_else(|| {
        RadarError::Feed(format!("entry '{}' has neither id nor link", title))
    })?;
    let link = link
        .ok_or_else(|| RadarError::Feed(format!("entry '{}' has no link", title)))?;

    let summary = entry
        .summary
        .map(|s| truncate_chars(&strip_html(&s), SUMMARY_CHARS))
        .unwrap_or_default();

    let published = entry.published.or(entry.updated).unwrap_or(now);

    Ok(NewsItem {
        id,
        title,
        link,
        summary,
        source: source.to_string(),
        published,
    })
}

/// Stable sort, newest first.
pub fn sort_items_newest_first(items: &mut [NewsItem]) {
    items.sort_by(|a, b| b.published.cmp(&a.published));
}

/// Display shape for each item: shorter summary, formatted time.
pub fn format_for_display(items: &[NewsItem]) -> Vec<DisplayItem> {
    items.iter().map(DisplayItem::from).collect()
}
