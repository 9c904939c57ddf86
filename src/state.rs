use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::item::NewsItem;

/// Everything that survives between runs, serialized to JSON
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct History {
    /// item id -> when it was delivered
    #[serde(default, with = "timestamp::map")]
    pub pushed_news: BTreeMap<String, DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Summary of the history file
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStats {
    pub total_pushed: usize,
    pub last_check: Option<DateTime<Utc>>,
}

/// Delivered-item bookkeeping backed by a JSON file.
///
/// Every mutating call persists immediately; a failed write is logged and the
/// in-memory state stays authoritative for the rest of the run.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    history: History,
}

impl HistoryStore {
    /// Load history from JSON, or start empty if the file is missing,
    /// blank or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let history = match read_history(&path) {
            Ok(history) => history,
            Err(err) => {
                warn!(
                    "could not load history from {}, starting empty: {}",
                    path.display(),
                    err
                );
                History::default()
            }
        };

        debug!(
            "loaded {} pushed ids from {}",
            history.pushed_news.len(),
            path.display()
        );
        Self { path, history }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn is_pushed(&self, id: &str) -> bool {
        self.history.pushed_news.contains_key(id)
    }

    /// Items not yet delivered, in their original order.
    pub fn filter_new(&self, items: Vec<NewsItem>) -> Vec<NewsItem> {
        let new_items: Vec<NewsItem> = items
            .into_iter()
            .filter(|item| !self.is_pushed(&item.id))
            .collect();
        info!("{} new item(s) after dedup", new_items.len());
        new_items
    }

    /// Record every item as delivered now, then persist.
    pub fn mark_batch_pushed(&mut self, items: &[NewsItem]) {
        self.mark_batch_pushed_at(items, Utc::now());
    }

    pub fn mark_batch_pushed_at(&mut self, items: &[NewsItem], now: DateTime<Utc>) {
        for item in items {
            self.history.pushed_news.insert(item.id.clone(), now);
        }
        self.persist();
    }

    /// Drop delivery records older than `days`, then persist.
    pub fn cleanup_old(&mut self, days: u32) {
        self.cleanup_old_at(days, Utc::now());
    }

    pub fn cleanup_old_at(&mut self, days: u32, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(i64::from(days));
        let before = self.history.pushed_news.len();

        self.history
            .pushed_news
            .retain(|_, pushed_at| *pushed_at >= cutoff);

        info!(
            "pruned history: {} -> {} entries",
            before,
            self.history.pushed_news.len()
        );
        self.persist();
    }

    pub fn update_last_check(&mut self) {
        self.update_last_check_at(Utc::now());
    }

    pub fn update_last_check_at(&mut self, now: DateTime<Utc>) {
        self.history.last_check = Some(now);
        self.persist();
    }

    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            total_pushed: self.history.pushed_news.len(),
            last_check: self.history.last_check,
        }
    }

    /// Save history to JSON
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.history)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    fn persist(&self) {
        match self.save() {
            Ok(()) => debug!("history saved to {}", self.path.display()),
            Err(err) => error!(
                "failed to save history to {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

fn read_history(path: &Path) -> Result<History> {
    if !path.exists() {
        return Ok(History::default());
    }

    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(History::default());
    }

    Ok(serde_json::from_str(&contents)?)
}

/// Timestamps are written as RFC 3339; offset-less ISO-8601 values are read
/// as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub mod map {
        use chrono::{DateTime, SecondsFormat, Utc};
        use serde::de::Error;
        use serde::{Deserialize, Deserializer, Serializer};
        use std::collections::BTreeMap;

        pub fn serialize<S: Serializer>(
            map: &BTreeMap<String, DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            serializer.collect_map(
                map.iter()
                    .map(|(id, at)| (id, at.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
            )
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<BTreeMap<String, DateTime<Utc>>, D::Error> {
            let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
            raw.into_iter()
                .map(|(id, at)| match super::parse(&at) {
                    Some(parsed) => Ok((id, parsed)),
                    None => Err(D::Error::custom(format!("invalid timestamp '{}'", at))),
                })
                .collect()
        }
    }

    pub mod option {
        use chrono::{DateTime, SecondsFormat, Utc};
        use serde::de::Error;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(at) => serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw))),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str) -> NewsItem {
        NewsItem {
            id: id.to_string(),
            title: format!("title {id}"),
            link: format!("https://example.com/{id}"),
            summary: String::new(),
            source: "Example".to_string(),
            published: Utc::now(),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(dir.path().join("history.json"));
        assert_eq!(store.stats().total_pushed, 0);
        assert_eq!(store.stats().last_check, None);
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{ not json").unwrap();

        let store = HistoryStore::load(&path);
        assert_eq!(store.history(), &History::default());
    }

    #[test]
    fn mark_batch_then_is_pushed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HistoryStore::load(dir.path().join("history.json"));
        assert!(!store.is_pushed("a"));

        store.mark_batch_pushed(&[item("a"), item("b")]);

        assert!(store.is_pushed("a"));
        assert!(store.is_pushed("b"));
        assert!(!store.is_pushed("c"));
    }

    #[test]
    fn filter_new_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HistoryStore::load(dir.path().join("history.json"));
        store.mark_batch_pushed(&[item("b")]);

        let fresh = store.filter_new(vec![item("c"), item("b"), item("a")]);
        let ids: Vec<&str> = fresh.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn persists_across_loads_and_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data").join("history.json");

        let mut store = HistoryStore::load(&path);
        store.mark_batch_pushed(&[item("x")]);
        store.update_last_check();
        assert!(path.exists());

        let reloaded = HistoryStore::load(&path);
        assert!(reloaded.is_pushed("x"));
        assert_eq!(reloaded.stats().total_pushed, 1);
        assert!(reloaded.stats().last_check.is_some());
        assert_eq!(reloaded.history(), store.history());
    }

    #[test]
    fn cleanup_removes_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HistoryStore::load(dir.path().join("history.json"));
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();

        store.mark_batch_pushed_at(&[item("old")], now - Duration::days(31));
        store.mark_batch_pushed_at(&[item("recent")], now - Duration::days(29));

        store.cleanup_old_at(30, now);

        assert!(!store.is_pushed("old"));
        assert!(store.is_pushed("recent"));
        assert_eq!(store.stats().total_pushed, 1);
    }

    #[test]
    fn cleanup_persists_even_when_nothing_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut store = HistoryStore::load(&path);

        store.cleanup_old(30);

        assert!(path.exists());
    }

    #[test]
    fn failed_save_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes every write fail
        let path = dir.path().join("history.json");
        fs::create_dir(&path).unwrap();

        let mut store = HistoryStore::load(&path);
        store.mark_batch_pushed(&[item("a")]);

        assert!(store.save().is_err());
        assert!(store.is_pushed("a"));
    }

    #[test]
    fn sub_microsecond_timestamps_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut store = HistoryStore::load(&path);
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
            + Duration::nanoseconds(123_456_789);

        store.mark_batch_pushed_at(&[item("a")], at);
        store.update_last_check_at(at);

        let reloaded = HistoryStore::load(&path);
        assert_eq!(reloaded.history().pushed_news["a"], at);
        assert_eq!(reloaded.stats().last_check, Some(at));
    }

    #[test]
    fn reads_offsetless_timestamps_as_utc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(
            &path,
            r#"{
  "pushed_news": {
    "https://example.com/a": "2024-05-01T08:30:00.123456",
    "guid-b": "2024-05-02T09:00:00+02:00"
  },
  "last_check": null
}"#,
        )
        .unwrap();

        let store = HistoryStore::load(&path);
        let pushed = &store.history().pushed_news;
        assert_eq!(
            pushed["https://example.com/a"],
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
                + Duration::microseconds(123456)
        );
        assert_eq!(
            pushed["guid-b"],
            Utc.with_ymd_and_hms(2024, 5, 2, 7, 0, 0).unwrap()
        );
        assert_eq!(store.stats().last_check, None);
    }

    #[test]
    fn writes_rfc3339_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut store = HistoryStore::load(&path);
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        store.mark_batch_pushed_at(&[item("a")], at);
        store.update_last_check_at(at);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["pushed_news"]["a"], "2024-01-02T03:04:05Z");
        assert_eq!(json["last_check"], "2024-01-02T03:04:05Z");
    }
}
