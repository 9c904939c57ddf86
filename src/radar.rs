//! One fetch → dedup → notify → record pass.

use tracing::{error, info};

use crate::fetch::{FeedSource, NewsFetcher, format_for_display};
use crate::item::NewsItem;
use crate::notify::{Notifier, Transport};
use crate::state::HistoryStore;

/// Knobs for a single run, resolved from the config file.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub check_interval_hours: u32,
    pub max_items_per_push: usize,
    pub history_retention_days: u32,
    pub digest_title: String,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No source produced a matching item.
    NothingFetched,
    /// Every matching item had already been delivered.
    NothingNew,
    /// The digest with this many items was accepted.
    Delivered(usize),
    /// Sending failed; the items stay undelivered for the next run.
    DeliveryFailed(usize),
}

pub struct Radar<S, T> {
    fetcher: NewsFetcher<S>,
    notifier: Notifier<T>,
    history: HistoryStore,
    settings: RunSettings,
}

impl<S: FeedSource, T: Transport> Radar<S, T> {
    pub fn new(
        fetcher: NewsFetcher<S>,
        notifier: Notifier<T>,
        history: HistoryStore,
        settings: RunSettings,
    ) -> Self {
        Self {
            fetcher,
            notifier,
            history,
            settings,
        }
    }

    pub fn notifier(&self) -> &Notifier<T> {
        &self.notifier
    }

    #[cfg(test)]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn run(&mut self) -> RunOutcome {
        let fetched = self.fetch();
        if fetched.is_empty() {
            info!("no news fetched");
            self.history.update_last_check();
            return RunOutcome::NothingFetched;
        }

        let mut fresh = self.history.filter_new(fetched);
        if fresh.is_empty() {
            info!("nothing new since the last push");
            self.history.update_last_check();
            return RunOutcome::NothingNew;
        }

        self.cap(&mut fresh);

        let display_items = format_for_display(&fresh);
        info!("sending {} item(s)", display_items.len());
        let outcome = if self
            .notifier
            .send_digest(&display_items, &self.settings.digest_title)
        {
            self.history.mark_batch_pushed(&fresh);
            info!("digest delivered");
            RunOutcome::Delivered(fresh.len())
        } else {
            error!("digest delivery failed; items will be retried next run");
            RunOutcome::DeliveryFailed(fresh.len())
        };

        self.history.update_last_check();
        self.history
            .cleanup_old(self.settings.history_retention_days);

        let stats = self.history.stats();
        info!("history holds {} delivered item(s)", stats.total_pushed);
        outcome
    }

    fn fetch(&self) -> Vec<NewsItem> {
        info!(
            "collecting news from the last {} hour(s)",
            self.settings.check_interval_hours
        );
        self.fetcher.fetch_all(self.settings.check_interval_hours)
    }

    /// Keep the newest `max_items_per_push`; input is already newest first.
    fn cap(&self, items: &mut Vec<NewsItem>) {
        let max = self.settings.max_items_per_push;
        if items.len() > max {
            info!(
                "{} new items exceed the limit, keeping the newest {}",
                items.len(),
                max
            );
            items.truncate(max);
        }
    }
}
