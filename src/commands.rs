use anyhow::{Context, Result, bail};
use colored::Colorize;
use std::any::Any;
use std::env;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, info, warn};

use crate::config::{self, Config, WEBHOOK_ENV};
use crate::fetch::{FeedSource, HttpFeedSource, NewsFetcher, format_for_display};
use crate::item::DisplayItem;
use crate::notify::{MAX_MESSAGE_BYTES, Notifier, Transport, WebhookTransport, render_digest};
use crate::radar::{Radar, RunOutcome, RunSettings};
use crate::state::HistoryStore;
use crate::{Cli, Cmd};

pub fn run_command(cli: Cli) -> Result<()> {
    let config_path = config::config_path(cli.config.as_deref());
    let mut cfg = config::load_config(&config_path, env::var(WEBHOOK_ENV).ok())
        .with_context(|| format!("Failed to load config from '{}'", config_path.display()))?;

    if let Some(state) = cli.state {
        cfg.state_path = state;
    }

    match cli.command.unwrap_or(Cmd::Run) {
        Cmd::Run => cmd_run(&cfg),
        Cmd::Preview => cmd_preview(&cfg),
        Cmd::Stats => cmd_stats(&cfg),
    }
}

fn run_settings(cfg: &Config) -> RunSettings {
    RunSettings {
        check_interval_hours: cfg.check_interval_hours,
        max_items_per_push: cfg.max_items_per_push,
        history_retention_days: cfg.history_retention_days,
        digest_title: cfg.digest_title.clone(),
    }
}

/// Fetch, dedup, push and record. Anything that aborts the run is reported
/// to the webhook before the error is returned.
fn cmd_run(cfg: &Config) -> Result<()> {
    let webhook = cfg.webhook()?;
    let notifier = Notifier::new(WebhookTransport::new(webhook)?);

    let source = match HttpFeedSource::new() {
        Ok(source) => source,
        Err(err) => {
            report_failure(&notifier, &err.to_string());
            return Err(err).context("Failed to set up the feed client");
        }
    };

    let fetcher = NewsFetcher::new(source, cfg.sources.clone(), cfg.keywords.clone());
    info!(
        "{} enabled source(s), {} keyword(s)",
        fetcher.sources().len(),
        cfg.keywords.len()
    );
    let history = HistoryStore::load(&cfg.state_path);
    let mut radar = Radar::new(fetcher, notifier, history, run_settings(cfg));

    match run_reported(&mut radar)? {
        RunOutcome::NothingFetched | RunOutcome::NothingNew => info!("nothing to push"),
        RunOutcome::Delivered(n) => info!("pushed {} item(s)", n),
        RunOutcome::DeliveryFailed(n) => warn!("{} item(s) left for the next run", n),
    }
    Ok(())
}

/// Run once; a panic inside the run is reported through the radar's own
/// notifier and turned into an error.
fn run_reported<S: FeedSource, T: Transport>(radar: &mut Radar<S, T>) -> Result<RunOutcome> {
    match panic::catch_unwind(AssertUnwindSafe(|| radar.run())) {
        Ok(outcome) => Ok(outcome),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("run aborted: {}", message);
            report_failure(radar.notifier(), &message);
            bail!("run aborted: {}", message)
        }
    }
}

/// Best effort: a failed report is logged and never replaces the original error.
fn report_failure<T: Transport>(notifier: &Notifier<T>, message: &str) {
    if !notifier.send_error(&format!("Run error: {}", message)) {
        warn!("could not deliver the failure report");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Show what the next run would push, without sending or recording anything
fn cmd_preview(cfg: &Config) -> Result<()> {
    let source = HttpFeedSource::new().context("Failed to set up the feed client")?;
    let fetcher = NewsFetcher::new(source, cfg.sources.clone(), cfg.keywords.clone());
    let history = HistoryStore::load(&cfg.state_path);

    let fresh = history.filter_new(fetcher.fetch_all(cfg.check_interval_hours));
    let pending: Vec<_> = fresh.into_iter().take(cfg.max_items_per_push).collect();

    if pending.is_empty() {
        println!("Nothing new to push.");
        return Ok(());
    }

    let display_items = format_for_display(&pending);
    for item in &display_items {
        print_item_line(item);
    }

    let digest = render_digest(&display_items, &cfg.digest_title);
    println!();
    if digest.len() > MAX_MESSAGE_BYTES {
        println!(
            "({} bytes; would be sent in several parts)",
            digest.len()
        );
    }
    println!("{}", digest);
    Ok(())
}

/// Print a single item in pipe-friendly format
fn print_item_line(item: &DisplayItem) {
    println!(
        "{} | {} | {} | {}",
        item.time,
        item.source,
        item.title.bold(),
        item.link.blue()
    );
}

fn cmd_stats(cfg: &Config) -> Result<()> {
    let history = HistoryStore::load(&cfg.state_path);
    let stats = history.stats();

    println!("History file: {}", history.path().display());
    println!("Delivered items on record: {}", stats.total_pushed);
    match stats.last_check {
        Some(at) => println!("Last check: {}", at.to_rfc3339()),
        None => println!("Last check: never"),
    }
    Ok(())
}
