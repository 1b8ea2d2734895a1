use std::{sync::Arc, time::Duration};

use indicatif::{ProgressBar, ProgressStyle};
use tabled::Table;

use crate::{
    config::Settings,
    error,
    kv::CachedKv,
    management::{ArtistGenreCache, UserRegistry},
    server, success,
    types::StatTableRow,
};

struct CacheHandle {
    kv: Arc<CachedKv>,
    genres: ArtistGenreCache,
}

fn open(settings: &Settings) -> CacheHandle {
    let kv = Arc::new(CachedKv::with_config(
        server::open_store(settings),
        settings.cache.clone(),
        settings.batch.clone(),
    ));
    CacheHandle {
        genres: ArtistGenreCache::new(Arc::clone(&kv), settings.genre_cache.clone()),
        kv,
    }
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    pb
}

/// Prints the persisted genre cache statistics and user totals.
pub async fn cache_stats(settings: Settings) {
    let handle = open(&settings);
    let stats = handle.genres.stats().await;
    let users = UserRegistry::new(Arc::clone(&handle.kv)).user_count().await;

    let last_updated = chrono::DateTime::from_timestamp_millis(stats.last_updated)
        .filter(|_| stats.last_updated > 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".into());

    let rows = vec![
        StatTableRow {
            name: "Hits".into(),
            value: stats.hits.to_string(),
        },
        StatTableRow {
            name: "Misses".into(),
            value: stats.misses.to_string(),
        },
        StatTableRow {
            name: "Hit rate".into(),
            value: format!("{:.1}%", stats.hit_rate() * 100.0),
        },
        StatTableRow {
            name: "API calls saved".into(),
            value: stats.api_calls_saved.to_string(),
        },
        StatTableRow {
            name: "Last updated".into(),
            value: last_updated,
        },
        StatTableRow {
            name: "Registered users".into(),
            value: users.to_string(),
        },
    ];

    println!("{}", Table::new(rows));
}

/// Removes genre entries older than `max_age_days`.
pub async fn cache_cleanup(settings: Settings, max_age_days: u32) {
    let handle = open(&settings);
    let pb = spinner("Sweeping artist genre cache...");

    let result = handle.genres.cleanup(max_age_days).await;
    handle.kv.flush_all().await;
    pb.finish_and_clear();

    match result {
        Ok(report) => success!(
            "Removed {} of {} entries older than {} days ({} pages).",
            report.removed,
            report.scanned,
            max_age_days,
            report.pages
        ),
        Err(e) => error!("Cleanup failed: {}", e),
    }
}

/// Drops every genre entry and resets the statistics.
pub async fn cache_clear(settings: Settings) {
    let handle = open(&settings);
    let pb = spinner("Clearing artist genre cache...");

    let result = handle.genres.clear_all().await;
    handle.kv.flush_all().await;
    pb.finish_and_clear();

    match result {
        Ok(removed) => success!("Cleared {} cached artists.", removed),
        Err(e) => error!("Clearing the cache failed: {}", e),
    }
}
