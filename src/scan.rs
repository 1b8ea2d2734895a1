//! Chunked library scan.
//!
//! A scan walks a paginated source window by window. Each window yields a
//! [`Chunk`] of per-genre tallies which [`merge_chunks`] folds into a running
//! [`ChunkAccumulator`]. Nothing is kept server-side between windows; if the
//! caller stops asking, the scan is simply over.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::UpstreamError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEntry {
    pub tag: String,
    pub count: u64,
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub entries: Vec<ChunkEntry>,
    /// Members (tracks) covered by this window, not the sum of entry counts.
    pub count_in_chunk: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagTally {
    pub count: u64,
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAccumulator {
    pub tags: BTreeMap<String, TagTally>,
    pub total_count: u64,
    pub chunks_merged: u64,
}

impl ChunkAccumulator {
    /// Tags ordered by count, largest first, ties broken by name.
    pub fn ranked(&self) -> Vec<(&str, &TagTally)> {
        let mut ranked: Vec<_> = self.tags.iter().map(|(t, v)| (t.as_str(), v)).collect();
        ranked.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

/// Folds `chunk` into `acc`.
///
/// Totals are added from what the chunk reports, never recomputed from the
/// merged tags. Merging the same window twice counts it twice.
pub fn merge_chunks(mut acc: ChunkAccumulator, chunk: &Chunk) -> ChunkAccumulator {
    for entry in &chunk.entries {
        let tally = acc.tags.entry(entry.tag.clone()).or_default();
        tally.count += entry.count;
        tally.member_ids.extend(entry.member_ids.iter().cloned());
    }
    acc.total_count += chunk.count_in_chunk;
    acc.chunks_merged += 1;
    acc
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub has_more: bool,
    pub next_offset: u64,
    /// Size of the whole source as last reported by it.
    pub total_known: u64,
}

/// Response of one `chunk(offset, limit)` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub chunk: Chunk,
    pub progress_percent: u8,
    pub pagination: Pagination,
}

impl ChunkResponse {
    pub fn new(chunk: Chunk, offset: u64, fetched: u64, total_known: u64) -> Self {
        let next_offset = offset + fetched;
        let has_more = fetched > 0 && next_offset < total_known;
        Self {
            chunk,
            progress_percent: progress_percent(next_offset, total_known),
            pagination: Pagination {
                has_more,
                next_offset,
                total_known,
            },
        }
    }
}

fn progress_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.min(total) * 100 / total) as u8
}

/// Paginated producer of chunks.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn chunk(&self, offset: u64, limit: u64) -> Result<ChunkResponse, UpstreamError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    NotStarted,
    Fetching { offset: u64 },
    Merged { next_offset: u64, progress_percent: u8 },
    Complete { total_count: u64 },
}

/// Drives a scan to completion into `acc`, reporting every state transition.
///
/// A failed fetch ends the scan with the error. Windows merged before the
/// failure stay in `acc`.
pub async fn run_scan<S, F>(
    source: &S,
    acc: &mut ChunkAccumulator,
    limit: u64,
    mut on_state: F,
) -> Result<(), UpstreamError>
where
    S: ChunkSource + ?Sized,
    F: FnMut(&ScanState),
{
    let mut offset = 0;
    on_state(&ScanState::NotStarted);

    loop {
        on_state(&ScanState::Fetching { offset });
        let response = source.chunk(offset, limit).await?;
        *acc = merge_chunks(std::mem::take(acc), &response.chunk);
        debug!(
            offset,
            next_offset = response.pagination.next_offset,
            tags = acc.tags.len(),
            "chunk merged"
        );

        if !response.pagination.has_more {
            on_state(&ScanState::Complete {
                total_count: acc.total_count,
            });
            return Ok(());
        }

        on_state(&ScanState::Merged {
            next_offset: response.pagination.next_offset,
            progress_percent: response.progress_percent,
        });
        offset = response.pagination.next_offset;
    }
}
