use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{MAX_PAGE_SIZE, SpotifyClient};
use crate::{
    error::UpstreamError,
    management::ArtistGenreCache,
    scan::{Chunk, ChunkEntry, ChunkResponse, ChunkSource},
    types::SavedTrack,
};

/// Produces genre chunks from a user's saved tracks.
///
/// Artist genres come from the [`ArtistGenreCache`] first; misses are looked
/// up in groups of [`MAX_PAGE_SIZE`] and written back.
pub struct LibraryScanner {
    client: Arc<SpotifyClient>,
    genres: Arc<ArtistGenreCache>,
    access_token: String,
}

impl LibraryScanner {
    pub fn new(
        client: Arc<SpotifyClient>,
        genres: Arc<ArtistGenreCache>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            genres,
            access_token: access_token.into(),
        }
    }

    async fn resolve_genres(
        &self,
        artist_ids: Vec<String>,
    ) -> Result<HashMap<String, Vec<String>>, UpstreamError> {
        let mut known = self.genres.get_batch(&artist_ids).await;
        let missing: Vec<String> = artist_ids
            .into_iter()
            .filter(|id| !known.contains_key(id))
            .collect();

        for group in missing.chunks(MAX_PAGE_SIZE) {
            let fetched: HashMap<String, Vec<String>> = self
                .client
                .artists(&self.access_token, group)
                .await?
                .into_iter()
                .map(|artist| (artist.id, artist.genres))
                .collect();
            debug!(requested = group.len(), found = fetched.len(), "artist genres fetched");

            if let Err(e) = self.genres.put_batch(&fetched).await {
                warn!(error = %e, "artist genres not cached");
            }
            known.extend(fetched);
        }

        Ok(known)
    }
}

#[async_trait]
impl ChunkSource for LibraryScanner {
    async fn chunk(&self, offset: u64, limit: u64) -> Result<ChunkResponse, UpstreamError> {
        let page = self
            .client
            .saved_tracks(&self.access_token, offset, limit)
            .await?;

        let artist_ids: Vec<String> = page
            .items
            .iter()
            .filter_map(|item| item.track.as_ref())
            .flat_map(|track| track.artists.iter().filter_map(|a| a.id.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let genres = self.resolve_genres(artist_ids).await?;
        let chunk = build_chunk(&page.items, &genres);

        Ok(ChunkResponse::new(
            chunk,
            offset,
            page.items.len() as u64,
            page.total,
        ))
    }
}

/// Groups tracks by the genres of their artists.
///
/// A track counts once per genre even if several of its artists share it.
/// Tracks with no id, or whose artists carry no genres, only contribute to
/// `count_in_chunk`.
pub fn build_chunk(items: &[SavedTrack], genres: &HashMap<String, Vec<String>>) -> Chunk {
    let mut by_tag: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    let mut count_in_chunk = 0;

    for track in items.iter().filter_map(|item| item.track.as_ref()) {
        count_in_chunk += 1;
        let Some(track_id) = track.id.as_ref() else {
            continue;
        };

        let tags: BTreeSet<&str> = track
            .artists
            .iter()
            .filter_map(|a| a.id.as_ref())
            .filter_map(|id| genres.get(id))
            .flatten()
            .map(String::as_str)
            .collect();

        for tag in tags {
            by_tag.entry(tag).or_default().push(track_id.clone());
        }
    }

    Chunk {
        entries: by_tag
            .into_iter()
            .map(|(tag, member_ids)| ChunkEntry {
                tag: tag.to_string(),
                count: member_ids.len() as u64,
                member_ids,
            })
            .collect(),
        count_in_chunk,
    }
}
