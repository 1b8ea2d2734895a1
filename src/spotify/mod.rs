//! # Spotify Integration Module
//!
//! The slice of the Spotify Web API the genre scan needs:
//!
//! ```text
//! API handlers
//!      ↓
//! LibraryScanner (ChunkSource) ── ArtistGenreCache
//!      ↓
//! SpotifyClient (reqwest)
//!      ├── OAuth 2.0 PKCE: authorize URL, code exchange, token refresh
//!      ├── GET /me
//!      ├── GET /me/tracks      (offset paginated, ≤ 50 per page)
//!      └── GET /artists?ids=   (≤ 50 ids per call)
//! ```
//!
//! The client holds no tokens. Access tokens live in the session and are
//! passed per call; refresh goes through [`crate::management::TokenRefresher`]
//! so the session layer can serialize it.
//!
//! Failed calls surface as [`crate::error::UpstreamError`] and are not
//! retried here.

mod client;
mod library;

pub use client::{MAX_PAGE_SIZE, SpotifyClient};
pub use library::{LibraryScanner, build_chunk};
