pub mod csrf;

mod artist_genre;
mod oauth_state;
mod registry;
mod session;

pub use artist_genre::{
    ArtistGenreCache, ArtistGenreEntry, CleanupReport, GenreCacheConfig, GenreCacheStats,
};
pub use oauth_state::{OAuthState, OAuthStateStore, STATE_COOKIE, STATE_COOKIE_PATH};
pub use registry::{FIRST_USERS_LIMIT, Registration, UserRecord, UserRegistry};
pub use session::{
    NewSession, SESSION_COOKIE, SESSION_SCHEMA_VERSION, Session, SessionConfig, SessionManager,
    SessionUpdate, TokenRefresher,
};
