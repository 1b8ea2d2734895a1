//! # CLI Module
//!
//! Command implementations behind the `genresort` binary. Each command takes
//! the already loaded [`crate::config::Settings`], reports progress with the
//! crate's colored output macros and exits through `error!` on failure.
//!
//! ## Commands
//!
//! - [`serve`] - runs the web server, optionally opening the login page
//! - [`cache_stats`] - prints genre cache statistics as a table
//! - [`cache_cleanup`] - age-based sweep of the artist genre cache
//! - [`cache_clear`] - drops every cached artist and resets statistics
//!
//! The cache commands open the configured backing store directly, so they
//! work whether or not a server is running against it. Statistics written by
//! a running server may lag until its write batch is flushed.
//!
//! ```bash
//! genresort serve --open
//! genresort cache stats
//! genresort cache cleanup --max-age-days 30
//! ```

mod cache;
mod serve;

pub use cache::{cache_cleanup, cache_clear, cache_stats};
pub use serve::serve;
