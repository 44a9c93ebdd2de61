//!
//! src/adapters.rs
//!
//! Seams between the resolution coordinator and the network. Each trait
//! has one production implementation (ATG scraper, Deezer client) and
//! in-memory fakes in the coordinator tests
//!

use async_trait::async_trait;

use crate::errors::GeneratorError;
use crate::types::{ArtistId, ArtistName, Track, TrackId};

#[async_trait]
pub trait ArtistLineupSource: Send + Sync {
    /// Full ordered roster. Pagination is internal to the source
    async fn fetch_lineup(&self) -> Result<Vec<ArtistName>, GeneratorError>;
}

#[async_trait]
pub trait ArtistResolver: Send + Sync {
    /// `Ok(None)` is "not found" and is not an error
    async fn resolve(&self, name: &ArtistName) -> Result<Option<ArtistId>, GeneratorError>;
}

#[async_trait]
pub trait TrackFetcher: Send + Sync {
    /// At most `limit` tracks, most popular first
    async fn top_tracks(&self, id: ArtistId, limit: usize) -> Result<Vec<Track>, GeneratorError>;
}

#[async_trait]
pub trait PlaylistWriter: Send + Sync {
    async fn write_playlist(&self, tracks: &[TrackId]) -> Result<(), GeneratorError>;
}
