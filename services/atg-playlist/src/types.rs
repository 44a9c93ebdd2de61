use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// Lower-cased artist name as scraped from the lineup page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArtistName(String);

impl ArtistName {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtistName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtistName {
    fn from(s: &str) -> Self { Self::new(s) }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArtistId(pub u64);

impl fmt::Display for ArtistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deezer sends artist ids as numbers from some endpoints and as strings
/// from others
fn id_from_number_or_string<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw { Num(u64), Str(String) }

    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse::<u64>().map_err(serde::de::Error::custom),
    }
}

/// Subset of the Deezer artist resource we read
#[derive(Debug, Clone, Deserialize)]
pub struct DeezerArtist {
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

impl DeezerArtist {
    pub fn artist_id(&self) -> Option<ArtistId> {
        (self.id != 0).then_some(ArtistId(self.id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackArtist {
    #[serde(default)]
    pub name: String,
}

/// Subset of the Deezer track resource we read
#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub rank: Option<u64>,
    pub artist: Option<TrackArtist>,
}

impl Track {
    pub fn track_id(&self) -> TrackId {
        TrackId(self.id)
    }
}

/// `{ "data": [...], "next": "..." }` envelope used by every Deezer list endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
}
