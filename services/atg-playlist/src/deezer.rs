//!
//! src/deezer.rs
//!
//! Deezer adapter. Resolves artist names (api search first, deezer.com
//! search page as fallback), fetches top tracks and replaces the contents
//! of the target playlist
//!

use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use crate::adapters::{ArtistResolver, PlaylistWriter, TrackFetcher};
use crate::config::{DeezerConfig, HttpConfig, RetryConfig};
use crate::errors::GeneratorError;
use crate::fetch::{base_client, send_for_text};
use crate::types::{ArtistId, ArtistName, DeezerArtist, Page, Track, TrackId};

#[derive(Clone, Debug)]
pub struct DeezerClient {
    http: Client,
    cfg: DeezerConfig,
    retry: RetryConfig,
    art_id_re: Regex,
}

impl DeezerClient {
    pub fn new(http_config: &HttpConfig, cfg: &DeezerConfig) -> Result<Self, GeneratorError> {
        let http = base_client(http_config)?;
        let art_id_re = Regex::new(r#""ART_ID"\s*:\s*"(\d+)""#)
            .map_err(|e| GeneratorError::Parse(format!("ART_ID regex: {e}")))?;
        Ok( Self {
            http,
            cfg: cfg.clone(),
            retry: http_config.retry.clone(),
            art_id_re,
        })
    }

    fn api_url(&self, path: &str) -> Result<Url, GeneratorError> {
        Ok(self.cfg.api_base.join(path)?)
    }

    /// GET /search/artist?q=...
    pub fn search_artist(&self, name: &ArtistName) -> Result<RequestBuilder, GeneratorError> {
        let url = self.api_url("search/artist")?;
        Ok(self.http.get(url).query(&[("q", name.as_str())]))
    }

    /// GET /artist/{id}/top?limit=...
    pub fn artist_top(&self, id: ArtistId, limit: usize) -> Result<RequestBuilder, GeneratorError> {
        let url = self.api_url(&format!("artist/{id}/top"))?;
        Ok(self.http.get(url).query(&[("limit", limit.to_string())]))
    }

    /// GET https://www.deezer.com/search/{name}
    pub fn web_search(&self, name: &ArtistName) -> Result<RequestBuilder, GeneratorError> {
        let mut url = self.cfg.web_base.clone();
        url.path_segments_mut()
            .map_err(|_| GeneratorError::Config("DEEZER_WEB_BASE cannot be a base".to_string()))?
            .pop_if_empty()
            .push("search")
            .push(name.as_str());
        Ok(self.http.get(url))
    }

    /// GET /playlist/{id}/tracks?index=...
    pub fn playlist_tracks(&self, index: usize) -> Result<RequestBuilder, GeneratorError> {
        let url = self.api_url(&format!("playlist/{}/tracks", self.cfg.playlist_id))?;
        Ok(self.http.get(url).query(&[
            ("access_token", self.cfg.access_token.clone()),
            ("index", index.to_string()),
        ]))
    }

    /// DELETE /playlist/{id}/tracks?songs=...
    pub fn playlist_remove(&self, songs: &[TrackId]) -> Result<RequestBuilder, GeneratorError> {
        let url = self.api_url(&format!("playlist/{}/tracks", self.cfg.playlist_id))?;
        Ok(self.http.delete(url).query(&[
            ("access_token", self.cfg.access_token.clone()),
            ("songs", songs_csv(songs)),
        ]))
    }

    /// POST /playlist/{id}/tracks?songs=...
    pub fn playlist_add(&self, songs: &[TrackId]) -> Result<RequestBuilder, GeneratorError> {
        let url = self.api_url(&format!("playlist/{}/tracks", self.cfg.playlist_id))?;
        Ok(self.http.post(url).query(&[
            ("access_token", self.cfg.access_token.clone()),
            ("songs", songs_csv(songs)),
        ]))
    }

    async fn api<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GeneratorError> {
        let body = send_for_text(request, &self.retry).await?;
        decode_api(&body)
    }

    /// Primary lookup through the public search api
    pub async fn search_via_api(&self, name: &ArtistName) -> Result<Option<DeezerArtist>, GeneratorError> {
        let page: Page<DeezerArtist> = self.api(self.search_artist(name)?).await?;
        debug!(artist = %name, results = page.data.len(), "deezer.search.api");
        Ok(pick_artist(page.data, name))
    }

    /// Fallback lookup scraping the deezer.com search page
    pub async fn search_via_web(&self, name: &ArtistName) -> Result<Option<ArtistId>, GeneratorError> {
        let body = send_for_text(self.web_search(name)?, &self.retry).await?;
        let id = parse_web_artist_id(&self.art_id_re, &body);
        debug!(artist = %name, found = id.is_some(), "deezer.search.web");
        Ok(id)
    }

    async fn current_playlist(&self) -> Result<Vec<TrackId>, GeneratorError> {
        let mut ids = Vec::new();
        loop {
            let page: Page<Track> = self.api(self.playlist_tracks(ids.len())?).await?;
            if page.data.is_empty() {
                break;
            }
            ids.extend(page.data.iter().map(Track::track_id));
            if page.next.is_none() {
                break;
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl ArtistResolver for DeezerClient {
    async fn resolve(&self, name: &ArtistName) -> Result<Option<ArtistId>, GeneratorError> {
        if let Some(id) = self.search_via_api(name).await?.and_then(|a| a.artist_id()) {
            return Ok(Some(id));
        }
        if !self.cfg.web_fallback {
            return Ok(None);
        }
        self.search_via_web(name).await
    }
}

#[async_trait]
impl TrackFetcher for DeezerClient {
    async fn top_tracks(&self, id: ArtistId, limit: usize) -> Result<Vec<Track>, GeneratorError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let page: Page<Track> = self.api(self.artist_top(id, limit)?).await?;
        let mut tracks = page.data;
        tracks.truncate(limit);
        Ok(tracks)
    }
}

#[async_trait]
impl PlaylistWriter for DeezerClient {
    async fn write_playlist(&self, tracks: &[TrackId]) -> Result<(), GeneratorError> {
        let wanted = dedup_in_order(tracks);
        if self.cfg.dry_run {
            info!(
                playlist = self.cfg.playlist_id,
                tracks = wanted.len(),
                ids = %songs_csv(&wanted),
                "playlist.dry_run"
            );
            return Ok(());
        }

        let existing = self.current_playlist().await?;
        let plan = plan_playlist_update(&existing, &wanted, self.cfg.playlist_chunk);

        // add before removing so a failed write never drops a wanted track
        for chunk in &plan.add {
            let _: serde_json::Value = self.api(self.playlist_add(chunk)?).await?;
        }
        for chunk in &plan.remove {
            let _: serde_json::Value = self.api(self.playlist_remove(chunk)?).await?;
        }
        debug!(
            playlist = self.cfg.playlist_id,
            existing = existing.len(),
            added = plan.add.iter().map(Vec::len).sum::<usize>(),
            removed = plan.remove.iter().map(Vec::len).sum::<usize>(),
            "playlist.diff"
        );
        info!(playlist = self.cfg.playlist_id, tracks = wanted.len(), "playlist.updated");
        Ok(())
    }
}

#[derive(serde::Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

/// Deezer reports failures as `200 {"error": {...}}`, check for that before
/// decoding the expected shape
pub fn decode_api<T: DeserializeOwned>(body: &str) -> Result<T, GeneratorError> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    if let Some(err) = value.get("error") {
        let err: ApiErrorBody = serde_json::from_value(err.clone())?;
        return Err(GeneratorError::Deezer {
            code: err.code,
            kind: err.kind,
            message: err.message,
        });
    }
    Ok(serde_json::from_value(value)?)
}

/// A single hit is taken as is, otherwise the first exact (case-insensitive)
/// name match wins
pub fn pick_artist(results: Vec<DeezerArtist>, name: &ArtistName) -> Option<DeezerArtist> {
    if results.len() == 1 {
        return results.into_iter().next();
    }
    results.into_iter()
        .find(|a| ArtistName::new(&a.name) == *name)
}

pub fn parse_web_artist_id(re: &Regex, body: &str) -> Option<ArtistId> {
    re.captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .filter(|id| *id != 0)
        .map(ArtistId)
}

/// Request-sized batches turning the current playlist into the wanted one
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlaylistPlan {
    pub add: Vec<Vec<TrackId>>,
    pub remove: Vec<Vec<TrackId>>,
}

pub fn plan_playlist_update(existing: &[TrackId], wanted: &[TrackId], chunk: usize) -> PlaylistPlan {
    let chunk = chunk.max(1);
    let have: HashSet<TrackId> = existing.iter().copied().collect();
    let keep: HashSet<TrackId> = wanted.iter().copied().collect();

    let add: Vec<TrackId> = dedup_in_order(wanted).into_iter()
        .filter(|t| !have.contains(t))
        .collect();
    let remove: Vec<TrackId> = dedup_in_order(existing).into_iter()
        .filter(|t| !keep.contains(t))
        .collect();

    PlaylistPlan {
        add: add.chunks(chunk).map(<[TrackId]>::to_vec).collect(),
        remove: remove.chunks(chunk).map(<[TrackId]>::to_vec).collect(),
    }
}

fn dedup_in_order(tracks: &[TrackId]) -> Vec<TrackId> {
    let mut seen = HashSet::new();
    tracks.iter().copied().filter(|t| seen.insert(*t)).collect()
}

fn songs_csv(songs: &[TrackId]) -> String {
    songs.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubServer;

    fn live() -> bool {
        std::env::var("LIVE_HTTP").ok().as_deref() == Some("1")
    }

    fn config() -> DeezerConfig {
        DeezerConfig {
            access_token: "secret".to_string(),
            playlist_id: 42,
            api_base: "https://api.deezer.com/".parse().unwrap(),
            web_base: "https://www.deezer.com/".parse().unwrap(),
            web_fallback: true,
            playlist_chunk: 50,
            dry_run: true,
        }
    }

    fn client() -> DeezerClient {
        DeezerClient::new(&HttpConfig::default(), &config()).unwrap()
    }

    fn ids(raw: &[u64]) -> Vec<TrackId> {
        raw.iter().copied().map(TrackId).collect()
    }

    const SEARCH_ONE: &str = r#"{
      "data": [
        {
          "id": "7273",
          "name": "Cult of Luna",
          "link": "https://www.deezer.com/artist/7273",
          "nb_album": 24,
          "nb_fan": 14596,
          "radio": true,
          "tracklist": "https://api.deezer.com/artist/7273/top?limit=50",
          "type": "artist"
        }
      ],
      "total": 1
    }"#;

    const SEARCH_MANY: &str = r#"{
      "data": [
        { "id": 11, "name": "Luna", "type": "artist" },
        { "id": 7273, "name": "Cult of Luna", "type": "artist" },
        { "id": 99, "name": "Cult of Luna Tribute", "type": "artist" }
      ],
      "total": 3,
      "next": "https://api.deezer.com/search/artist?q=cult%20of%20luna&index=25"
    }"#;

    const TOP_TRACKS: &str = r#"{
      "data": [
        { "id": 711332042, "title": "A Dawn to Fear", "rank": 366436,
          "artist": { "id": 7273, "name": "Cult of Luna" }, "type": "track" },
        { "id": 3135556, "title": "In Awe Of", "rank": 300000,
          "artist": { "id": 7273, "name": "Cult of Luna" }, "type": "track" }
      ],
      "total": 2
    }"#;

    #[test]
    fn single_search_result_is_taken() {
        let page: Page<DeezerArtist> = decode_api(SEARCH_ONE).unwrap();
        let artist = pick_artist(page.data, &ArtistName::new("whatever")).unwrap();
        assert_eq!(artist.artist_id(), Some(ArtistId(7273)));
        assert_eq!(artist.name, "Cult of Luna");
    }

    #[test]
    fn exact_name_wins_among_many() {
        let page: Page<DeezerArtist> = decode_api(SEARCH_MANY).unwrap();
        let artist = pick_artist(page.data, &ArtistName::new("cult of luna")).unwrap();
        assert_eq!(artist.id, 7273);
    }

    #[test]
    fn no_exact_match_among_many_is_not_found() {
        let page: Page<DeezerArtist> = decode_api(SEARCH_MANY).unwrap();
        assert!(pick_artist(page.data, &ArtistName::new("cult")).is_none());
    }

    #[test]
    fn empty_search_is_not_found() {
        let page: Page<DeezerArtist> = decode_api(r#"{"data": []}"#).unwrap();
        assert!(pick_artist(page.data, &ArtistName::new("empty")).is_none());
    }

    #[test]
    fn top_tracks_decode() {
        let page: Page<Track> = decode_api(TOP_TRACKS).unwrap();
        let ids: Vec<TrackId> = page.data.iter().map(Track::track_id).collect();
        assert_eq!(ids, vec![TrackId(711332042), TrackId(3135556)]);
        assert_eq!(page.data[0].artist.as_ref().unwrap().name, "Cult of Luna");
    }

    #[test]
    fn error_payload_becomes_deezer_error() {
        let body = r#"{"error":{"type":"OAuthException","message":"Invalid OAuth access token.","code":300}}"#;
        let err = decode_api::<Page<Track>>(body).unwrap_err();
        match err {
            GeneratorError::Deezer { code, kind, .. } => {
                assert_eq!(code, 300);
                assert_eq!(kind, "OAuthException");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        assert!(matches!(decode_api::<Page<Track>>("<html>"), Err(GeneratorError::Parse(_))));
        assert!(matches!(
            decode_api::<Page<Track>>(r#"{"data": [{"title": "no id"}]}"#),
            Err(GeneratorError::Parse(_))
        ));
    }

    #[test]
    fn web_page_artist_id_is_scraped() {
        let c = client();
        let body = r#"<script>window.__DZR_APP_STATE__ = {"ARTIST":{"data":[{"ART_ID":"7273","ART_NAME":"Cult of Luna"},{"ART_ID":"11"}]}}</script>"#;
        assert_eq!(parse_web_artist_id(&c.art_id_re, body), Some(ArtistId(7273)));
        assert_eq!(parse_web_artist_id(&c.art_id_re, r#"{"ART_ID":"0"}"#), None);
        assert_eq!(parse_web_artist_id(&c.art_id_re, "<html></html>"), None);
    }

    #[test]
    fn request_urls_are_built_from_the_base() {
        let c = client();
        let search = c.search_artist(&ArtistName::new("Cult Of Luna")).unwrap().build().unwrap();
        assert_eq!(search.url().as_str(), "https://api.deezer.com/search/artist?q=cult+of+luna");

        let top = c.artist_top(ArtistId(7273), 3).unwrap().build().unwrap();
        assert_eq!(top.url().as_str(), "https://api.deezer.com/artist/7273/top?limit=3");

        let web = c.web_search(&ArtistName::new("sigur rós")).unwrap().build().unwrap();
        assert_eq!(web.url().as_str(), "https://www.deezer.com/search/sigur%20r%C3%B3s");

        let add = c.playlist_add(&[TrackId(1), TrackId(2)]).unwrap().build().unwrap();
        assert_eq!(add.method(), &reqwest::Method::POST);
        assert_eq!(
            add.url().as_str(),
            "https://api.deezer.com/playlist/42/tracks?access_token=secret&songs=1%2C2"
        );
    }

    #[test]
    fn duplicates_collapse_keeping_first_position() {
        let ids = [TrackId(3), TrackId(1), TrackId(3), TrackId(2), TrackId(1)];
        assert_eq!(dedup_in_order(&ids), vec![TrackId(3), TrackId(1), TrackId(2)]);
    }

    #[test]
    fn fresh_playlist_is_added_in_chunks() {
        let wanted: Vec<TrackId> = (1..=120).map(TrackId).collect();

        let plan = plan_playlist_update(&[], &wanted, 50);

        let sizes: Vec<usize> = plan.add.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(plan.add.concat(), wanted);
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn plan_touches_only_the_difference() {
        let plan = plan_playlist_update(&ids(&[1, 2, 3]), &ids(&[2, 4, 4, 5]), 50);
        assert_eq!(plan.add, vec![ids(&[4, 5])]);
        assert_eq!(plan.remove, vec![ids(&[1, 3])]);

        let unchanged = plan_playlist_update(&ids(&[7, 8]), &ids(&[8, 7]), 50);
        assert_eq!(unchanged, PlaylistPlan::default());
    }

    #[tokio::test]
    async fn playlist_write_follows_pages_and_chunks_requests() {
        let server = StubServer::start(vec![
            (200, r#"{"data":[{"id":1},{"id":2}],"next":"more"}"#),
            (200, r#"{"data":[{"id":3}]}"#),
            (200, "true"),
            (200, "true"),
            (200, "true"),
        ]).await;
        let cfg = DeezerConfig {
            api_base: server.base.clone(),
            playlist_chunk: 2,
            dry_run: false,
            ..config()
        };
        let c = DeezerClient::new(&HttpConfig::default(), &cfg).unwrap();

        c.write_playlist(&ids(&[2, 4, 5, 6, 2])).await.unwrap();

        assert_eq!(server.requests(), vec![
            "GET /playlist/42/tracks?access_token=secret&index=0",
            "GET /playlist/42/tracks?access_token=secret&index=2",
            "POST /playlist/42/tracks?access_token=secret&songs=4%2C5",
            "POST /playlist/42/tracks?access_token=secret&songs=6",
            "DELETE /playlist/42/tracks?access_token=secret&songs=1%2C3",
        ]);
    }

    #[tokio::test]
    async fn playlist_error_envelope_stops_the_write() {
        let server = StubServer::start(vec![
            (200, r#"{"data":[]}"#),
            (200, r#"{"error":{"type":"OAuthException","message":"no","code":200}}"#),
            (200, "true"),
        ]).await;
        let cfg = DeezerConfig { api_base: server.base.clone(), dry_run: false, ..config() };
        let c = DeezerClient::new(&HttpConfig::default(), &cfg).unwrap();

        let err = c.write_playlist(&ids(&[1])).await.unwrap_err();

        assert!(matches!(err, GeneratorError::Deezer { code: 200, .. }));
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn zero_limit_skips_the_request() {
        let tracks = client().top_tracks(ArtistId(7273), 0).await.unwrap();
        assert!(tracks.is_empty());
    }

    #[tokio::test]
    async fn dry_run_does_not_touch_the_network() {
        client().write_playlist(&[TrackId(1), TrackId(1)]).await.unwrap();
    }

    #[tokio::test]
    async fn deezer_client_testbench() -> Result<(), GeneratorError> {
        if !live() {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(())
        }

        let c = client();
        let id = c.resolve(&ArtistName::new("cult of luna")).await?
            .expect("cult of luna should resolve");
        let tracks = c.top_tracks(id, 3).await?;
        assert!(tracks.len() <= 3);
        println!("tracks: {tracks:?}");
        Ok(())
    }
}
