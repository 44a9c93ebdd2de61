//!
//! src/lineup.rs
//!
//! Scrapes the ArcTanGent lineup. The public page carries a wordpress
//! ajax nonce, the artist grid itself is served page by page from
//! admin-ajax.php until a page comes back empty
//!

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::adapters::ArtistLineupSource;
use crate::config::{AtgConfig, HttpConfig, RetryConfig};
use crate::errors::GeneratorError;
use crate::fetch::{base_client, send_for_text};
use crate::types::ArtistName;

const AJAX_ACTION: &str = "noisa_artists_filter";

#[derive(Debug, Clone)]
pub struct AtgLineup {
    http: Client,
    cfg: AtgConfig,
    retry: RetryConfig,
    nonce_re: Regex,
}

impl AtgLineup {
    pub fn new(http_config: &HttpConfig, cfg: &AtgConfig) -> Result<Self, GeneratorError> {
        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone(),
            retry: http_config.retry.clone(),
            nonce_re: nonce_regex()?,
        })
    }

    /// GET the lineup page and pull the ajax nonce out of the inline script
    async fn nonce(&self) -> Result<String, GeneratorError> {
        let request = self.http.get(self.cfg.lineup_url.clone());
        let body = send_for_text(request, &self.retry).await?;
        parse_nonce(&self.nonce_re, &body)
    }

    /// POST one page of the artist grid
    async fn page(&self, nonce: &str, pagenum: u32) -> Result<Vec<ArtistName>, GeneratorError> {
        let limit = self.cfg.page_limit.to_string();
        let pagenum = pagenum.to_string();
        let request = self.http.post(self.cfg.ajax_url.clone()).form(&[
            ("action", AJAX_ACTION),
            ("ajax_nonce", nonce),
            ("obj[action]", AJAX_ACTION),
            ("obj[filterby]", "taxonomy"),
            ("obj[cpt]", "noisa_artists"),
            ("obj[tax]", "noisa_artists_cats"),
            ("obj[limit]", &limit),
            ("obj[filter_name]", "all"),
            ("obj[pagenum]", &pagenum),
        ]);
        let body = send_for_text(request, &self.retry).await?;
        parse_artist_page(&body)
    }
}

#[async_trait]
impl ArtistLineupSource for AtgLineup {
    async fn fetch_lineup(&self) -> Result<Vec<ArtistName>, GeneratorError> {
        info!(url = %self.cfg.lineup_url, "lineup.start");
        let nonce = self.nonce().await?;
        debug!(nonce = %nonce, "lineup.nonce");

        let mut artists = Vec::new();
        let mut previous: Option<Vec<ArtistName>> = None;
        for pagenum in 1..=self.cfg.max_pages {
            let page = self.page(&nonce, pagenum).await?;
            debug!(pagenum, found = page.len(), "lineup.page");
            if page.is_empty() {
                break;
            }
            // the endpoint has been seen to ignore pagenum and repeat itself
            if previous.as_ref() == Some(&page) {
                warn!(pagenum, "lineup.page.repeated");
                break;
            }
            artists.extend(page.iter().cloned());
            previous = Some(page);

            if pagenum == self.cfg.max_pages {
                warn!(max_pages = self.cfg.max_pages, "lineup.page.cap");
            }
        }

        info!(artists = artists.len(), "lineup.done");
        Ok(artists)
    }
}

fn nonce_regex() -> Result<Regex, GeneratorError> {
    Regex::new(r#""ajax_nonce"\s*:\s*"([^"]+)""#)
        .map_err(|e| GeneratorError::Parse(format!("nonce regex: {e}")))
}

pub fn parse_nonce(re: &Regex, body: &str) -> Result<String, GeneratorError> {
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| GeneratorError::Parse("ajax_nonce missing from lineup page".to_string()))
}

/// admin-ajax answers either with raw html or with a json wrapper around it
fn unwrap_ajax_body(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::String(html)) => html,
        Ok(serde_json::Value::Object(map)) => ["content", "html", "data"]
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
            .unwrap_or_default()
            .to_string(),
        _ => body.to_string(),
    }
}

/// Every `<h2 class="grid-title">` on the page, entity-decoded and lower-cased
pub fn parse_artist_page(body: &str) -> Result<Vec<ArtistName>, GeneratorError> {
    let selector = Selector::parse("h2.grid-title")
        .map_err(|e| GeneratorError::Parse(format!("grid-title selector: {e:?}")))?;
    let html = Html::parse_fragment(&unwrap_ajax_body(body));

    let artists = html.select(&selector)
        .map(|el| el.text().collect::<String>())
        .filter(|name| !name.trim().is_empty())
        .map(|name| ArtistName::new(&name))
        .collect();
    Ok(artists)
}
