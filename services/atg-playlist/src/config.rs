//!
//! src/config.rs
//!
//! Reads the environment (and an optional .env file) into typed
//! configuration for the lineup scraper, the Deezer clients, the
//! resolution coordinator and the logger
//!

use std::time;

use url::Url;

use crate::coordinator::FailurePolicy;
use crate::errors::GeneratorError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;
pub const HTTP_USER_AGENT: &str = concat!("atg-playlist/", env!("CARGO_PKG_VERSION"));

pub const RETRY_MAX_RETRIES: u8 = 3;
pub const RETRY_BASE_BACKOFF: u64 = 250;
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Defaults for the resolution pipeline
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_TOP_TRACK_LIMIT: usize = 3;

pub const ATG_LINEUP_URL: &str = "https://arctangent.co.uk/line-up/";
pub const ATG_AJAX_URL: &str = "https://arctangent.co.uk/wp-admin/admin-ajax.php";
pub const ATG_PAGE_LIMIT: u32 = 80;
pub const ATG_MAX_PAGES: u32 = 50;

pub const DEEZER_API_BASE: &str = "https://api.deezer.com/";
pub const DEEZER_WEB_BASE: &str = "https://www.deezer.com/";
pub const DEEZER_PLAYLIST_CHUNK: usize = 50;

/// Where configuration values come from. `std::env` in production, a map
/// in tests
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for std::collections::HashMap<&str, &str> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }
}

/// Wrapper over env lookup to return an invalid environment var error
fn env_check(env: &dyn EnvSource, s: &str) -> Result<String, GeneratorError> {
    match env.var(s) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(GeneratorError::Config(format!("{s} was not set"))),
    }
}

fn env_or(env: &dyn EnvSource, s: &str, default: &str) -> String {
    env.var(s)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Malformed numbers are an error rather than falling back to the default
fn env_to_usize(env: &dyn EnvSource, s: &str, default: usize) ->
    Result<usize, GeneratorError> {
    match env.var(s) {
        Some(v) if !v.trim().is_empty() => v.trim().parse::<usize>()
            .map_err(|e| GeneratorError::Config(format!("{s} invalid: {e}"))),
        _ => Ok(default),
    }
}

fn env_to_bool(env: &dyn EnvSource, s: &str, default: bool) -> bool {
    match env.var(s).as_deref().map(str::trim) {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn parse_base(name: &str, raw: &str) -> Result<Url, GeneratorError> {
    let mut url = Url::parse(raw)
        .map_err(|e| GeneratorError::Config(format!("{name} invalid {e}")))?;
    ensure_https(&url).map_err(GeneratorError::Config)?;

    // ensure trailing slash so join() appends instead of replacing
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_endpoint(name: &str, raw: &str) -> Result<Url, GeneratorError> {
    let url = Url::parse(raw)
        .map_err(|e| GeneratorError::Config(format!("{name} invalid {e}")))?;
    ensure_https(&url).map_err(GeneratorError::Config)?;
    Ok(url)
}

///
/// Configuration for the ArcTanGent lineup scraper
///
#[derive(Debug, Clone)]
pub struct AtgConfig {
    pub lineup_url: Url,     // page carrying the ajax nonce
    pub ajax_url: Url,       // wordpress admin-ajax endpoint
    pub page_limit: u32,     // artists per ajax page
    pub max_pages: u32,      // hard stop for pagination
}

fn build_atg(env: &dyn EnvSource) -> Result<AtgConfig, GeneratorError> {
    let lineup_url = parse_endpoint(
        "ATG_LINEUP_URL", &env_or(env, "ATG_LINEUP_URL", ATG_LINEUP_URL))?;
    let ajax_url = parse_endpoint(
        "ATG_AJAX_URL", &env_or(env, "ATG_AJAX_URL", ATG_AJAX_URL))?;

    Ok( AtgConfig {
        lineup_url,
        ajax_url,
        page_limit: ATG_PAGE_LIMIT,
        max_pages: ATG_MAX_PAGES,
    })
}

///
/// Configuration for the Deezer api, web search and playlist target
///
#[derive(Clone)]
pub struct DeezerConfig {
    pub access_token: String,
    pub playlist_id: u64,
    pub api_base: Url,
    pub web_base: Url,
    pub web_fallback: bool,
    pub playlist_chunk: usize,
    pub dry_run: bool,
}

// keep the token out of logs
impl std::fmt::Debug for DeezerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeezerConfig")
            .field("access_token", &"<redacted>")
            .field("playlist_id", &self.playlist_id)
            .field("api_base", &self.api_base.as_str())
            .field("web_base", &self.web_base.as_str())
            .field("web_fallback", &self.web_fallback)
            .field("playlist_chunk", &self.playlist_chunk)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

fn build_deezer(env: &dyn EnvSource) -> Result<DeezerConfig, GeneratorError> {
    let access_token = env_check(env, "DEEZER_ACCESS_TOKEN")?;
    let playlist_id  = env_check(env, "DEEZER_PLAYLIST_ID")?;
    let playlist_id  = playlist_id.trim().parse::<u64>()
        .map_err(|e| GeneratorError::Config(
            format!("DEEZER_PLAYLIST_ID invalid: {e}")
        ))?;

    let api_base = parse_base(
        "DEEZER_API_BASE", &env_or(env, "DEEZER_API_BASE", DEEZER_API_BASE))?;
    let web_base = parse_base(
        "DEEZER_WEB_BASE", &env_or(env, "DEEZER_WEB_BASE", DEEZER_WEB_BASE))?;

    Ok( DeezerConfig {
        access_token,
        playlist_id,
        api_base,
        web_base,
        web_fallback: env_to_bool(env, "DEEZER_WEB_FALLBACK", true),
        playlist_chunk: DEEZER_PLAYLIST_CHUNK,
        dry_run: env_to_bool(env, "DRY_RUN", false),
    })
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u8,
    pub base_backoff: time::Duration,
    pub retryable_statuses: Vec<u16>
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: RETRY_MAX_RETRIES,
            base_backoff: time::Duration::from_millis(RETRY_BASE_BACKOFF),
            retryable_statuses: RETRYABLE_STATUSES.to_vec()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
    pub user_agent: String,
    pub retry: RetryConfig
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
            user_agent: HTTP_USER_AGENT.to_string(),
            retry: RetryConfig::default()
        }
    }
}

///
/// Configuration for the resolution pipeline
///
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    pub budget: usize,               // max simultaneously active artists
    pub top_track_limit: usize,      // tracks kept per artist
    pub failure_policy: FailurePolicy
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_CONCURRENCY,
            top_track_limit: DEFAULT_TOP_TRACK_LIMIT,
            failure_policy: FailurePolicy::BestEffort
        }
    }
}

fn build_concurrency(env: &dyn EnvSource) -> Result<ConcurrencyConfig, GeneratorError> {
    let budget = env_to_usize(env, "CONCURRENCY_LIMIT", DEFAULT_CONCURRENCY)?;
    if budget == 0 {
        return Err(GeneratorError::Config(
            "CONCURRENCY_LIMIT must be at least 1".to_string()
        ));
    }
    let top_track_limit = env_to_usize(env, "TOP_TRACK_LIMIT", DEFAULT_TOP_TRACK_LIMIT)?;

    let failure_policy = match env.var("FAILURE_POLICY") {
        Some(v) if !v.trim().is_empty() => v.trim().parse::<FailurePolicy>()
            .map_err(GeneratorError::Config)?,
        _ => FailurePolicy::BestEffort,
    };

    Ok( ConcurrencyConfig { budget, top_track_limit, failure_policy } )
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,atg_playlist=debug,reqwest=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: true,
            include_file_line: true,
            include_target: true,
        }
    }
}

fn build_logging(env: &dyn EnvSource) -> Result<LoggingConfig, GeneratorError> {
    let mut logging = LoggingConfig::default();
    logging.format = match env.var("LOG_FORMAT").as_deref().map(str::trim) {
        None | Some("") | Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        Some(other) => return Err(GeneratorError::Config(
            format!("LOG_FORMAT must be json or pretty, got {other}")
        )),
    };
    Ok(logging)
}

///
/// AppConfig which holds everything the clients and the coordinator need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub atg: AtgConfig,
    pub deezer: DeezerConfig,
    pub http: HttpConfig,
    pub concurrency: ConcurrencyConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, GeneratorError> {
    dotenvy::dotenv().ok();
    load_config_from(&ProcessEnv)
}

pub fn load_config_from(env: &dyn EnvSource) -> Result<AppConfig, GeneratorError> {
    let atg         = build_atg(env)?;
    let deezer      = build_deezer(env)?;
    let http        = HttpConfig::default();
    let concurrency = build_concurrency(env)?;
    let logging     = build_logging(env)?;

    Ok( AppConfig { atg, deezer, http, concurrency, logging } )
}

pub fn usage(program: &str) -> String {
    format!(
        "Usage:\n\tDEEZER_ACCESS_TOKEN=<TOKEN> DEEZER_PLAYLIST_ID=<ID> {program}\n\n\
         Optional:\n\
         \tTOP_TRACK_LIMIT      tracks per artist (default {DEFAULT_TOP_TRACK_LIMIT})\n\
         \tCONCURRENCY_LIMIT    artists resolved at once (default {DEFAULT_CONCURRENCY})\n\
         \tFAILURE_POLICY       best-effort | fail-fast (default best-effort)\n\
         \tDEEZER_WEB_FALLBACK  scrape deezer.com when the api search misses (default 1)\n\
         \tDRY_RUN              log the playlist instead of writing it (default 0)\n\
         \tLOG_FORMAT           json | pretty (default json)"
    )
}
