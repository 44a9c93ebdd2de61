//!
//! src/errors.rs
//!
//! Defines the error enum shared by the adapters and the coordinator,
//! plus conversions from the third-party errors we propagate
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("deezer error {code}: {kind}: {message}")]
    Deezer { code: i64, kind: String, message: String },
    #[error("task failed: {0}")]
    Task(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl GeneratorError {
    /// Configuration errors are fatal to a run; everything else is an
    /// adapter error and is contained to a single artist
    pub fn is_fatal(&self) -> bool {
        matches!(self, GeneratorError::Config(_))
    }
}

impl From<reqwest::Error> for GeneratorError {
    fn from(e: reqwest::Error) -> Self {
        // urls may carry the access token
        let e = e.without_url();
        if e.is_decode() {
            GeneratorError::Parse(e.to_string())
        } else {
            GeneratorError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for GeneratorError {
    fn from(e: serde_json::Error) -> Self { GeneratorError::Parse(e.to_string()) }
}

impl From<url::ParseError> for GeneratorError {
    fn from(e: url::ParseError) -> Self { GeneratorError::Config(e.to_string()) }
}
