//!
//! src/fetch.rs
//!
//! Builds the shared reqwest client and the retrying send helper every
//! adapter goes through. Retries live here so the coordinator never has
//! to know about them
//!

use std::time::Duration;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use reqwest::{Client, RequestBuilder, Response, header, redirect};
use tokio::time::sleep;
use tracing::warn;

use crate::config::{HttpConfig, RetryConfig};
use crate::errors::GeneratorError;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, GeneratorError> {
    let mut h = header::HeaderMap::new();
    h.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static("en-GB,en;q=0.8")
    );
    client_helper(http)
        .default_headers(h)
        .user_agent(http.user_agent.as_str())
        .build()
        .map_err(|e| GeneratorError::Http(format!("build client: {e}")))
}

/// Exponential backoff with jitter, capped at 2^6 times the base
fn generate_backoff(base: Duration, attempt: usize, rng: &mut SmallRng) -> Duration {
    let exp = (1_u64 << attempt.min(6)) * base.as_millis() as u64;
    let jitter = rng.gen_range(50..=200) as u64;
    Duration::from_millis(exp + jitter)
}

/// Sends the request, retrying transport errors and the configured
/// statuses. Any other non-2xx status is returned as `Status` immediately
pub async fn send_with_retry(
    request: RequestBuilder,
    retry: &RetryConfig
) -> Result<Response, GeneratorError> {
    let mut rng = SmallRng::from_entropy();
    let mut attempt = 0_usize;
    let max_retries = retry.max_retries as usize;
    loop {
        let response = request.try_clone()
            .ok_or_else(|| GeneratorError::Http("non-cloneable request".to_string()))?
            .send()
            .await;
        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }
                let retryable = retry.retryable_statuses.contains(&status.as_u16());
                if !retryable || attempt >= max_retries {
                    // query strings may carry the access token
                    let mut url = resp.url().clone();
                    url.set_query(None);
                    return Err(GeneratorError::Status {
                        status: status.as_u16(),
                        url: url.to_string()
                    });
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, &mut rng);
                warn!(status = %status, backoff = ?backoff.as_millis(), "http.retry");
                sleep(backoff).await;
                attempt += 1;
            },
            Err(e) => {
                if attempt >= max_retries || e.is_builder() {
                    return Err(e.into());
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, &mut rng);
                warn!(error = %e, backoff = ?backoff.as_millis(), "http.retry.error");
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

pub async fn send_for_text(
    request: RequestBuilder,
    retry: &RetryConfig
) -> Result<String, GeneratorError> {
    let resp = send_with_retry(request, retry).await?;
    Ok(resp.text().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubServer;

    #[test]
    fn backoff_grows_and_is_capped() {
        let mut rng = SmallRng::seed_from_u64(7);
        let base = Duration::from_millis(100);

        let first = generate_backoff(base, 0, &mut rng).as_millis();
        assert!((150..=300).contains(&first), "{first}");

        let third = generate_backoff(base, 2, &mut rng).as_millis();
        assert!((450..=600).contains(&third), "{third}");

        let capped = generate_backoff(base, 40, &mut rng).as_millis();
        assert!((6450..=6600).contains(&capped), "{capped}");
    }

    #[test]
    fn client_builds_from_defaults() {
        assert!(base_client(&HttpConfig::default()).is_ok());
    }

    fn quick_retry() -> RetryConfig {
        RetryConfig { base_backoff: Duration::from_millis(1), ..RetryConfig::default() }
    }

    #[tokio::test]
    async fn unavailable_is_retried_until_success() {
        let server = StubServer::start(vec![(503, ""), (429, ""), (200, "ok")]).await;
        let client = base_client(&HttpConfig::default()).unwrap();

        let body = send_for_text(client.get(server.base.join("top").unwrap()), &quick_retry())
            .await
            .unwrap();

        assert_eq!(body, "ok");
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn client_error_fails_without_retry_and_hides_the_query() {
        let server = StubServer::start(vec![(404, ""), (200, "never")]).await;
        let client = base_client(&HttpConfig::default()).unwrap();
        let url = server.base.join("missing?access_token=secret").unwrap();

        let err = send_with_retry(client.get(url), &quick_retry()).await.unwrap_err();

        match err {
            GeneratorError::Status { status, url } => {
                assert_eq!(status, 404);
                assert_eq!(url, format!("{}missing", server.base));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(server.requests(), vec!["GET /missing?access_token=secret".to_string()]);
    }

    #[tokio::test]
    async fn retries_stop_after_the_configured_count() {
        let server = StubServer::start(vec![(502, ""); 5]).await;
        let client = base_client(&HttpConfig::default()).unwrap();
        let retry = RetryConfig { max_retries: 2, ..quick_retry() };

        let err = send_with_retry(client.get(server.base.clone()), &retry).await.unwrap_err();

        assert!(matches!(err, GeneratorError::Status { status: 502, .. }));
        assert_eq!(server.requests().len(), 3);
    }
}
